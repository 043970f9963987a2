//! Tunnel management endpoints.
//!
//! - `POST   /tunnels/create`        - publish a script (also `/create_tunnel`)
//! - `GET    /tunnels`               - list live mappings
//! - `GET    /tunnels/{script_id}`   - one mapping
//! - `DELETE /tunnels/{script_id}`   - unpublish one script
//! - `DELETE /tunnels`               - unpublish everything

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{error_response, ApiError};
use crate::registry::CreateOutcome;
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateTunnelRequest {
    pub script_id: String,
    /// Minutes until the mapping expires; absent or `0` uses the default.
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
}

/// `POST /tunnels/create` - publish a script, or return its existing mapping.
pub async fn create_tunnel(
    State(state): State<AppState>,
    Json(req): Json<CreateTunnelRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .service
        .create_tunnel(&req.script_id, req.timeout_minutes)
        .await
        .map_err(|e| error_response(&e))?;

    let message = match &outcome {
        CreateOutcome::Created(r) => format!("Tunnel created successfully for script {}", r.script_id),
        CreateOutcome::Existing(r) => format!("Tunnel already exists for script {}", r.script_id),
    };
    let record = outcome.into_record();
    Ok(Json(json!({
        "success": true,
        "message": message,
        "tunnel_url": record.public_base_url,
        "complete_url": record.complete_url,
        "script_id": record.script_id,
        "expires_at": record.expires_at,
    })))
}

/// `GET /tunnels` - every live mapping, oldest first.
pub async fn list_tunnels(State(state): State<AppState>) -> Json<Value> {
    let tunnels = state.service.list_tunnels().await;
    Json(json!({
        "count": tunnels.len(),
        "tunnels": tunnels,
    }))
}

/// `GET /tunnels/{script_id}`
pub async fn get_tunnel(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .service
        .get_tunnel(&script_id)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(json!(record)))
}

/// `DELETE /tunnels/{script_id}` - releases the tunnel if this was the last mapping.
pub async fn delete_tunnel(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .service
        .delete_tunnel(&script_id)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Tunnel for script {script_id} deleted successfully"),
    })))
}

/// `DELETE /tunnels`
pub async fn delete_all(State(state): State<AppState>) -> Json<Value> {
    let count = state.service.delete_all().await;
    let message = if count == 0 {
        "No active tunnels to delete".to_string()
    } else {
        format!("Deleted {count} active tunnels")
    };
    Json(json!({
        "success": true,
        "message": message,
        "deleted": count,
    }))
}
