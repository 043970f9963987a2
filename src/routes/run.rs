//! Public dispatch: `GET /run/{token}`.
//!
//! This is the only endpoint reachable through the tunnel by strangers; the
//! token is the whole credential.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use super::{error_response, ApiError};
use crate::AppState;

/// `GET /run/{token}` - resolve the token and run its script.
pub async fn run_script(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (script_id, result) = state
        .service
        .dispatch(&token)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Script {script_id} executed successfully"),
        "script_id": script_id,
        "result": result,
    })))
}
