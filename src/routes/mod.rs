//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint group. Handlers translate
//! between JSON and [`crate::service::TunnelService`] calls; failures become
//! `{"success": false, "message", "code"}` bodies via [`error_response`].

pub mod health;
pub mod run;
pub mod scripts;
pub mod tunnels;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::service::ServiceError;
use crate::AppState;

/// Handler error type shared by every route.
pub type ApiError = (StatusCode, Json<Value>);

/// Status and JSON body for a [`ServiceError`].
pub fn error_response(err: &ServiceError) -> ApiError {
    let status = err.status();
    if status.is_server_error() {
        warn!("{}: {err}", err.code());
    }
    (
        status,
        Json(json!({
            "success": false,
            "message": err.to_string(),
            "code": err.code(),
        })),
    )
}

/// Every route of the public API, without middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/tunnels/create", post(tunnels::create_tunnel))
        .route("/create_tunnel", post(tunnels::create_tunnel))
        .route(
            "/tunnels",
            get(tunnels::list_tunnels).delete(tunnels::delete_all),
        )
        .route(
            "/tunnels/{script_id}",
            get(tunnels::get_tunnel).delete(tunnels::delete_tunnel),
        )
        .route("/run/{token}", get(run::run_script))
        .route("/scripts", get(scripts::list_scripts))
        .route("/scripts/{script_id}", get(scripts::get_script))
        .with_state(state)
}
