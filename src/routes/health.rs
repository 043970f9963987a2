//! Unauthenticated status endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /` - service identity and configuration flags.
pub async fn root(State(state): State<AppState>) -> Json<Value> {
    let status = state.service.status().await;
    Json(json!({
        "message": "Home Assistant Script Publisher",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "ngrok_configured": status.ngrok_configured,
        "ha_configured": status.ha_configured,
        "tunnel_running": status.tunnel_running,
        "active_tunnels": status.active_tunnels,
    }))
}

/// `GET /health` - liveness probe.
///
/// 503 when the controller is not configured, since no script can run.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let status = state.service.status().await;
    let code = if status.ha_configured {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if status.ha_configured { "healthy" } else { "degraded" },
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "ngrok_configured": status.ngrok_configured,
        "ha_configured": status.ha_configured,
        "tunnel": {
            "running": status.tunnel_running,
            "starting": status.tunnel_starting,
            "warmed_up": status.tunnel_warmed_up,
            "public_url": status.public_url,
        },
        "active_tunnels": status.active_tunnels,
        "reaper": status.reaper,
    });
    (code, Json(body))
}
