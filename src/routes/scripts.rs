//! Controller passthrough: `GET /scripts`, `GET /scripts/{script_id}`.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use super::{error_response, ApiError};
use crate::AppState;

/// `GET /scripts` - every script the controller knows about.
pub async fn list_scripts(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let scripts = state
        .service
        .list_scripts()
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(json!({
        "count": scripts.len(),
        "scripts": scripts,
    })))
}

/// `GET /scripts/{script_id}`
pub async fn get_script(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let script = state
        .service
        .get_script(&script_id)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(json!(script)))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::routes::test_support::{app, send};
    use crate::testing::service_with;

    #[tokio::test]
    async fn test_list_and_get() {
        let (svc, _, _) = service_with(&["script.a", "script.b"]);
        let app = app(svc);

        let (status, body) = send(&app, Method::GET, "/scripts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["scripts"][0]["entity_id"], "script.a");

        let (status, body) = send(&app, Method::GET, "/scripts/b", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entity_id"], "script.b");

        let (status, body) = send(&app, Method::GET, "/scripts/zzz", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "SCRIPT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unconfigured_controller_is_503() {
        let (svc, _, controller) = service_with(&["script.a"]);
        controller.set_configured(false);
        let app = app(svc);
        let (status, _) = send(&app, Method::GET, "/scripts", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
