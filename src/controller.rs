//! Home Assistant REST client.
//!
//! [`ScriptController`] is everything the service needs from the controller:
//! does a script exist, run it, enumerate scripts. [`HomeAssistantClient`]
//! implements it over `reqwest`.
//!
//! ## Script ids
//!
//! Callers may pass either a full entity id (`script.morning_routine`) or the
//! bare object id (`morning_routine`); the latter is addressed as
//! `script.<id>` when talking to Home Assistant.
//!
//! ## Error handling
//!
//! Non-2xx responses are parsed for a `message` field in the JSON body. If
//! parsing fails, the raw response body is returned as the error message.
//! Calls are never retried here.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

/// A script as reported by the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptInfo {
    pub entity_id: String,
    /// Friendly name, falling back to the entity id.
    pub name: String,
    pub state: Option<String>,
    pub attributes: Value,
}

/// Errors returned by [`ScriptController`] methods.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// No access token configured.
    #[error("Home Assistant token not configured")]
    NotConfigured,
    /// HTTP transport error (connection refused, timeout, DNS failure, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The controller returned a non-2xx HTTP status.
    #[error("Home Assistant error (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },
    /// The response body was not the JSON we expected.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ControllerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Upstream { status: 404, .. })
    }
}

/// The controller operations the tunnel service depends on.
#[async_trait]
pub trait ScriptController: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn exists(&self, script_id: &str) -> Result<bool, ControllerError>;

    /// Run the script and return the controller's response body.
    async fn invoke(&self, script_id: &str) -> Result<Value, ControllerError>;

    async fn list(&self) -> Result<Vec<ScriptInfo>, ControllerError>;

    async fn get(&self, script_id: &str) -> Result<Option<ScriptInfo>, ControllerError>;
}

/// Full entity id for a script id.
pub fn entity_id(script_id: &str) -> String {
    if script_id.contains('.') {
        script_id.to_string()
    } else {
        format!("script.{script_id}")
    }
}

/// Build a [`ScriptInfo`] from a `/api/states` entry. `None` for non-scripts
/// and entries without a state.
fn script_from_state(state: &Value) -> Option<ScriptInfo> {
    let entity_id = state["entity_id"].as_str()?;
    if !entity_id.starts_with("script.") || state.get("state").is_none_or(Value::is_null) {
        return None;
    }
    let attributes = state.get("attributes").cloned().unwrap_or_else(|| json!({}));
    let name = attributes["friendly_name"]
        .as_str()
        .unwrap_or(entity_id)
        .to_string();
    Some(ScriptInfo {
        entity_id: entity_id.to_string(),
        name,
        state: state["state"].as_str().map(String::from),
        attributes,
    })
}

/// HTTP client for the Home Assistant REST API.
pub struct HomeAssistantClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HomeAssistantClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn token(&self) -> Result<&str, ControllerError> {
        self.token.as_deref().ok_or(ControllerError::NotConfigured)
    }

    async fn get_json(&self, path: &str) -> Result<Value, ControllerError> {
        let url = format!("{}/{path}", self.base_url);
        debug!("GET {url}");
        let resp = self.http.get(&url).bearer_auth(self.token()?).send().await?;
        Self::handle_response(resp).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ControllerError> {
        let url = format!("{}/{path}", self.base_url);
        debug!("POST {url}");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(self.token()?)
            .json(body)
            .send()
            .await?;
        Self::handle_response(resp).await
    }

    /// `GET /api/` - returns whether the API answered with 2xx.
    pub async fn check_connection(&self) -> bool {
        match self.get_json("").await {
            Ok(_) => {
                info!("Home Assistant connectivity check passed");
                true
            }
            Err(e) => {
                error!("Home Assistant connectivity check failed: {e}");
                false
            }
        }
    }

    async fn handle_response(resp: reqwest::Response) -> Result<Value, ControllerError> {
        let status = resp.status();
        let body = resp.text().await?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body)
                .map_err(|e| ControllerError::Protocol(format!("Invalid JSON from Home Assistant: {e}")))
        } else {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["message"].as_str().map(String::from))
                .unwrap_or(body);
            Err(ControllerError::Upstream {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl ScriptController for HomeAssistantClient {
    fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    async fn exists(&self, script_id: &str) -> Result<bool, ControllerError> {
        Ok(self.get(script_id).await?.is_some())
    }

    async fn invoke(&self, script_id: &str) -> Result<Value, ControllerError> {
        let entity = entity_id(script_id);
        info!("Running script {entity}");
        self.post_json("services/script/turn_on", &json!({ "entity_id": entity }))
            .await
    }

    async fn list(&self) -> Result<Vec<ScriptInfo>, ControllerError> {
        let states = self.get_json("states").await?;
        let states = states
            .as_array()
            .ok_or_else(|| ControllerError::Protocol("states is not an array".to_string()))?;
        Ok(states.iter().filter_map(script_from_state).collect())
    }

    async fn get(&self, script_id: &str) -> Result<Option<ScriptInfo>, ControllerError> {
        match self.get_json(&format!("states/{}", entity_id(script_id))).await {
            Ok(state) => Ok(script_from_state(&state)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
