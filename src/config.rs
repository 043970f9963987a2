//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** - see [`Config::load`] for the full list.
//!    The Home Assistant add-on names (`HASSIO_TOKEN`, `NGROK_AUTH_TOKEN`,
//!    `HA_BASE_URL`, `PORT`) are honoured alongside the `SCRIPTGATE_*` ones.
//! 2. **Config file** - path via `--config <path>`, or `scriptgate.toml` in CWD
//! 3. **Compiled defaults** - see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8099"
//!
//! [controller]
//! base_url = "http://supervisor/core/api"
//! token = "long-lived-access-token"
//! timeout_secs = 10
//!
//! [tunnel]
//! auth_token = "ngrok-auth-token"          # omit to disable tunneling
//! binary = "ngrok"
//! status_url = "http://127.0.0.1:4040/api/tunnels"
//! # local_port = 8099                      # defaults to the port of server.listen
//! warm_up = true
//! probe_initial_delay_ms = 2000
//! probe_multiplier = 1.5
//! probe_max_delay_ms = 8000
//! probe_retries = 5
//! terminate_grace_secs = 5
//!
//! [registry]
//! default_ttl_minutes = 0                  # 0 = tunnels never expire by default
//! reap_interval_secs = 60
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::service::MAX_TIMEOUT_MINUTES;
use crate::tunnel::backoff::ProbeBackoff;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8099`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Home Assistant REST API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Base URL of the REST API, without trailing slash.
    #[serde(default = "default_controller_url")]
    pub base_url: String,
    /// Long-lived access token. Required; the server refuses to start without it.
    pub token: Option<String>,
    /// Per-request timeout in seconds (default 10).
    #[serde(default = "default_controller_timeout")]
    pub timeout_secs: u64,
}

/// Tunneling subprocess settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    /// Provider auth token. When absent, tunnel creation answers 503.
    pub auth_token: Option<String>,
    /// Tunneling binary to spawn (default `ngrok`).
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Local status API polled for the public URL.
    #[serde(default = "default_status_url")]
    pub status_url: String,
    /// Local port the tunnel forwards to. Defaults to the port of `server.listen`.
    pub local_port: Option<u16>,
    /// Start the subprocess at boot to hide cold-start latency (default true).
    #[serde(default = "default_warm_up")]
    pub warm_up: bool,
    #[serde(default = "default_probe_initial_delay_ms")]
    pub probe_initial_delay_ms: u64,
    #[serde(default = "default_probe_multiplier")]
    pub probe_multiplier: f64,
    #[serde(default = "default_probe_max_delay_ms")]
    pub probe_max_delay_ms: u64,
    #[serde(default = "default_probe_retries")]
    pub probe_retries: u32,
    /// Seconds between SIGTERM and SIGKILL when stopping the subprocess (default 5).
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_secs: u64,
}

/// Mapping registry and expiry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// TTL applied when a create request carries none. 0 disables (default).
    #[serde(default)]
    pub default_ttl_minutes: u64,
    /// Seconds between reaper passes (default 60).
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// A required or recommended credential is missing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("controller token is not set (SCRIPTGATE_CONTROLLER_TOKEN or HASSIO_TOKEN)")]
    MissingControllerToken,
    #[error("tunnel auth token is not set (SCRIPTGATE_TUNNEL_TOKEN or NGROK_AUTH_TOKEN); tunneling disabled")]
    MissingTunnelToken,
}

impl ConfigurationError {
    /// Whether the server must refuse to start.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingControllerToken)
    }
}

fn default_listen() -> String {
    "0.0.0.0:8099".to_string()
}
fn default_controller_url() -> String {
    "http://supervisor/core/api".to_string()
}
fn default_controller_timeout() -> u64 {
    10
}
fn default_binary() -> String {
    "ngrok".to_string()
}
fn default_status_url() -> String {
    "http://127.0.0.1:4040/api/tunnels".to_string()
}
fn default_warm_up() -> bool {
    true
}
fn default_probe_initial_delay_ms() -> u64 {
    2000
}
fn default_probe_multiplier() -> f64 {
    1.5
}
fn default_probe_max_delay_ms() -> u64 {
    8000
}
fn default_probe_retries() -> u32 {
    5
}
fn default_terminate_grace() -> u64 {
    5
}
fn default_reap_interval() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            base_url: default_controller_url(),
            token: None,
            timeout_secs: default_controller_timeout(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            binary: default_binary(),
            status_url: default_status_url(),
            local_port: None,
            warm_up: default_warm_up(),
            probe_initial_delay_ms: default_probe_initial_delay_ms(),
            probe_multiplier: default_probe_multiplier(),
            probe_max_delay_ms: default_probe_max_delay_ms(),
            probe_retries: default_probe_retries(),
            terminate_grace_secs: default_terminate_grace(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_ttl_minutes: 0,
            reap_interval_secs: default_reap_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TunnelConfig {
    /// Readiness-probe schedule built from the `probe_*` fields.
    pub fn backoff(&self) -> ProbeBackoff {
        ProbeBackoff {
            first: Duration::from_millis(self.probe_initial_delay_ms),
            factor: self.probe_multiplier,
            max: Duration::from_millis(self.probe_max_delay_ms),
            retries: self.probe_retries,
        }
    }

    /// Whether a usable auth token is configured.
    pub fn is_configured(&self) -> bool {
        self.auth_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl RegistryConfig {
    /// Clamped to [`MAX_TIMEOUT_MINUTES`]; `0` means no expiry.
    pub fn default_ttl(&self) -> Option<Duration> {
        let minutes = self.default_ttl_minutes.min(MAX_TIMEOUT_MINUTES);
        (minutes > 0).then(|| Duration::from_secs(minutes * 60))
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `scriptgate.toml` in the current directory, falling back to compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("scriptgate.toml").exists() {
            let content =
                std::fs::read_to_string("scriptgate.toml").expect("Failed to read scriptgate.toml");
            toml::from_str(&content).expect("Failed to parse scriptgate.toml")
        } else {
            Config::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Apply environment overrides. `lookup` is injected so tests don't touch
    /// the process environment. Earlier names in each list win.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| lookup(n).filter(|v| !v.is_empty()))
        };

        if let Some(listen) = first(&["SCRIPTGATE_LISTEN"]) {
            self.server.listen = listen;
        } else if let Some(port) = first(&["PORT"]).and_then(|p| p.parse::<u16>().ok()) {
            let host = self
                .server
                .listen
                .rsplit_once(':')
                .map_or("0.0.0.0", |(h, _)| h)
                .to_string();
            self.server.listen = format!("{host}:{port}");
        }
        if let Some(url) = first(&["SCRIPTGATE_CONTROLLER_URL", "HA_BASE_URL"]) {
            self.controller.base_url = url;
        }
        if let Some(token) = first(&[
            "SCRIPTGATE_CONTROLLER_TOKEN",
            "HASSIO_TOKEN",
            "SUPERVISOR_TOKEN",
        ]) {
            self.controller.token = Some(token);
        }
        if let Some(token) = first(&["SCRIPTGATE_TUNNEL_TOKEN", "NGROK_AUTH_TOKEN"]) {
            self.tunnel.auth_token = Some(token);
        }
        if let Some(ttl) = first(&["SCRIPTGATE_DEFAULT_TTL_MINUTES"]).and_then(|t| t.parse().ok())
        {
            self.registry.default_ttl_minutes = ttl;
        }
        self.controller.base_url = self.controller.base_url.trim_end_matches('/').to_string();
    }

    /// Local port the tunnel forwards to.
    pub fn forward_port(&self) -> u16 {
        self.tunnel.local_port.unwrap_or_else(|| {
            self.server
                .listen
                .rsplit_once(':')
                .and_then(|(_, p)| p.parse().ok())
                .unwrap_or(8099)
        })
    }

    /// Missing credentials. Fatal ones must stop startup; the rest are warnings.
    pub fn check(&self) -> Vec<ConfigurationError> {
        let mut problems = Vec::new();
        if self.controller.token.as_deref().is_none_or(str::is_empty) {
            problems.push(ConfigurationError::MissingControllerToken);
        }
        if !self.tunnel.is_configured() {
            problems.push(ConfigurationError::MissingTunnelToken);
        }
        problems
    }
}

/// First five characters of a secret followed by an ellipsis, for logs.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(5).collect();
    format!("{prefix}...")
}
