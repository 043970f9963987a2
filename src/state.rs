//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::service::TunnelService;

/// Shared application state for the scriptgate server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// The tunnel service; owns the registry, supervisor and reaper.
    pub service: Arc<TunnelService>,
}

impl AppState {
    pub fn new(config: Arc<Config>, service: Arc<TunnelService>) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            service,
        }
    }
}
