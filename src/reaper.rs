//! Background eviction of expired tunnel mappings.
//!
//! The reaper is a periodic task that is only alive while it has work:
//!
//! ```text
//!            ensure_running()                    registry empty after a pass
//!   Idle ─────────────────────────▶ Running ─────────────────────────────▶ Idle
//!                                      │
//!                                      │ shutdown()
//!                                      ▼
//!                                   Stopped
//! ```
//!
//! Each pass removes every record whose TTL has elapsed. When a pass empties
//! the registry the shared tunnel is released. A service where no caller ever
//! asks for an expiring tunnel never starts the task at all.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::service::Core;

/// Observable reaper state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaperStatus {
    Idle,
    Running,
    Stopped,
}

enum ReaperState {
    Idle,
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// Owner of the expiry task.
pub struct Reaper {
    core: Core,
    interval: Duration,
    state: Arc<Mutex<ReaperState>>,
}

impl Reaper {
    pub fn new(core: Core, interval: Duration) -> Self {
        Self {
            core,
            interval,
            state: Arc::new(Mutex::new(ReaperState::Idle)),
        }
    }

    /// Start the task if it is idle. No-op while running or after shutdown.
    pub async fn ensure_running(&self) {
        let mut state = self.state.lock().await;
        if !matches!(*state, ReaperState::Idle) {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            self.core.clone(),
            self.interval,
            cancel.clone(),
            Arc::clone(&self.state),
        ));
        *state = ReaperState::Running { cancel, handle };
        info!("Expiry reaper started (every {}s)", self.interval.as_secs());
    }

    pub async fn status(&self) -> ReaperStatus {
        match *self.state.lock().await {
            ReaperState::Idle => ReaperStatus::Idle,
            ReaperState::Running { .. } => ReaperStatus::Running,
            ReaperState::Stopped => ReaperStatus::Stopped,
        }
    }

    /// Cancel the pending sleep, wait for the task to exit, and refuse any
    /// further starts.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.state.lock().await, ReaperState::Stopped);
        if let ReaperState::Running { cancel, handle } = previous {
            cancel.cancel();
            let _ = handle.await;
            info!("Expiry reaper stopped");
        }
    }
}

async fn run(
    core: Core,
    interval: Duration,
    cancel: CancellationToken,
    state: Arc<Mutex<ReaperState>>,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }

        let removal = core.registry.remove_expired(Instant::now()).await;
        if !removal.removed.is_empty() {
            info!(
                "Expired {} tunnel(s): {}",
                removal.removed.len(),
                removal.removed.join(", ")
            );
        }
        if removal.emptied {
            info!("All tunnels expired or removed, releasing tunnel");
            core.release_if_idle().await;
        }

        // Decide on going idle under the state lock so a concurrent
        // ensure_running() either sees us Running or sees Idle and respawns.
        let mut guard = state.lock().await;
        if cancel.is_cancelled() {
            return;
        }
        if core.registry.is_empty().await {
            *guard = ReaperState::Idle;
            debug!("Registry empty, expiry reaper going idle");
            return;
        }
    }
}
