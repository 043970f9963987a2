//! Lifecycle of the single shared tunneling subprocess.
//!
//! Every mapping shares one subprocess (the provider's free tier allows one
//! public endpoint at a time). [`TunnelSupervisor`] is the only component that
//! spawns or terminates it.
//!
//! ## Concurrency
//!
//! The process handle sits behind an async `Mutex` that
//! [`TunnelSupervisor::acquire`] holds for the whole spawn-and-probe sequence.
//! A second caller arriving while a start is in flight waits on the lock, then
//! finds the process running and reuses its URL, so concurrent acquires never
//! spawn twice.
//!
//! Observers never take that lock. [`TunnelStatus`] is published on a `watch`
//! channel updated at every transition, so [`TunnelSupervisor::status`]
//! answers immediately even while a start is probing.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use super::backoff::ProbeBackoff;
use super::process::{TunnelLauncher, TunnelProcess};

/// The subprocess could not produce a public URL.
#[derive(Debug, thiserror::Error)]
pub enum TunnelStartError {
    #[error("failed to spawn tunnel process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("tunnel process exited before reporting a URL ({status}){}", stderr_suffix(.stderr))]
    Exited { status: String, stderr: String },
    #[error("tunnel process is running but reported no public URL after {attempts} probes")]
    Unresponsive { attempts: u32 },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TunnelStatus {
    pub running: bool,
    /// A spawn-and-probe sequence is in flight.
    pub starting: bool,
    /// Last URL reported by a live subprocess.
    pub public_url: Option<String>,
    pub warmed_up: bool,
}

/// Clears `starting` however the start sequence ends, including when the
/// acquiring future is dropped.
struct StartingGuard<'a>(&'a watch::Sender<TunnelStatus>);

impl<'a> StartingGuard<'a> {
    fn new(status: &'a watch::Sender<TunnelStatus>) -> Self {
        status.send_modify(|s| s.starting = true);
        Self(status)
    }
}

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|s| s.starting = false);
    }
}

/// Owns the tunneling subprocess.
pub struct TunnelSupervisor {
    launcher: Arc<dyn TunnelLauncher>,
    auth_token: Option<String>,
    backoff: ProbeBackoff,
    grace: Duration,
    process: Mutex<Option<Box<dyn TunnelProcess>>>,
    status: watch::Sender<TunnelStatus>,
}

impl TunnelSupervisor {
    pub fn new(
        launcher: Arc<dyn TunnelLauncher>,
        auth_token: Option<String>,
        backoff: ProbeBackoff,
        grace: Duration,
    ) -> Self {
        let (status, _) = watch::channel(TunnelStatus::default());
        Self {
            launcher,
            auth_token,
            backoff,
            grace,
            process: Mutex::new(None),
            status,
        }
    }

    /// Public base URL for `local_port`, starting the subprocess if needed.
    ///
    /// Idempotent: a live process whose status API reports a URL is reused.
    /// A process that died since the last call, or that is alive but no longer
    /// reports a URL, is replaced.
    pub async fn acquire(&self, local_port: u16) -> Result<String, TunnelStartError> {
        let mut slot = self.process.lock().await;

        if let Some(process) = slot.as_mut() {
            match process.exit_status() {
                None => {
                    if let Some(url) = self.launcher.probe().await {
                        self.publish_running(&url);
                        return Ok(url);
                    }
                    warn!("Tunnel process running but reports no URL, restarting");
                    process.terminate(self.grace).await;
                }
                Some(status) => {
                    warn!("Tunnel process died ({status}), restarting");
                }
            }
            *slot = None;
            self.publish_stopped();
        }

        let _starting = StartingGuard::new(&self.status);
        let (process, url) = self.start(local_port).await?;
        *slot = Some(process);
        self.publish_running(&url);
        Ok(url)
    }

    /// Kill strays, spawn, and poll until the status API reports a URL.
    async fn start(
        &self,
        local_port: u16,
    ) -> Result<(Box<dyn TunnelProcess>, String), TunnelStartError> {
        self.launcher.kill_strays().await;

        let mut process = self
            .launcher
            .spawn(local_port, self.auth_token.as_deref())
            .inspect_err(|e| error!("Failed to spawn tunnel process: {e}"))?;

        for attempt in 0..self.backoff.retries {
            tokio::time::sleep(self.backoff.delay(attempt)).await;

            if let Some(status) = process.exit_status() {
                let stderr = process.stderr_tail().await;
                error!("Tunnel process exited during startup ({status}): {stderr}");
                return Err(TunnelStartError::Exited { status, stderr });
            }
            if let Some(url) = self.launcher.probe().await {
                info!(
                    "Tunnel up at {url} (pid {:?}, probe {})",
                    process.pid(),
                    attempt + 1
                );
                return Ok((process, url));
            }
        }

        error!(
            "Tunnel process gave no URL after {} probes, terminating",
            self.backoff.retries
        );
        process.terminate(self.grace).await;
        Err(TunnelStartError::Unresponsive {
            attempts: self.backoff.retries,
        })
    }

    /// Best-effort [`acquire`](Self::acquire) at startup. Failures are logged;
    /// the first real request then pays the cold start instead.
    pub async fn warm_up(&self, local_port: u16) -> bool {
        info!("Warming up tunnel on port {local_port}");
        match self.acquire(local_port).await {
            Ok(url) => {
                self.status.send_modify(|s| s.warmed_up = true);
                info!("Tunnel warm-up complete: {url}");
                true
            }
            Err(e) => {
                warn!("Tunnel warm-up failed, service continues without it: {e}");
                false
            }
        }
    }

    /// Stop the subprocess and reap any strays. Safe to call when nothing runs.
    pub async fn release(&self) {
        let mut slot = self.process.lock().await;
        if let Some(mut process) = slot.take() {
            info!("Terminating tunnel process (pid {:?})", process.pid());
            process.terminate(self.grace).await;
        }
        self.publish_stopped();
        let strays = self.launcher.kill_strays().await;
        if strays > 0 {
            info!("Released tunnel, {strays} stray process(es) killed");
        } else {
            info!("Tunnel released");
        }
    }

    /// Current status. Never waits for a start in flight; when the process
    /// lock is free the liveness of the owned process is re-checked first.
    pub fn status(&self) -> TunnelStatus {
        if let Ok(mut slot) = self.process.try_lock() {
            let alive = slot.as_mut().is_some_and(|p| p.exit_status().is_none());
            self.status.send_if_modified(|s| {
                if s.running && !alive {
                    s.running = false;
                    s.public_url = None;
                    true
                } else {
                    false
                }
            });
        }
        self.status.borrow().clone()
    }

    /// Receiver for status transitions.
    pub fn subscribe(&self) -> watch::Receiver<TunnelStatus> {
        self.status.subscribe()
    }

    /// Whether an owned subprocess is alive right now.
    pub fn is_running(&self) -> bool {
        self.status().running
    }

    pub fn public_url(&self) -> Option<String> {
        self.status().public_url
    }

    pub fn is_warmed_up(&self) -> bool {
        self.status.borrow().warmed_up
    }

    fn publish_running(&self, url: &str) {
        self.status.send_modify(|s| {
            s.running = true;
            s.public_url = Some(url.to_string());
        });
    }

    fn publish_stopped(&self) {
        self.status.send_modify(|s| {
            s.running = false;
            s.public_url = None;
            s.warmed_up = false;
        });
    }
}
