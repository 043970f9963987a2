//! The tunnel service: one owned object composing the registry, the
//! supervisor, the expiry reaper and the controller client.
//!
//! Constructed once at startup and shared with handlers through
//! [`crate::AppState`]. Every operation exposed over HTTP is a method here;
//! handlers only translate between JSON and these calls.
//!
//! ## Ordering
//!
//! Registry mutations are atomic on their own (see [`crate::registry`]). On
//! top of that, a `lifecycle` `RwLock` orders tunnel start against tunnel
//! teardown: create holds it shared across `acquire` + `create`, and
//! releasing on an empty registry takes it exclusively and re-checks
//! emptiness. A release therefore never kills the tunnel underneath a mapping
//! that is being created, and registry reads are never blocked by a slow
//! subprocess start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::controller::{ControllerError, ScriptController, ScriptInfo};
use crate::reaper::{Reaper, ReaperStatus};
use crate::registry::{CreateOutcome, MappingRegistry, TunnelRecord};
use crate::tunnel::{TunnelStartError, TunnelSupervisor};

/// Upper bound on a requested `timeout_minutes` (one year).
pub const MAX_TIMEOUT_MINUTES: u64 = 365 * 24 * 60;

/// Failures surfaced by [`TunnelService`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("script_id must not be empty")]
    EmptyScriptId,
    #[error("timeout_minutes must be at most {MAX_TIMEOUT_MINUTES}, got {0}")]
    InvalidTimeout(u64),
    #[error("Tunneling not configured. Please add NGROK_AUTH_TOKEN to the configuration.")]
    TunnelingNotConfigured,
    #[error("Script '{0}' not found in Home Assistant. Please check the script ID.")]
    ScriptNotFound(String),
    #[error("No tunnel found for script {0}")]
    TunnelNotFound(String),
    #[error("Invalid or expired URL")]
    InvalidToken,
    #[error("Failed to create tunnel: {0}")]
    TunnelStart(#[from] TunnelStartError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl ServiceError {
    /// HTTP status for this error at the façade.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::EmptyScriptId | Self::InvalidTimeout(_) => StatusCode::BAD_REQUEST,
            Self::ScriptNotFound(_) | Self::TunnelNotFound(_) | Self::InvalidToken => {
                StatusCode::NOT_FOUND
            }
            Self::TunnelingNotConfigured | Self::Controller(ControllerError::NotConfigured) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::TunnelStart(_) | Self::Controller(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyScriptId => "INVALID_REQUEST",
            Self::InvalidTimeout(_) => "INVALID_TIMEOUT",
            Self::TunnelingNotConfigured => "TUNNELING_NOT_CONFIGURED",
            Self::ScriptNotFound(_) => "SCRIPT_NOT_FOUND",
            Self::TunnelNotFound(_) => "TUNNEL_NOT_FOUND",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TunnelStart(_) => "TUNNEL_START_FAILED",
            Self::Controller(ControllerError::NotConfigured) => "CONTROLLER_NOT_CONFIGURED",
            Self::Controller(_) => "UPSTREAM_ERROR",
        }
    }
}

/// Registry plus supervisor, shared with the reaper.
#[derive(Clone)]
pub struct Core {
    pub registry: MappingRegistry,
    pub supervisor: Arc<TunnelSupervisor>,
    lifecycle: Arc<RwLock<()>>,
    /// Set by every acquire, cleared by the release that follows it.
    holds_tunnel: Arc<AtomicBool>,
}

impl Core {
    pub fn new(registry: MappingRegistry, supervisor: Arc<TunnelSupervisor>) -> Self {
        Self {
            registry,
            supervisor,
            lifecycle: Arc::new(RwLock::new(())),
            holds_tunnel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `acquire` under the shared lifecycle lock. Callers hold the guard.
    async fn acquire(&self, local_port: u16) -> Result<String, TunnelStartError> {
        let url = self.supervisor.acquire(local_port).await?;
        self.holds_tunnel.store(true, Ordering::SeqCst);
        Ok(url)
    }

    /// Release unconditionally. Caller holds the lifecycle write lock.
    async fn release_locked(&self) {
        self.holds_tunnel.store(false, Ordering::SeqCst);
        self.supervisor.release().await;
    }

    /// Release the tunnel if no mapping is live and nothing released it since
    /// the last acquire. Returns whether it released.
    pub async fn release_if_idle(&self) -> bool {
        let _guard = self.lifecycle.write().await;
        if !self.registry.is_empty().await {
            debug!("Registry repopulated before release, keeping tunnel");
            return false;
        }
        if !self.holds_tunnel.load(Ordering::SeqCst) {
            debug!("Tunnel already released since the last acquire");
            return false;
        }
        self.release_locked().await;
        true
    }
}

/// Tunnel-service settings taken from [`crate::Config`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub local_port: u16,
    pub tunneling_configured: bool,
    pub default_ttl: Option<Duration>,
    pub reap_interval: Duration,
}

/// Snapshot for `/` and `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub ngrok_configured: bool,
    pub ha_configured: bool,
    pub tunnel_running: bool,
    pub tunnel_starting: bool,
    pub tunnel_warmed_up: bool,
    pub public_url: Option<String>,
    pub active_tunnels: usize,
    pub reaper: ReaperStatus,
}

pub struct TunnelService {
    core: Core,
    controller: Arc<dyn ScriptController>,
    reaper: Reaper,
    options: ServiceOptions,
}

impl TunnelService {
    pub fn new(
        supervisor: TunnelSupervisor,
        controller: Arc<dyn ScriptController>,
        options: ServiceOptions,
    ) -> Self {
        Self::with_registry(MappingRegistry::new(), supervisor, controller, options)
    }

    pub fn with_registry(
        registry: MappingRegistry,
        supervisor: TunnelSupervisor,
        controller: Arc<dyn ScriptController>,
        options: ServiceOptions,
    ) -> Self {
        let core = Core::new(registry, Arc::new(supervisor));
        let reaper = Reaper::new(core.clone(), options.reap_interval);
        Self {
            core,
            controller,
            reaper,
            options,
        }
    }

    pub fn controller(&self) -> &dyn ScriptController {
        self.controller.as_ref()
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.core.registry
    }

    pub fn supervisor(&self) -> &TunnelSupervisor {
        &self.core.supervisor
    }

    pub fn is_tunneling_configured(&self) -> bool {
        self.options.tunneling_configured
    }

    /// Start the tunnel ahead of the first request. No-op when tunneling is
    /// not configured.
    pub async fn warm_up(&self) -> bool {
        if !self.options.tunneling_configured {
            return false;
        }
        let _guard = self.core.lifecycle.read().await;
        let warmed = self.core.supervisor.warm_up(self.options.local_port).await;
        if warmed {
            self.core.holds_tunnel.store(true, Ordering::SeqCst);
        }
        warmed
    }

    /// Publish `script_id`. An already-published script is returned as
    /// [`CreateOutcome::Existing`] without touching the controller or tunnel.
    ///
    /// `ttl_minutes` of `None` or `0` falls back to the configured default TTL;
    /// anything above [`MAX_TIMEOUT_MINUTES`] is rejected.
    pub async fn create_tunnel(
        &self,
        script_id: &str,
        ttl_minutes: Option<u64>,
    ) -> Result<CreateOutcome, ServiceError> {
        let script_id = script_id.trim();
        if script_id.is_empty() {
            return Err(ServiceError::EmptyScriptId);
        }
        let ttl = match ttl_minutes.filter(|m| *m > 0) {
            Some(m) if m > MAX_TIMEOUT_MINUTES => return Err(ServiceError::InvalidTimeout(m)),
            Some(m) => Some(Duration::from_secs(m * 60)),
            None => self.options.default_ttl,
        };
        if !self.options.tunneling_configured {
            return Err(ServiceError::TunnelingNotConfigured);
        }
        if let Some(existing) = self.core.registry.lookup_by_script_id(script_id).await {
            return Ok(CreateOutcome::Existing(existing));
        }
        if !self.controller.exists(script_id).await? {
            return Err(ServiceError::ScriptNotFound(script_id.to_string()));
        }

        let outcome = {
            let _guard = self.core.lifecycle.read().await;
            let url = self.core.acquire(self.options.local_port).await?;
            self.core.registry.create(script_id, &url, ttl).await
        };

        if outcome.is_new() {
            let record = outcome.record();
            info!(
                "Created tunnel for {script_id}: {} (forwarding port {})",
                record.complete_url, self.options.local_port
            );
            if record.has_ttl() {
                self.reaper.ensure_running().await;
            }
        }
        Ok(outcome)
    }

    pub async fn list_tunnels(&self) -> Vec<TunnelRecord> {
        self.core.registry.list().await
    }

    pub async fn get_tunnel(&self, script_id: &str) -> Result<TunnelRecord, ServiceError> {
        let script_id = script_id.trim();
        self.core
            .registry
            .lookup_by_script_id(script_id)
            .await
            .ok_or_else(|| ServiceError::TunnelNotFound(script_id.to_string()))
    }

    /// Unpublish one script; releases the tunnel if it was the last one.
    pub async fn delete_tunnel(&self, script_id: &str) -> Result<(), ServiceError> {
        let script_id = script_id.trim();
        let removal = self.core.registry.remove(script_id).await;
        if removal.removed.is_empty() {
            return Err(ServiceError::TunnelNotFound(script_id.to_string()));
        }
        if removal.emptied {
            info!("Last tunnel removed, releasing tunnel");
            self.core.release_if_idle().await;
        }
        Ok(())
    }

    /// Unpublish everything and release the tunnel. Returns how many mappings
    /// were removed; with nothing published the tunnel is left alone.
    pub async fn delete_all(&self) -> usize {
        let _guard = self.core.lifecycle.write().await;
        let count = self.core.registry.clear().await;
        if count > 0 {
            self.core.release_locked().await;
            info!("Deleted {count} active tunnel(s)");
        }
        count
    }

    /// Public dispatch: resolve `token` and run its script.
    pub async fn dispatch(&self, token: &str) -> Result<(String, Value), ServiceError> {
        let Some(script_id) = self.core.registry.lookup_by_token(token).await else {
            debug!("Dispatch for unknown token");
            return Err(ServiceError::InvalidToken);
        };
        match self.controller.invoke(&script_id).await {
            Ok(result) => {
                info!("Script {script_id} executed via public URL");
                Ok((script_id, result))
            }
            Err(e) => {
                warn!("Script {script_id} failed: {e}");
                Err(e.into())
            }
        }
    }

    pub async fn list_scripts(&self) -> Result<Vec<ScriptInfo>, ServiceError> {
        Ok(self.controller.list().await?)
    }

    pub async fn get_script(&self, script_id: &str) -> Result<ScriptInfo, ServiceError> {
        self.controller
            .get(script_id)
            .await?
            .ok_or_else(|| ServiceError::ScriptNotFound(script_id.to_string()))
    }

    /// Never waits on a tunnel start in flight.
    pub async fn status(&self) -> ServiceStatus {
        let tunnel = self.core.supervisor.status();
        ServiceStatus {
            ngrok_configured: self.options.tunneling_configured,
            ha_configured: self.controller.is_configured(),
            tunnel_running: tunnel.running,
            tunnel_starting: tunnel.starting,
            tunnel_warmed_up: tunnel.warmed_up,
            public_url: tunnel.public_url,
            active_tunnels: self.core.registry.count().await,
            reaper: self.reaper.status().await,
        }
    }

    /// Stop the reaper, release the tunnel and forget every mapping.
    pub async fn shutdown(&self) {
        self.reaper.shutdown().await;
        let _guard = self.core.lifecycle.write().await;
        self.core.release_locked().await;
        let cleared = self.core.registry.clear().await;
        info!("Tunnel service shut down ({cleared} mapping(s) dropped)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{service_with, FakeController, FakeLauncher};
    use crate::registry::TOKEN_LEN;

    #[tokio::test(start_paused = true)]
    async fn test_create_without_ttl_is_idempotent() {
        let (svc, launcher, _) = service_with(&["script.morning_routine"]);

        let first = svc.create_tunnel("morning_routine", None).await.unwrap();
        assert!(first.is_new());
        let url = &first.record().complete_url;
        let token = url.rsplit('/').next().unwrap();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(url.starts_with("https://fake.ngrok.app/run/"));

        let second = svc.create_tunnel("morning_routine", None).await.unwrap();
        assert!(!second.is_new());
        assert_eq!(second.record().complete_url, *url);
        assert_eq!(launcher.spawns(), 1);
        assert_eq!(svc.status().await.reaper, ReaperStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_unknown_script() {
        let (svc, launcher, _) = service_with(&[]);
        let err = svc.create_tunnel("nope", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::ScriptNotFound(ref id) if id == "nope"));
        assert_eq!(launcher.spawns(), 0);
        assert!(svc.registry().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_empty_script_id() {
        let (svc, _, _) = service_with(&[]);
        assert!(matches!(
            svc.create_tunnel("  ", None).await,
            Err(ServiceError::EmptyScriptId)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_when_tunneling_unconfigured() {
        let launcher = Arc::new(FakeLauncher::new("https://fake.ngrok.app"));
        let controller = Arc::new(FakeController::with_scripts(&["script.a"]));
        let svc = crate::testing::build_service(&launcher, controller, false, None);
        assert!(matches!(
            svc.create_tunnel("a", None).await,
            Err(ServiceError::TunnelingNotConfigured)
        ));
        assert!(!svc.warm_up().await);
        assert_eq!(launcher.spawns(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_tunnel_start_failure_leaves_registry_untouched() {
        let (svc, launcher, _) = service_with(&["script.a"]);
        launcher.set_ready_after_probes(u32::MAX);
        let err = svc.create_tunnel("a", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::TunnelStart(_)));
        assert!(svc.registry().is_empty().await);
        assert!(!svc.supervisor().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_failure_on_exists() {
        let (svc, _, controller) = service_with(&["script.a"]);
        controller.fail_with(500);
        assert!(matches!(
            svc.create_tunnel("a", None).await,
            Err(ServiceError::Controller(ControllerError::Upstream { status: 500, .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_removes_mapping() {
        let (svc, _, _) = service_with(&["script.away_mode"]);
        let rec = svc.create_tunnel("away_mode", Some(1)).await.unwrap().into_record();
        assert!(rec.expires_at.is_some());
        assert_eq!(svc.status().await.reaper, ReaperStatus::Running);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert!(matches!(
            svc.get_tunnel("away_mode").await,
            Err(ServiceError::TunnelNotFound(_))
        ));
        assert!(!svc.supervisor().is_running());
        assert_eq!(svc.status().await.reaper, ReaperStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_applies() {
        let launcher = Arc::new(FakeLauncher::new("https://fake.ngrok.app"));
        let controller = Arc::new(FakeController::with_scripts(&["script.a"]));
        let svc = crate::testing::build_service(
            &launcher,
            controller,
            true,
            Some(Duration::from_secs(300)),
        );
        let rec = svc.create_tunnel("a", None).await.unwrap().into_record();
        assert_eq!(rec.expires_at, Some(rec.created_at + 300_000));
        let rec = svc.create_tunnel("a", Some(0)).await.unwrap().into_record();
        assert_eq!(rec.expires_at, Some(rec.created_at + 300_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_last_tunnel_releases_once() {
        let (svc, launcher, _) = service_with(&["script.a", "script.b"]);
        svc.create_tunnel("a", None).await.unwrap();
        svc.create_tunnel("b", None).await.unwrap();
        assert!(svc.supervisor().is_running());

        svc.delete_tunnel("a").await.unwrap();
        assert!(svc.supervisor().is_running());
        assert_eq!(launcher.terminations(), 0);

        svc.delete_tunnel("b").await.unwrap();
        assert!(!svc.supervisor().is_running());
        assert_eq!(launcher.terminations(), 1);

        assert!(matches!(
            svc.delete_tunnel("b").await,
            Err(ServiceError::TunnelNotFound(_))
        ));
        assert_eq!(launcher.terminations(), 1);

        // A new create starts a fresh process.
        svc.create_tunnel("a", None).await.unwrap();
        assert_eq!(launcher.spawns(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_all() {
        let (svc, launcher, _) = service_with(&["script.a", "script.b"]);
        assert_eq!(svc.delete_all().await, 0);
        assert_eq!(launcher.stray_sweeps(), 0);

        svc.create_tunnel("a", None).await.unwrap();
        svc.create_tunnel("b", None).await.unwrap();
        assert_eq!(svc.delete_all().await, 2);
        assert!(svc.list_tunnels().await.is_empty());
        assert!(!svc.supervisor().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch() {
        let (svc, _, controller) = service_with(&["script.morning_routine"]);
        let rec = svc
            .create_tunnel("morning_routine", None)
            .await
            .unwrap()
            .into_record();

        let (script_id, _) = svc.dispatch(&rec.routing_token).await.unwrap();
        assert_eq!(script_id, "morning_routine");
        assert_eq!(controller.invocations(), vec!["morning_routine".to_string()]);

        assert!(matches!(
            svc.dispatch("000000000000").await,
            Err(ServiceError::InvalidToken)
        ));

        svc.delete_tunnel("morning_routine").await.unwrap();
        assert!(matches!(
            svc.dispatch(&rec.routing_token).await,
            Err(ServiceError::InvalidToken)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_creates_share_one_process() {
        let (svc, launcher, _) = service_with(&["script.a", "script.b", "script.c"]);
        let svc = Arc::new(svc);
        let handles: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|id| {
                let svc = svc.clone();
                tokio::spawn(async move { svc.create_tunnel(id, None).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(launcher.spawns(), 1);
        let urls: Vec<String> = svc
            .list_tunnels()
            .await
            .into_iter()
            .map(|r| r.public_base_url)
            .collect();
        assert_eq!(urls.len(), 3);
        assert!(urls.iter().all(|u| u == "https://fake.ngrok.app"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_up_then_first_create_reuses() {
        let (svc, launcher, _) = service_with(&["script.a"]);
        assert!(svc.warm_up().await);
        assert!(svc.status().await.tunnel_warmed_up);
        svc.create_tunnel("a", None).await.unwrap();
        assert_eq!(launcher.spawns(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown() {
        let (svc, _, _) = service_with(&["script.a"]);
        svc.create_tunnel("a", Some(10)).await.unwrap();
        svc.shutdown().await;

        let status = svc.status().await;
        assert!(!status.tunnel_running);
        assert_eq!(status.active_tunnels, 0);
        assert_eq!(status.reaper, ReaperStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_timeout_is_rejected() {
        let (svc, launcher, _) = service_with(&["script.a"]);
        for minutes in [u64::MAX, 200_000_000_000_000_000, MAX_TIMEOUT_MINUTES + 1] {
            let err = svc.create_tunnel("a", Some(minutes)).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidTimeout(m) if m == minutes));
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
            assert_eq!(err.code(), "INVALID_TIMEOUT");
        }
        assert_eq!(launcher.spawns(), 0);
        assert!(svc.registry().is_empty().await);

        let rec = svc
            .create_tunnel("a", Some(MAX_TIMEOUT_MINUTES))
            .await
            .unwrap()
            .into_record();
        assert_eq!(
            rec.expires_at,
            Some(rec.created_at + MAX_TIMEOUT_MINUTES * 60_000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_answers_while_tunnel_starts() {
        let (svc, launcher, _) = service_with(&["script.a"]);
        launcher.set_ready_after_probes(u32::MAX);
        let svc = Arc::new(svc);
        let warming = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move { svc.warm_up().await }
        });

        tokio::time::sleep(Duration::from_secs(3)).await;
        let status = tokio::time::timeout(Duration::from_millis(50), svc.status())
            .await
            .expect("status blocked behind tunnel start");
        assert!(status.tunnel_starting);
        assert!(!status.tunnel_running);
        assert!(status.public_url.is_none());

        assert!(!warming.await.unwrap());
        let status = svc.status().await;
        assert!(!status.tunnel_starting);
        assert!(!status.tunnel_running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_needs_an_acquire_in_between() {
        let (svc, launcher, _) = service_with(&["script.a", "script.b"]);
        svc.create_tunnel("a", None).await.unwrap();
        svc.registry().remove("a").await;
        svc.create_tunnel("b", None).await.unwrap();
        svc.registry().remove("b").await;
        assert_eq!(launcher.spawns(), 1);

        assert!(svc.core.release_if_idle().await);
        let sweeps = launcher.stray_sweeps();
        assert!(!svc.core.release_if_idle().await);
        assert_eq!(launcher.terminations(), 1);
        assert_eq!(launcher.stray_sweeps(), sweeps);

        svc.create_tunnel("a", None).await.unwrap();
        svc.registry().remove("a").await;
        assert!(svc.core.release_if_idle().await);
        assert_eq!(launcher.terminations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_id_is_trimmed_everywhere() {
        let (svc, _, _) = service_with(&["script.a"]);
        let rec = svc.create_tunnel(" a ", None).await.unwrap().into_record();
        assert_eq!(rec.script_id, "a");

        assert_eq!(svc.get_tunnel(" a ").await.unwrap().routing_token, rec.routing_token);
        assert_eq!(svc.get_tunnel("a").await.unwrap().routing_token, rec.routing_token);
        svc.delete_tunnel("\ta ").await.unwrap();
        assert!(svc.registry().is_empty().await);
        assert!(!svc.supervisor().is_running());
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ServiceError::InvalidToken.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServiceError::ScriptNotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::TunnelingNotConfigured.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::Controller(ControllerError::NotConfigured).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        let upstream = ServiceError::Controller(ControllerError::Upstream {
            status: 502,
            message: "bad gateway".into(),
        });
        assert_eq!(upstream.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(upstream.code(), "UPSTREAM_ERROR");
        assert_eq!(
            ServiceError::TunnelStart(TunnelStartError::Unresponsive { attempts: 5 }).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripts_passthrough() {
        let (svc, _, _) = service_with(&["script.a"]);
        assert_eq!(svc.list_scripts().await.unwrap().len(), 1);
        assert_eq!(svc.get_script("a").await.unwrap().entity_id, "script.a");
        assert!(matches!(
            svc.get_script("zzz").await,
            Err(ServiceError::ScriptNotFound(_))
        ));
    }
}
