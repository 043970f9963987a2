//! In-memory fakes for the subprocess and controller seams.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::controller::{entity_id, ControllerError, ScriptController, ScriptInfo};
use crate::service::{ServiceOptions, TunnelService};
use crate::tunnel::backoff::ProbeBackoff;
use crate::tunnel::{TunnelLauncher, TunnelProcess, TunnelSupervisor};

#[derive(Default)]
struct LauncherState {
    url: String,
    ready_after: u32,
    exit_on_spawn: Option<String>,
    spawn_fails: bool,
    spawns: u32,
    probes_since_spawn: u32,
    last_port: Option<u16>,
    terminations: u32,
    stray_sweeps: u32,
    current: Option<Arc<AtomicBool>>,
}

/// Scripted [`TunnelLauncher`]. Probes report the URL once the current
/// process is alive and has been probed `ready_after` times.
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    pub fn new(url: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(LauncherState {
                url: url.to_string(),
                ready_after: 1,
                ..LauncherState::default()
            })),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut LauncherState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_url(&self, url: &str) {
        self.with(|s| s.url = url.to_string());
    }

    pub fn set_ready_after_probes(&self, probes: u32) {
        self.with(|s| s.ready_after = probes);
    }

    pub fn set_exit_on_spawn(&self, status: Option<&str>) {
        self.with(|s| s.exit_on_spawn = status.map(String::from));
    }

    pub fn set_spawn_fails(&self, fails: bool) {
        self.with(|s| s.spawn_fails = fails);
    }

    /// Simulate the current process dying on its own.
    pub fn kill_current(&self) {
        self.with(|s| {
            if let Some(alive) = &s.current {
                alive.store(false, Ordering::SeqCst);
            }
        });
    }

    pub fn spawns(&self) -> u32 {
        self.with(|s| s.spawns)
    }

    pub fn last_port(&self) -> Option<u16> {
        self.with(|s| s.last_port)
    }

    pub fn terminations(&self) -> u32 {
        self.with(|s| s.terminations)
    }

    pub fn stray_sweeps(&self) -> u32 {
        self.with(|s| s.stray_sweeps)
    }
}

#[async_trait]
impl TunnelLauncher for FakeLauncher {
    fn spawn(
        &self,
        local_port: u16,
        _auth_token: Option<&str>,
    ) -> std::io::Result<Box<dyn TunnelProcess>> {
        self.with(|s| {
            if s.spawn_fails {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "ngrok: not found",
                ));
            }
            s.spawns += 1;
            s.probes_since_spawn = 0;
            s.last_port = Some(local_port);
            let alive = Arc::new(AtomicBool::new(s.exit_on_spawn.is_none()));
            s.current = Some(alive.clone());
            Ok(Box::new(FakeProcess {
                pid: 1000 + s.spawns,
                alive,
                exit_status: s.exit_on_spawn.clone(),
                launcher: Arc::clone(&self.state),
            }) as Box<dyn TunnelProcess>)
        })
    }

    async fn probe(&self) -> Option<String> {
        self.with(|s| {
            let alive = s
                .current
                .as_ref()
                .is_some_and(|a| a.load(Ordering::SeqCst));
            if !alive {
                return None;
            }
            s.probes_since_spawn = s.probes_since_spawn.saturating_add(1);
            (s.probes_since_spawn >= s.ready_after).then(|| s.url.clone())
        })
    }

    async fn kill_strays(&self) -> usize {
        self.with(|s| s.stray_sweeps += 1);
        0
    }
}

struct FakeProcess {
    pid: u32,
    alive: Arc<AtomicBool>,
    exit_status: Option<String>,
    launcher: Arc<Mutex<LauncherState>>,
}

#[async_trait]
impl TunnelProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn exit_status(&mut self) -> Option<String> {
        if self.alive.load(Ordering::SeqCst) {
            None
        } else {
            Some(
                self.exit_status
                    .clone()
                    .unwrap_or_else(|| "signal: 15 (SIGTERM)".to_string()),
            )
        }
    }

    async fn stderr_tail(&mut self) -> String {
        if self.exit_status.is_some() {
            "ERROR: authentication failed: invalid authtoken".to_string()
        } else {
            String::new()
        }
    }

    async fn terminate(&mut self, _grace: Duration) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.launcher.lock().unwrap().terminations += 1;
        }
    }
}

#[derive(Default)]
struct ControllerState {
    scripts: BTreeSet<String>,
    configured: bool,
    fail_status: Option<u16>,
    invocations: Vec<String>,
}

/// [`ScriptController`] over a fixed set of script entity ids.
pub struct FakeController {
    state: Mutex<ControllerState>,
}

impl FakeController {
    pub fn with_scripts(entity_ids: &[&str]) -> Self {
        Self {
            state: Mutex::new(ControllerState {
                scripts: entity_ids.iter().map(|s| (*s).to_string()).collect(),
                configured: true,
                ..ControllerState::default()
            }),
        }
    }

    pub fn set_configured(&self, configured: bool) {
        self.state.lock().unwrap().configured = configured;
    }

    /// Make every subsequent call fail with an upstream `status`.
    pub fn fail_with(&self, status: u16) {
        self.state.lock().unwrap().fail_status = Some(status);
    }

    /// Script ids passed to `invoke`, in call order.
    pub fn invocations(&self) -> Vec<String> {
        self.state.lock().unwrap().invocations.clone()
    }

    fn check(&self) -> Result<(), ControllerError> {
        let state = self.state.lock().unwrap();
        if !state.configured {
            return Err(ControllerError::NotConfigured);
        }
        match state.fail_status {
            Some(status) => Err(ControllerError::Upstream {
                status,
                message: "Internal Server Error".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn info(entity: &str) -> ScriptInfo {
        ScriptInfo {
            entity_id: entity.to_string(),
            name: entity.to_string(),
            state: Some("off".to_string()),
            attributes: json!({}),
        }
    }
}

#[async_trait]
impl ScriptController for FakeController {
    fn is_configured(&self) -> bool {
        self.state.lock().unwrap().configured
    }

    async fn exists(&self, script_id: &str) -> Result<bool, ControllerError> {
        Ok(self.get(script_id).await?.is_some())
    }

    async fn invoke(&self, script_id: &str) -> Result<Value, ControllerError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        if !state.scripts.contains(&entity_id(script_id)) {
            return Err(ControllerError::Upstream {
                status: 400,
                message: format!("Unable to find service script.{script_id}"),
            });
        }
        state.invocations.push(script_id.to_string());
        Ok(json!([]))
    }

    async fn list(&self) -> Result<Vec<ScriptInfo>, ControllerError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.scripts.iter().map(|e| Self::info(e)).collect())
    }

    async fn get(&self, script_id: &str) -> Result<Option<ScriptInfo>, ControllerError> {
        self.check()?;
        let entity = entity_id(script_id);
        let state = self.state.lock().unwrap();
        Ok(state.scripts.contains(&entity).then(|| Self::info(&entity)))
    }
}

pub const FORWARD_PORT: u16 = 8099;

pub fn build_service(
    launcher: &Arc<FakeLauncher>,
    controller: Arc<FakeController>,
    tunneling_configured: bool,
    default_ttl: Option<Duration>,
) -> TunnelService {
    let supervisor = TunnelSupervisor::new(
        launcher.clone(),
        Some("test-token".to_string()),
        ProbeBackoff::default(),
        Duration::from_millis(10),
    );
    TunnelService::new(
        supervisor,
        controller,
        ServiceOptions {
            local_port: FORWARD_PORT,
            tunneling_configured,
            default_ttl,
            reap_interval: Duration::from_secs(60),
        },
    )
}

/// Configured service over fakes, with `scripts` known to the controller.
pub fn service_with(scripts: &[&str]) -> (TunnelService, Arc<FakeLauncher>, Arc<FakeController>) {
    let launcher = Arc::new(FakeLauncher::new("https://fake.ngrok.app"));
    let controller = Arc::new(FakeController::with_scripts(scripts));
    let service = build_service(&launcher, controller.clone(), true, None);
    (service, launcher, controller)
}
