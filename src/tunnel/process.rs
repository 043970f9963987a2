//! The tunneling subprocess as an opaque resource.
//!
//! [`TunnelLauncher`] is the seam between the [`super::supervisor`] and the
//! outside world: it spawns the binary, polls its local status API, and reaps
//! strays left behind by a previous run. [`NgrokLauncher`] is the production
//! implementation; tests substitute a fake.
//!
//! Spawned children have `kill_on_drop(true)`, so a dropped handle never
//! leaves a process behind.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bytes of stderr kept from the end of a subprocess's output.
const MAX_STDERR: usize = 4096;

/// Spawns, probes and cleans up the tunneling binary.
#[async_trait]
pub trait TunnelLauncher: Send + Sync {
    /// Start a subprocess forwarding `local_port`.
    fn spawn(
        &self,
        local_port: u16,
        auth_token: Option<&str>,
    ) -> std::io::Result<Box<dyn TunnelProcess>>;

    /// Ask the local status API for the current public URL. `None` while the
    /// API is unreachable or reports no tunnel yet.
    async fn probe(&self) -> Option<String>;

    /// Terminate every process running the tunneling binary. Returns how many
    /// were signalled.
    async fn kill_strays(&self) -> usize;
}

/// A running tunneling subprocess.
#[async_trait]
pub trait TunnelProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// `Some(description)` once the process has exited.
    fn exit_status(&mut self) -> Option<String>;

    /// Captured stderr of an exited process (best-effort, capped).
    async fn stderr_tail(&mut self) -> String;

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    async fn terminate(&mut self, grace: Duration);
}

/// Launches `ngrok http <port> --log=stdout` and polls `/api/tunnels`.
pub struct NgrokLauncher {
    binary: String,
    status_url: String,
    http: reqwest::Client,
}

impl NgrokLauncher {
    pub fn new(binary: String, status_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            binary,
            status_url,
            http,
        }
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    tunnels: Vec<StatusTunnel>,
}

#[derive(Deserialize)]
struct StatusTunnel {
    public_url: Option<String>,
}

/// Pick the public URL to hand out: `https` preferred, otherwise the first one.
fn select_public_url(body: &str) -> Option<String> {
    let status: StatusResponse = serde_json::from_str(body).ok()?;
    let urls: Vec<String> = status
        .tunnels
        .into_iter()
        .filter_map(|t| t.public_url)
        .filter(|u| !u.is_empty())
        .collect();
    urls.iter()
        .find(|u| u.starts_with("https://"))
        .or_else(|| urls.first())
        .cloned()
}

#[async_trait]
impl TunnelLauncher for NgrokLauncher {
    fn spawn(
        &self,
        local_port: u16,
        auth_token: Option<&str>,
    ) -> std::io::Result<Box<dyn TunnelProcess>> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("http")
            .arg(local_port.to_string())
            .arg("--log=stdout")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = auth_token {
            cmd.env("NGROK_AUTHTOKEN", token);
        }
        let child = cmd.spawn()?;
        info!(
            "Spawned {} (pid {:?}) forwarding port {local_port}",
            self.binary,
            child.id()
        );
        Ok(Box::new(ChildProcess::new(child)))
    }

    async fn probe(&self) -> Option<String> {
        let resp = match self.http.get(&self.status_url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Tunnel status API not available: {e}");
                return None;
            }
        };
        if !resp.status().is_success() {
            debug!("Tunnel status API returned {}", resp.status());
            return None;
        }
        let body = resp.text().await.ok()?;
        select_public_url(&body)
    }

    async fn kill_strays(&self) -> usize {
        kill_by_name(&self.binary, Duration::from_secs(1)).await
    }
}

/// Production [`TunnelProcess`] backed by a tokio child.
///
/// Stderr is drained for the life of the process so the child never blocks
/// on a full pipe; only the last [`MAX_STDERR`] bytes are kept.
struct ChildProcess {
    child: Child,
    stderr: Arc<Mutex<VecDeque<u8>>>,
    drain: Option<JoinHandle<()>>,
}

impl ChildProcess {
    fn new(mut child: Child) -> Self {
        let stderr = Arc::new(Mutex::new(VecDeque::with_capacity(MAX_STDERR)));
        let drain = child.stderr.take().map(|pipe| {
            let tail = Arc::clone(&stderr);
            tokio::spawn(drain_stderr(pipe, tail))
        });
        Self {
            child,
            stderr,
            drain,
        }
    }
}

async fn drain_stderr(mut pipe: ChildStderr, tail: Arc<Mutex<VecDeque<u8>>>) {
    let mut buf = [0u8; 1024];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                tail.extend(&buf[..n]);
                let excess = tail.len().saturating_sub(MAX_STDERR);
                tail.drain(..excess);
            }
        }
    }
}

#[async_trait]
impl TunnelProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn exit_status(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("wait failed: {e}")),
        }
    }

    async fn stderr_tail(&mut self) -> String {
        if let Some(mut drain) = self.drain.take() {
            if tokio::time::timeout(Duration::from_millis(500), &mut drain)
                .await
                .is_err()
            {
                debug!("Timed out waiting for tunnel stderr to close");
                self.drain = Some(drain);
            }
        }
        let tail = self.stderr.lock().unwrap_or_else(PoisonError::into_inner);
        let bytes: Vec<u8> = tail.iter().copied().collect();
        String::from_utf8_lossy(&bytes).trim().to_string()
    }

    async fn terminate(&mut self, grace: Duration) {
        if self.exit_status().is_some() {
            return;
        }
        if let Some(pid) = self.child.id() {
            #[allow(clippy::cast_possible_wrap)]
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
            warn!("Tunnel process ignored SIGTERM for {grace:?}, sending SIGKILL");
            let _ = self.child.kill().await;
        }
    }
}

/// PIDs whose executable basename equals `name`, excluding this process.
///
/// Reads `/proc/*/cmdline`; returns nothing on systems without procfs.
pub fn find_pids_by_name(name: &str) -> Vec<u32> {
    let wanted = basename(name);
    let own = std::process::id();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
        .filter(|&pid| pid != own)
        .filter(|pid| {
            std::fs::read(format!("/proc/{pid}/cmdline"))
                .ok()
                .and_then(|bytes| {
                    // cmdline is NUL-separated; first arg is the executable
                    let exe = bytes.split(|&b| b == 0).next()?;
                    let exe = std::str::from_utf8(exe).ok()?;
                    Some(basename(exe) == wanted)
                })
                .unwrap_or(false)
        })
        .collect()
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// SIGTERM every process named `name`, wait `grace`, SIGKILL survivors.
pub async fn kill_by_name(name: &str, grace: Duration) -> usize {
    let pids = find_pids_by_name(name);
    if pids.is_empty() {
        return 0;
    }
    for &pid in &pids {
        #[allow(clippy::cast_possible_wrap)]
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    info!("Sent SIGTERM to {} stray {name} process(es)", pids.len());

    let deadline = tokio::time::Instant::now() + grace;
    loop {
        #[allow(clippy::cast_possible_wrap)]
        let alive: Vec<u32> = pids
            .iter()
            .copied()
            .filter(|&pid| unsafe { libc::kill(pid as i32, 0) } == 0)
            .collect();
        if alive.is_empty() {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            for pid in alive {
                #[allow(clippy::cast_possible_wrap)]
                unsafe {
                    libc::kill(pid as i32, libc::SIGKILL);
                }
                info!("Stray {name} PID {pid} required SIGKILL");
            }
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    pids.len()
}
