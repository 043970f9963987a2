//! Tunnel subprocess supervision.
//!
//! - [`process`] - the launcher/process seam and the ngrok implementation
//! - [`supervisor`] - single shared subprocess: acquire, warm-up, release
//! - [`backoff`] - readiness-probe schedule

pub mod backoff;
pub mod process;
pub mod supervisor;

pub use process::{NgrokLauncher, TunnelLauncher, TunnelProcess};
pub use supervisor::{TunnelStartError, TunnelStatus, TunnelSupervisor};
