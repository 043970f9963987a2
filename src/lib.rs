#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! scriptgate library - the building blocks of the script publisher.
//!
//! - `config` - configuration loading
//! - `controller` - Home Assistant REST client
//! - `tunnel` - ngrok subprocess supervision
//! - `registry` - script ↔ routing-token mappings
//! - `reaper` - background expiry of mappings
//! - `service` - the tunnel service composing all of the above
//! - `routes` - REST API route handlers

pub mod config;
pub mod controller;
pub mod reaper;
pub mod registry;
pub mod routes;
pub mod service;
pub mod state;
pub mod tunnel;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use controller::{HomeAssistantClient, ScriptController};
pub use registry::{MappingRegistry, TunnelRecord};
pub use service::{ServiceError, ServiceOptions, TunnelService};
pub use state::AppState;
pub use tunnel::{NgrokLauncher, TunnelSupervisor};
