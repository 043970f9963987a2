#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # scriptgate
//!
//! Publishes Home Assistant scripts on the public internet through a single
//! shared ngrok tunnel.
//!
//! A caller asks for a tunnel for a script and gets back an unguessable URL
//! `https://<tunnel>/run/<token>`. Anyone holding that URL can run the script
//! until the mapping is deleted or its TTL runs out. The ngrok subprocess is
//! started on first use (or warmed up at boot) and stopped when the last
//! mapping goes away.
//!
//! ## Subcommands
//!
//! - `scriptgate serve` (default) - run the HTTP server
//!
//! ## API surface
//!
//! | Method | Path                    | Description                              |
//! |--------|-------------------------|------------------------------------------|
//! | GET    | `/`                     | Service info and configuration flags     |
//! | GET    | `/health`               | Liveness probe                           |
//! | POST   | `/tunnels/create`       | Publish a script (also `/create_tunnel`) |
//! | GET    | `/tunnels`              | List mappings                            |
//! | DELETE | `/tunnels`              | Delete every mapping                     |
//! | GET    | `/tunnels/{script_id}`  | One mapping                              |
//! | DELETE | `/tunnels/{script_id}`  | Delete one mapping                       |
//! | GET    | `/run/{token}`          | Public dispatch: run the mapped script   |
//! | GET    | `/scripts`              | Scripts known to Home Assistant          |
//! | GET    | `/scripts/{script_id}`  | One script                               |
//!
//! ## Architecture
//!
//! ```text
//! main.rs          - entry point, clap subcommands, router setup, graceful shutdown
//! config.rs        - TOML + env-var configuration
//! controller.rs    - Home Assistant REST client
//! registry.rs      - forward/reverse mapping indices, token generation
//! reaper.rs        - TTL expiry task (Idle / Running / Stopped)
//! service.rs       - TunnelService: create, lookup, delete, dispatch, shutdown
//! tunnel/
//!   backoff.rs     - readiness-probe schedule
//!   process.rs     - ngrok launcher, status probe, stray-process cleanup
//!   supervisor.rs  - single shared subprocess: acquire / warm-up / release
//! routes/
//!   health.rs      - GET /, GET /health
//!   tunnels.rs     - tunnel CRUD
//!   run.rs         - GET /run/{token}
//!   scripts.rs     - GET /scripts
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use scriptgate::config::{redact, Config};
use scriptgate::{
    AppState, HomeAssistantClient, NgrokLauncher, ServiceOptions, TunnelService,
    TunnelSupervisor,
};

/// Publish Home Assistant scripts through an ngrok tunnel.
#[derive(Parser)]
#[command(name = "scriptgate", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default when no subcommand given).
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Serve) | None => run_server(cli.config.as_deref()).await,
    }
}

#[allow(clippy::too_many_lines)]
async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("scriptgate v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);
    info!("Home Assistant API: {}", config.controller.base_url);

    let mut fatal = false;
    for problem in config.check() {
        if problem.is_fatal() {
            error!("{problem}");
            fatal = true;
        } else {
            warn!("{problem}");
        }
    }
    if fatal {
        std::process::exit(1);
    }
    if let Some(token) = config.controller.token.as_deref() {
        info!("Home Assistant token: {}", redact(token));
    }
    if let Some(token) = config.tunnel.auth_token.as_deref().filter(|t| !t.is_empty()) {
        info!("ngrok auth token: {}", redact(token));
    }

    let controller = Arc::new(HomeAssistantClient::new(
        &config.controller.base_url,
        config.controller.token.clone(),
        Duration::from_secs(config.controller.timeout_secs),
    ));
    let launcher = Arc::new(NgrokLauncher::new(
        config.tunnel.binary.clone(),
        config.tunnel.status_url.clone(),
    ));
    let supervisor = TunnelSupervisor::new(
        launcher,
        config.tunnel.auth_token.clone().filter(|t| !t.is_empty()),
        config.tunnel.backoff(),
        Duration::from_secs(config.tunnel.terminate_grace_secs),
    );
    let options = ServiceOptions {
        local_port: config.forward_port(),
        tunneling_configured: config.tunnel.is_configured(),
        default_ttl: config.registry.default_ttl(),
        reap_interval: Duration::from_secs(config.registry.reap_interval_secs.max(1)),
    };
    info!(
        "Tunnel forwards to port {}, default TTL {:?}",
        options.local_port, options.default_ttl
    );
    let service = Arc::new(TunnelService::new(supervisor, controller.clone(), options));

    // Connectivity check is informational only.
    tokio::spawn({
        let controller = controller.clone();
        async move {
            controller.check_connection().await;
        }
    });

    if config.tunnel.warm_up && config.tunnel.is_configured() {
        let service = service.clone();
        tokio::spawn(async move {
            service.warm_up().await;
        });
    }

    let state = AppState::new(Arc::new(config), service.clone());
    let app = scriptgate::routes::router(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = match TcpListener::bind(&state.config.server.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {e}", state.config.server.listen);
            service.shutdown().await;
            std::process::exit(1);
        }
    };

    info!("Server ready");

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Server error: {e}");
    }

    // Cleanup
    info!("Shutting down...");
    service.shutdown().await;
    info!("Goodbye");
}
