//! `taskboard-server`: in-memory REST task server.
//!
//! Serves `/api/v1/tasks` for the `taskboard` client.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 127.0.0.1:8080
//! cargo run --bin taskboard-server
//!
//! # Run on custom address
//! cargo run --bin taskboard-server -- --bind 0.0.0.0:9000
//!
//! # Or via environment variable
//! TASKBOARD_ADDR=0.0.0.0:9000 cargo run --bin taskboard-server
//! ```

use std::sync::Arc;

use clap::Parser;
use taskboard_server::api::{self, AppState};
use taskboard_server::config::{ServerCliArgs, ServerConfig};
use taskboard_server::store::TaskStore;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting taskboard server");

    let state = Arc::new(AppState::with_limits(
        TaskStore::new(),
        config.limits.default_limit(),
        config.limits.max_limit(),
    ));

    match api::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "task server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "task server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start task server");
            std::process::exit(1);
        }
    }
}
