mod api;
mod comlog;
mod config;
mod hardware;
mod heartbeat;
mod identity;
mod probe;
mod proxy;
mod settings;
mod state;
mod stats;
mod update;
mod workflows;

#[cfg(test)]
mod surface_tests;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{AgentArgs, AgentConfig, HEARTBEAT_INTERVAL_SECS, UPDATE_CHECK_EVERY_N_HEARTBEATS};
use crate::identity::NodeIdentity;
use crate::state::AgentState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "node_agent=info,tower_http=info".into()),
        )
        .init();

    let args = AgentArgs::parse();
    let config = AgentConfig::from_args(args)?;
    info!(
        version = config::AGENT_VERSION,
        port = config.port,
        llm_port = config.llm_port,
        render_port = config.render_port,
        server = config.server.as_deref().unwrap_or("none"),
        "Starting node agent"
    );

    let identity = NodeIdentity::detect(config.port, &config.data_dir);
    let state = AgentState::new(config, identity);

    // Self-update on startup, unless suppressed. A successful apply
    // replaces this process and never returns.
    if state.config.server.is_some() && !state.config.no_update {
        match state.updater.check_and_apply().await {
            Ok(true) => state.updater.restart(),
            Ok(false) => info!("Agent is up to date"),
            Err(e) => warn!(error = %e, "Startup update check failed"),
        }
    }

    spawn_background_loop(state.clone());

    let app = api::routes(state.clone())
        .layer(TraceLayer::new_for_http())
        // The agent is a LAN-internal control plane; every caller is allowed.
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "HTTP surface listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// One timer task drives the whole background cadence: probe the local
/// services, publish a heartbeat, and run the periodic update check every
/// Nth tick. The first tick fires immediately so state is populated before
/// the first orchestrator poll.
fn spawn_background_loop(state: Arc<AgentState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        let mut ticks: u64 = 0;

        loop {
            interval.tick().await;
            ticks += 1;

            probe::run_cycle(&state).await;
            heartbeat::send(&state).await;

            if state.config.server.is_some()
                && !state.config.no_update
                && ticks % UPDATE_CHECK_EVERY_N_HEARTBEATS == 0
            {
                match state.updater.check_and_apply().await {
                    Ok(true) => state.updater.restart(),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Periodic update check failed"),
                }
            }
        }
    });
}
