//! Arena Sync - multiplayer session and avatar replication
//!
//! Runs a set of in-process participants against a loopback relay hub:
//! - Session lifecycle: connect, lobby, room, spawn
//! - Avatar replication with snapshot sync and remote interpolation
//! - Owner-authoritative combat with kill credit and respawn
//! - Optional HTTP status endpoints

mod app;
mod combat;
mod config;
mod http;
mod peer;
mod replica;
mod session;
mod transport;
mod util;

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::peer::Peer;
use crate::replica::IdleMotion;
use crate::util::time::init_server_time;

/// Delay between demo peers joining
const JOIN_STAGGER: Duration = Duration::from_millis(250);
/// How often a demo peer shoots at someone
const AUTO_FIRE_EVERY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize uptime tracking
    init_server_time();

    info!(
        version = %config.game_version,
        room = %config.room_name,
        peers = config.demo_peers,
        "Starting Arena Sync"
    );

    let state = AppState::new(config.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::with_capacity(config.demo_peers);
    for index in 0..config.demo_peers {
        let peer = Peer::new(
            format!("peer-{}", index),
            state.hub.endpoint(),
            &config,
            Box::new(IdleMotion::new(index as f32)),
            index as u64,
        )
        .with_auto_fire(AUTO_FIRE_EVERY);
        state.register_peer(peer.status_handle());

        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(JOIN_STAGGER * index as u32).await;
            peer.run(shutdown).await;
        }));
    }

    match config.status_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr).await?;
            info!("Status server listening on {}", addr);
            info!("Health check: http://{}/health", addr);

            axum::serve(listener, build_router(state))
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        None => shutdown_signal().await,
    }

    // Peers leave their rooms before we exit
    let _ = shutdown_tx.send(true);
    for task in tasks {
        task.await?;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
