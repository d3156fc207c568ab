//! Armada host manager daemon.
//!
//! Ingests resource offers from the cluster manager, maintains per-host
//! summaries, and serves the acquire / claim / launch surface used by the
//! job manager.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use armada_hostmgr::client::HttpClusterManager;
use armada_hostmgr::config::Config;
use armada_hostmgr::pool::{OfferPool, PoolConfig};
use armada_hostmgr::ratelimit::TokenBucket;
use armada_hostmgr::state::AppState;
use armada_hostmgr::summary::SummaryConfig;
use armada_hostmgr::api;
use armada_hostmgr::sweeper::Sweeper;

fn chrono_duration(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::seconds(300))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting armada host manager");

    let config = Config::from_env()?;
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    let pool = Arc::new(OfferPool::new(PoolConfig {
        summary: SummaryConfig {
            placing_timeout: chrono_duration(config.placing_timeout),
            held_timeout: chrono_duration(config.held_timeout),
            scarce_resource_types: config.scarce_resource_types.clone(),
        },
        offer_hold_time: chrono_duration(config.offer_hold_time),
        ranker: config.ranker,
    }));

    let kill_limiter = if config.kill_rate_per_sec > 0.0 {
        Some(Arc::new(TokenBucket::new(
            config.kill_rate_per_sec,
            config.kill_rate_burst,
        )))
    } else {
        None
    };

    let cluster = Arc::new(HttpClusterManager::new(
        config.cluster_manager_url.clone(),
        config.cluster_manager_timeout,
        kill_limiter,
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = Sweeper::new(Arc::clone(&pool), config.sweep_interval);
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(shutdown_rx).await;
    });

    let state = AppState::new(pool, cluster);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;

    Ok(())
}
