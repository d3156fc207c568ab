//! Armada job manager daemon.
//!
//! Boot order: store, cache, goal-state driver, recovery, placement
//! driver, then the HTTP surface.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use armada_jobmgr::api;
use armada_jobmgr::cache::JobCache;
use armada_jobmgr::config::Config;
use armada_jobmgr::goalstate::{Driver, DriverConfig};
use armada_jobmgr::hostclient::HttpHostManager;
use armada_jobmgr::placement::{BatchStrategy, PlacementConfig, PlacementDriver};
use armada_jobmgr::recovery::{recover_active_jobs, RecoveryConfig};
use armada_jobmgr::state::AppState;
use armada_jobmgr::storage::{PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting armada job manager");

    let config = Config::from_env()?;
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    let pg = match PgStore::connect(&config.database_url, config.database_max_connections).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to connect to store");
            return Err(anyhow::anyhow!(e));
        }
    };
    if config.dev_mode {
        info!("Running store migrations (dev mode)");
        pg.run_migrations().await?;
    }
    let store: Arc<dyn Store> = Arc::new(pg);

    let cache = Arc::new(JobCache::new(Arc::clone(&store)));
    let hosts: Arc<dyn armada_jobmgr::hostclient::HostManagerClient> = Arc::new(
        HttpHostManager::new(config.hostmgr_url.clone(), config.hostmgr_timeout)?,
    );

    let driver_config = DriverConfig {
        job_runtime_calculation_via_cache: config.job_runtime_calculation_via_cache,
        stale_job_state_duration: chrono::Duration::seconds(config.stale_job_state_secs as i64),
        ..DriverConfig::default()
    };
    let driver = Driver::new(
        Arc::clone(&cache),
        Arc::clone(&store),
        Arc::clone(&hosts),
        driver_config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = driver.start(shutdown_rx.clone());

    recover_active_jobs(
        Arc::clone(&store),
        Arc::clone(&cache),
        Arc::clone(&driver),
        RecoveryConfig::default(),
    )
    .await?;

    let placement = PlacementDriver::new(
        Arc::clone(&driver),
        Arc::new(BatchStrategy),
        PlacementConfig {
            interval: config.placement_interval,
            ..PlacementConfig::default()
        },
    );
    let placement_shutdown = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        placement.run(placement_shutdown).await;
    }));

    let state = AppState::new(store, cache, driver, hosts);
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
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
