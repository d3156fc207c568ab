//! Configuration for the host manager.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::pool::RankerKind;

/// Host manager configuration, loaded from `ARMADA_*` environment
/// variables with development-friendly defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on for HTTP connections.
    pub listen_addr: SocketAddr,

    /// Base URL of the external cluster manager.
    pub cluster_manager_url: String,

    /// Timeout for outbound cluster-manager calls.
    pub cluster_manager_timeout: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// How long a host may sit in Placing before the sweep reverts it.
    pub placing_timeout: Duration,

    /// How long a held-for-task entry survives without a launch.
    pub held_timeout: Duration,

    /// How long an unclaimed offer is kept.
    pub offer_hold_time: Duration,

    /// Sweep interval.
    pub sweep_interval: Duration,

    /// Resource types exclusive to demand that requests them.
    pub scarce_resource_types: Vec<String>,

    /// Host ranking for acquisition.
    pub ranker: RankerKind,

    /// Kill calls allowed per second; 0 disables the limiter.
    pub kill_rate_per_sec: f64,

    /// Kill-limiter burst size.
    pub kill_rate_burst: u32,
}

fn env_secs(key: &str, default_secs: u64) -> Result<Duration> {
    match std::env::var(key) {
        Ok(value) => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("{key} must be an integer number of seconds"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default_secs)),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("ARMADA_HOSTMGR_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8580".to_string())
            .parse()?;

        let cluster_manager_url = std::env::var("ARMADA_CLUSTER_MANAGER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8590".to_string());

        let log_level = std::env::var("ARMADA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let scarce_resource_types = std::env::var("ARMADA_SCARCE_RESOURCE_TYPES")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| vec!["gpu".to_string()]);

        let ranker = std::env::var("ARMADA_HOST_RANKER")
            .ok()
            .and_then(|v| RankerKind::parse(&v))
            .unwrap_or_default();

        let kill_rate_per_sec = std::env::var("ARMADA_KILL_RATE_PER_SEC")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);

        let kill_rate_burst = std::env::var("ARMADA_KILL_RATE_BURST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(16);

        Ok(Self {
            listen_addr,
            cluster_manager_url,
            cluster_manager_timeout: env_secs("ARMADA_CLUSTER_MANAGER_TIMEOUT_SECS", 10)?,
            log_level,
            placing_timeout: env_secs("ARMADA_PLACING_TIMEOUT_SECS", 300)?,
            held_timeout: env_secs("ARMADA_HELD_TIMEOUT_SECS", 180)?,
            offer_hold_time: env_secs("ARMADA_OFFER_HOLD_TIME_SECS", 600)?,
            sweep_interval: env_secs("ARMADA_SWEEP_INTERVAL_SECS", 10)?,
            scarce_resource_types,
            ranker,
            kill_rate_per_sec,
            kill_rate_burst,
        })
    }
}
