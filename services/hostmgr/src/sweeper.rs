//! Background sweep over the offer pool.
//!
//! Runs on a fixed interval and expires placing statuses, held-task
//! entries, and offers past their hold time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::pool::OfferPool;

/// Pool sweeper running until shutdown is signaled.
pub struct Sweeper {
    pool: Arc<OfferPool>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(pool: Arc<OfferPool>, interval: Duration) -> Self {
        Self { pool, interval }
    }

    /// Runs the sweep loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting offer pool sweeper"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let expired = self.pool.sweep(Utc::now());
                    if !expired.is_empty() {
                        debug!(expired_holds = expired.len(), "Sweep released expired holds");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}
