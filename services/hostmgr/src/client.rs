//! Outbound RPC client for the external cluster manager.
//!
//! Launch, kill, reserve, and shutdown calls all carry a bounded timeout.
//! The kill and shutdown paths take an optional token bucket; a bucket
//! rejection surfaces as [`ClusterError::ResourceExhausted`] so callers can
//! back off instead of flooding the cluster manager.

use std::sync::Arc;
use std::time::Duration;

use armada_api::rpc::{
    KillTasksRequest, LaunchableTask, ReserveHostRequest, ShutdownExecutorEntry,
    ShutdownExecutorsRequest,
};
use armada_id::{HostOfferId, RunId};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::ratelimit::TokenBucket;

/// Errors from cluster-manager calls.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The cluster manager is unreachable or timed out; retry with backoff.
    #[error("cluster manager unavailable: {0}")]
    Unavailable(String),

    /// The cluster manager rejected the request.
    #[error("cluster manager rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    /// A local rate limit rejected the call before it was sent.
    #[error("rate limit exceeded for {operation}")]
    ResourceExhausted { operation: String },
}

impl ClusterError {
    /// Whether a retry with backoff can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::ResourceExhausted { .. }
        )
    }
}

/// The narrow RPC surface armada consumes from the cluster manager.
#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Launches tasks against previously claimed offers. On success the
    /// offers are consumed by the cluster manager.
    async fn launch_tasks(
        &self,
        hostname: &str,
        host_offer_id: HostOfferId,
        tasks: &[LaunchableTask],
    ) -> Result<(), ClusterError>;

    async fn kill_tasks(&self, run_ids: &[RunId]) -> Result<(), ClusterError>;

    async fn shutdown_executors(
        &self,
        entries: &[ShutdownExecutorEntry],
    ) -> Result<(), ClusterError>;

    /// Reserves resources and creates the persistent volume in one accept
    /// call, for stateful launches.
    async fn reserve_resources(&self, request: &ReserveHostRequest) -> Result<(), ClusterError>;
}

/// HTTP implementation of [`ClusterManager`].
pub struct HttpClusterManager {
    client: reqwest::Client,
    base_url: String,
    kill_limiter: Option<Arc<TokenBucket>>,
}

impl HttpClusterManager {
    /// Creates a client against `base_url` with the given per-call timeout.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        kill_limiter: Option<Arc<TokenBucket>>,
    ) -> Result<Self, ClusterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClusterError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            kill_limiter,
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
    ) -> Result<(), ClusterError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(operation, url = %url, "Cluster manager call");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClusterError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            error!(operation, status = %status, message = %message, "Cluster manager rejected call");
            return Err(ClusterError::Rejected {
                operation: operation.to_string(),
                message: format!("{status}: {message}"),
            });
        }

        Ok(())
    }

    fn check_kill_budget(&self, operation: &str, n: u32) -> Result<(), ClusterError> {
        if let Some(limiter) = &self.kill_limiter {
            if !limiter.try_acquire(n) {
                return Err(ClusterError::ResourceExhausted {
                    operation: operation.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterManager for HttpClusterManager {
    async fn launch_tasks(
        &self,
        hostname: &str,
        host_offer_id: HostOfferId,
        tasks: &[LaunchableTask],
    ) -> Result<(), ClusterError> {
        #[derive(Serialize)]
        struct LaunchBody<'a> {
            hostname: &'a str,
            host_offer_id: HostOfferId,
            tasks: &'a [LaunchableTask],
        }
        self.post(
            "launch_tasks",
            "/v1/launch",
            &LaunchBody {
                hostname,
                host_offer_id,
                tasks,
            },
        )
        .await
    }

    async fn kill_tasks(&self, run_ids: &[RunId]) -> Result<(), ClusterError> {
        self.check_kill_budget("kill_tasks", run_ids.len() as u32)?;
        self.post(
            "kill_tasks",
            "/v1/kill",
            &KillTasksRequest {
                run_ids: run_ids.to_vec(),
            },
        )
        .await
    }

    async fn shutdown_executors(
        &self,
        entries: &[ShutdownExecutorEntry],
    ) -> Result<(), ClusterError> {
        self.check_kill_budget("shutdown_executors", entries.len() as u32)?;
        self.post(
            "shutdown_executors",
            "/v1/shutdown",
            &ShutdownExecutorsRequest {
                entries: entries.to_vec(),
            },
        )
        .await
    }

    async fn reserve_resources(&self, request: &ReserveHostRequest) -> Result<(), ClusterError> {
        self.post("reserve_resources", "/v1/reserve", request).await
    }
}
