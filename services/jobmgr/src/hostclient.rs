//! Host manager API client.
//!
//! The placement driver and task actions reach the host manager through
//! this trait; tests substitute a scripted implementation.

use std::time::Duration;

use armada_api::rpc::{
    AcquireHostOffersRequest, AcquireHostOffersResponse, KillAndReserveEntry,
    KillAndReserveTasksRequest, KillTasksRequest, LaunchTasksRequest, LaunchableTask,
    ReleaseHostOffersRequest, ShutdownExecutorEntry, ShutdownExecutorsRequest,
};
use armada_api::{HostFilter, HostOffer};
use armada_id::{HostOfferId, RunId, TaskId};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

/// Errors from host manager calls.
#[derive(Debug, Error)]
pub enum HostClientError {
    /// The host manager is unreachable or timed out.
    #[error("host manager unavailable: {0}")]
    Unavailable(String),

    /// The host manager rejected the request.
    #[error("host manager rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    /// The host manager's rate limiter pushed back.
    #[error("host manager rate limited {operation}")]
    RateLimited { operation: String },
}

impl HostClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::RateLimited { .. })
    }
}

/// The host manager surface the job manager consumes.
#[async_trait]
pub trait HostManagerClient: Send + Sync {
    async fn acquire_host_offers(
        &self,
        filter: &HostFilter,
    ) -> Result<AcquireHostOffersResponse, HostClientError>;

    async fn release_host_offers(&self, host_offers: &[HostOffer]) -> Result<(), HostClientError>;

    async fn launch_tasks(
        &self,
        hostname: &str,
        host_offer_id: HostOfferId,
        tasks: Vec<LaunchableTask>,
    ) -> Result<(), HostClientError>;

    async fn kill_tasks(&self, run_ids: &[RunId]) -> Result<(), HostClientError>;

    async fn kill_and_reserve_tasks(
        &self,
        entries: &[KillAndReserveEntry],
    ) -> Result<(), HostClientError>;

    async fn shutdown_executors(
        &self,
        entries: &[ShutdownExecutorEntry],
    ) -> Result<(), HostClientError>;

    async fn release_hold(&self, task_id: TaskId) -> Result<(), HostClientError>;
}

/// HTTP implementation against the host manager's v1 surface.
pub struct HttpHostManager {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHostManager {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, HostClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HostClientError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, HostClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(operation, url = %url, "Host manager call");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| HostClientError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(HostClientError::RateLimited {
                operation: operation.to_string(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!(operation, status = %status, message = %message, "Host manager rejected call");
            return Err(HostClientError::Rejected {
                operation: operation.to_string(),
                message: format!("{status}: {message}"),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl HostManagerClient for HttpHostManager {
    async fn acquire_host_offers(
        &self,
        filter: &HostFilter,
    ) -> Result<AcquireHostOffersResponse, HostClientError> {
        let response = self
            .post(
                "acquire_host_offers",
                "/v1/offers/acquire",
                &AcquireHostOffersRequest {
                    filter: filter.clone(),
                },
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| HostClientError::Unavailable(e.to_string()))
    }

    async fn release_host_offers(&self, host_offers: &[HostOffer]) -> Result<(), HostClientError> {
        self.post(
            "release_host_offers",
            "/v1/offers/release",
            &ReleaseHostOffersRequest {
                host_offers: host_offers.to_vec(),
            },
        )
        .await?;
        Ok(())
    }

    async fn launch_tasks(
        &self,
        hostname: &str,
        host_offer_id: HostOfferId,
        tasks: Vec<LaunchableTask>,
    ) -> Result<(), HostClientError> {
        self.post(
            "launch_tasks",
            "/v1/offers/launch",
            &LaunchTasksRequest {
                hostname: hostname.to_string(),
                host_offer_id,
                tasks,
            },
        )
        .await?;
        Ok(())
    }

    async fn kill_tasks(&self, run_ids: &[RunId]) -> Result<(), HostClientError> {
        self.post(
            "kill_tasks",
            "/v1/offers/kill",
            &KillTasksRequest {
                run_ids: run_ids.to_vec(),
            },
        )
        .await?;
        Ok(())
    }

    async fn kill_and_reserve_tasks(
        &self,
        entries: &[KillAndReserveEntry],
    ) -> Result<(), HostClientError> {
        self.post(
            "kill_and_reserve_tasks",
            "/v1/offers/kill-reserve",
            &KillAndReserveTasksRequest {
                entries: entries.to_vec(),
            },
        )
        .await?;
        Ok(())
    }

    async fn shutdown_executors(
        &self,
        entries: &[ShutdownExecutorEntry],
    ) -> Result<(), HostClientError> {
        self.post(
            "shutdown_executors",
            "/v1/offers/shutdown-executors",
            &ShutdownExecutorsRequest {
                entries: entries.to_vec(),
            },
        )
        .await?;
        Ok(())
    }

    async fn release_hold(&self, task_id: TaskId) -> Result<(), HostClientError> {
        #[derive(Serialize)]
        struct ReleaseHoldBody {
            task_id: TaskId,
        }
        self.post(
            "release_hold",
            "/v1/hosts/release-hold",
            &ReleaseHoldBody { task_id },
        )
        .await?;
        Ok(())
    }
}
