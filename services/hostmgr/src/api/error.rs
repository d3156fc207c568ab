//! RFC-7807 problem responses for the host manager surface.

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::client::ClusterError;
use crate::pool::PoolError;
use crate::summary::SummaryError;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub retryable: bool,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            status,
            problem: Box::new(ProblemDetails {
                r#type: format!("https://armada.dev/problems/{code}"),
                title,
                status: status.as_u16(),
                detail: detail.into(),
                code,
                retryable: false,
            }),
        }
    }

    pub fn bad_request(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, detail)
    }

    pub fn not_found(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, detail)
    }

    pub fn conflict(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, detail)
    }

    pub fn internal(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, detail)
    }

    pub fn too_many_requests(code: impl Into<String>, detail: impl Into<String>) -> Self {
        let mut error = Self::new(StatusCode::TOO_MANY_REQUESTS, code, detail);
        error.problem.retryable = true;
        error
    }

    pub fn unavailable(code: impl Into<String>, detail: impl Into<String>) -> Self {
        let mut error = Self::new(StatusCode::SERVICE_UNAVAILABLE, code, detail);
        error.problem.retryable = true;
        error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

impl From<PoolError> for ApiError {
    fn from(error: PoolError) -> Self {
        match &error {
            PoolError::EmptyFilter => Self::bad_request("InvalidFilter", error.to_string()),
            PoolError::UnknownHost(_) => Self::not_found("UnknownHost", error.to_string()),
            PoolError::Summary(summary) => match summary {
                SummaryError::HostOfferIdMismatch => {
                    Self::bad_request("InvalidOffers", error.to_string())
                }
                SummaryError::NotPlacing { .. } => Self::conflict("InvalidOffers", error.to_string()),
                SummaryError::InvalidStatusForHold { .. }
                | SummaryError::InvalidTransition { .. } => {
                    Self::conflict("InvalidHostStatus", error.to_string())
                }
            },
        }
    }
}

impl From<ClusterError> for ApiError {
    fn from(error: ClusterError) -> Self {
        match &error {
            ClusterError::Unavailable(_) => {
                Self::unavailable("ClusterManagerUnavailable", error.to_string())
            }
            ClusterError::Rejected { operation, .. } => {
                let code = match operation.as_str() {
                    "launch_tasks" => "LaunchFailure",
                    "kill_tasks" | "shutdown_executors" => "KillFailure",
                    _ => "ClusterManagerFailure",
                };
                Self::internal(code, error.to_string())
            }
            ClusterError::ResourceExhausted { .. } => {
                Self::too_many_requests("RateLimited", error.to_string())
            }
        }
    }
}
