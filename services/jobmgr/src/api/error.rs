//! RFC-7807 problem responses for the job manager surface.

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::cache::CacheError;
use crate::storage::StoreError;
use crate::workflow::WorkflowError;

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
        let mut error = Self::new(StatusCode::CONFLICT, code, detail);
        error.problem.retryable = true;
        error
    }

    pub fn internal(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, detail)
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

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match &error {
            StoreError::Conflict { .. } => Self::conflict("StaleRevision", error.to_string()),
            StoreError::Backend(_) => Self::unavailable("StoreUnavailable", error.to_string()),
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(error: CacheError) -> Self {
        match &error {
            CacheError::Store(store) => match store {
                StoreError::Conflict { .. } => Self::conflict("StaleRevision", error.to_string()),
                StoreError::Backend(_) => {
                    Self::unavailable("StoreUnavailable", error.to_string())
                }
            },
            CacheError::MissingRuntime(_) | CacheError::MissingConfig { .. } => {
                Self::not_found("JobNotFound", error.to_string())
            }
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(error: WorkflowError) -> Self {
        match &error {
            WorkflowError::NotFound(_) => Self::not_found("WorkflowNotFound", error.to_string()),
            WorkflowError::InvalidTransition(_) => {
                Self::conflict("InvalidWorkflowState", error.to_string())
            }
            WorkflowError::Store(_) => Self::unavailable("StoreUnavailable", error.to_string()),
        }
    }
}
