use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::{
    digest::{Algorithm, DigestStateError},
    models::state::Step,
    storage::StorageError,
};

/// Failures raised by the fixity steps.
#[derive(Debug, Error)]
pub enum FixityError {
    #[error("etag mismatch: recorded {recorded}, storage reports {observed}")]
    IdentityMismatch { recorded: String, observed: String },

    #[error("file size mismatch: {0}")]
    SizeMismatch(String),

    #[error("{0} already computed, the hashing step must not run again")]
    AlreadyComputed(Algorithm),

    #[error("checksums do not match: reference {reference}, computed {computed}")]
    ValidationMismatch { reference: String, computed: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("inconsistent hash progress: {0}")]
    InvalidState(String),

    #[error(transparent)]
    HashState(#[from] DigestStateError),

    #[error(transparent)]
    Storage(StorageError),
}

pub type FixityResult<T> = Result<T, FixityError>;

impl FixityError {
    /// Stable name the orchestrator can branch on.
    pub fn kind(&self) -> &'static str {
        match self {
            FixityError::IdentityMismatch { .. } => "IdentityMismatch",
            FixityError::SizeMismatch(_) => "SizeMismatch",
            FixityError::AlreadyComputed(_) => "AlreadyComputed",
            FixityError::ValidationMismatch { .. } => "ValidationMismatch",
            FixityError::AccessDenied(_) => "AccessDenied",
            FixityError::Configuration(_) => "Configuration",
            FixityError::InvalidArgument(_) | FixityError::HashState(_) => "InvalidArgument",
            FixityError::InvalidState(_) => "ChecksumError",
            FixityError::Storage(_) => "StorageError",
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            FixityError::InvalidState(_) => 1000,
            FixityError::InvalidArgument(_) | FixityError::HashState(_) => 1002,
            FixityError::AlreadyComputed(_) => 1003,
            FixityError::ValidationMismatch { .. } => 1004,
            FixityError::Configuration(_) => 1005,
            FixityError::Storage(_) => 1006,
            FixityError::IdentityMismatch { .. } => 1007,
            FixityError::SizeMismatch(_) => 1008,
            FixityError::AccessDenied(_) => 1009,
        }
    }

    /// Whether re-running the same step could succeed.
    ///
    /// Identity, size and contract violations mean the object changed or the
    /// workflow is broken; retrying them would only produce wrong answers.
    pub fn is_retryable(&self) -> bool {
        match self {
            FixityError::Storage(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<StorageError> for FixityError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::PreconditionFailed { expected, actual } => {
                FixityError::IdentityMismatch {
                    recorded: expected,
                    observed: actual,
                }
            }
            StorageError::AccessDenied(reason) => FixityError::AccessDenied(reason),
            other => FixityError::Storage(other),
        }
    }
}

/// Error rendered by the HTTP surface.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub error_type: &'static str,
    pub code: Option<u16>,
    pub step: Option<Step>,
    pub retryable: bool,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            error_type: "Error",
            code: None,
            step: None,
            retryable: false,
        }
    }

    /// Tag a step failure with the step it came from.
    pub fn from_step(step: Step, err: FixityError) -> Self {
        let status = match &err {
            FixityError::InvalidArgument(_) | FixityError::HashState(_) => StatusCode::BAD_REQUEST,
            FixityError::AccessDenied(_) => StatusCode::FORBIDDEN,
            FixityError::IdentityMismatch { .. } => StatusCode::PRECONDITION_FAILED,
            FixityError::SizeMismatch(_)
            | FixityError::InvalidState(_)
            | FixityError::AlreadyComputed(_)
            | FixityError::ValidationMismatch { .. } => StatusCode::CONFLICT,
            FixityError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FixityError::Storage(storage) => storage.status_code(),
        };
        Self {
            status,
            message: err.to_string(),
            error_type: err.kind(),
            code: Some(err.code()),
            step: Some(step),
            retryable: err.is_retryable(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "{step}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "errorType": self.error_type,
            "code": self.code,
            "step": self.step.map(Step::as_str),
            "retryable": self.retryable,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let mut app = AppError::new(err.status_code(), err.to_string());
        app.error_type = err.kind();
        app.retryable = err.is_transient();
        app
    }
}
