// ABOUTME: Application error type shared by every HTTP handler
// ABOUTME: Maps failures to status codes and `{"error","code"}` bodies, logging server-side faults

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use deskrun_sandbox::{InstanceId, ProviderError, ProvisionError};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Main application error type that all handlers return
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("VNC endpoint for instance {0} is not ready")]
    VncNotReady(InstanceId),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl AppError {
    fn to_status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::VncNotReady(_) => (StatusCode::NOT_FOUND, "VNC_NOT_READY"),
            AppError::Provision(ProvisionError::Precondition(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_UNAVAILABLE")
            }
            AppError::Provision(ProvisionError::Create(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "SANDBOX_CREATE_FAILED")
            }
            AppError::Provider(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, error_code) = self.to_status_and_code();

        if status_code.is_server_error() {
            let request_id = Uuid::new_v4().to_string();
            match &self {
                AppError::Internal(err) => {
                    error!(
                        request_id = %request_id,
                        error = ?err,
                        "Internal server error occurred"
                    );
                }
                other => {
                    error!(
                        request_id = %request_id,
                        code = error_code,
                        error = %other,
                        "Request failed"
                    );
                }
            }
        } else {
            warn!(code = error_code, "{}", self);
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: error_code,
        };
        (status_code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (AppError::VncNotReady(1), StatusCode::NOT_FOUND),
            (
                AppError::Provision(ProvisionError::Create(ProviderError::Timeout("t".into()))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AppError::Provider(ProviderError::NotFound("sb".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AppError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.to_status_and_code().0, expected, "{:?}", err);
        }
    }

    #[test]
    fn test_not_ready_is_distinct_from_not_found() {
        assert_ne!(
            AppError::VncNotReady(3).to_status_and_code().1,
            AppError::NotFound("x".into()).to_status_and_code().1
        );
    }

    #[test]
    fn test_internal_message_is_sanitized() {
        let err = AppError::Internal(anyhow::anyhow!("secret detail"));
        assert_eq!(err.to_string(), "Internal server error");
    }
}
