//! Unified server error type.
//!
//! Handlers and middleware return `Result<T, ServerError>`; the
//! [`IntoResponse`] impl turns it into `{"error": ..., "code": ...}` with the
//! matching status. Pipeline failures carry user-facing text and are passed
//! through; I/O and document-parsing failures are logged in full and the
//! client only gets a generic message.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use toolbox_core::EngineError;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Malformed request outside the pipeline (multipart framing, unknown field).
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Too many conversion requests. Wait a minute and retry.")]
    RateLimited,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Engine(e) => engine_status(e),
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the UI.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Engine(e) => match e {
                EngineError::Unauthorized => "unauthorized",
                EngineError::OriginRejected(_) => "origin_rejected",
                EngineError::Validation(_) => "invalid_request",
                EngineError::PayloadTooLarge(_) => "payload_too_large",
                EngineError::DependencyMissing { .. } => "dependency_missing",
                EngineError::Timeout { .. } => "timeout",
                EngineError::Execution { kind, .. } => kind.as_str(),
                EngineError::OutputValidation(_) => "output_validation",
                EngineError::InvalidDocument(_) | EngineError::Io(_) => "internal",
                EngineError::Unavailable(_) => "unavailable",
            },
            ServerError::BadRequest(_) => "invalid_request",
            ServerError::PayloadTooLarge(_) => "payload_too_large",
            ServerError::RateLimited => "rate_limited",
            ServerError::Internal(_) => "internal",
        }
    }
}

fn engine_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
        EngineError::OriginRejected(_) => StatusCode::FORBIDDEN,
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        EngineError::DependencyMissing { .. } => StatusCode::PRECONDITION_FAILED,
        EngineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        EngineError::OutputValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Execution { .. } | EngineError::InvalidDocument(_) | EngineError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<MultipartError> for ServerError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ServerError::PayloadTooLarge("Request body too large.".to_owned())
        } else {
            ServerError::BadRequest(format!("Malformed multipart body: {}", e.body_text()))
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let client_message = match &self {
            ServerError::Engine(EngineError::Io(e)) => {
                error!(error = %e, "I/O error while processing job");
                "internal server error".to_owned()
            }
            ServerError::Engine(EngineError::InvalidDocument(m)) => {
                error!(message = %m, "could not inspect converted document");
                "internal server error".to_owned()
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                "internal server error".to_owned()
            }
            other => other.to_string(),
        };
        (
            status,
            Json(json!({ "error": client_message, "code": self.code() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use toolbox_core::{FailureKind, ToolId};

    use super::*;

    #[test]
    fn engine_errors_map_to_documented_statuses() {
        let cases = [
            (EngineError::Unauthorized, 401),
            (EngineError::OriginRejected("x".into()), 403),
            (EngineError::validation("x"), 400),
            (EngineError::too_large("x"), 413),
            (
                EngineError::DependencyMissing {
                    binary: "gs",
                    tool: Some(ToolId::CompressPdf),
                },
                412,
            ),
            (
                EngineError::Timeout {
                    program: "gs",
                    after: Duration::from_secs(1),
                },
                504,
            ),
            (
                EngineError::Execution {
                    kind: FailureKind::CorruptInput,
                    program: "qpdf",
                },
                500,
            ),
            (EngineError::OutputValidation("x".into()), 422),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status().as_u16(), status);
        }
        assert_eq!(ServerError::RateLimited.status().as_u16(), 429);
    }

    #[test]
    fn execution_code_carries_failure_kind() {
        let err = ServerError::from(EngineError::Execution {
            kind: FailureKind::PasswordProtected,
            program: "qpdf",
        });
        assert_eq!(err.code(), "password_protected");
    }
}
