use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use farmlink_core::coordinator::CoordinatorError;
use farmlink_core::error::CoreError;
use farmlink_core::gateway::GatewayError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for registry/validation errors and [`GatewayError`]
/// for scheduler failures. Implements [`IntoResponse`] to produce
/// `{ "success": false, "error": ..., "code": ... }` bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `farmlink_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The external scheduler failed or could not be reached.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<CoordinatorError> for AppError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Core(e) => AppError::Core(e),
            CoordinatorError::Gateway(e) => AppError::Gateway(e),
        }
    }
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut stdout = None;
        let mut stderr = None;

        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, .. } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- Scheduler errors ---
            AppError::Gateway(gateway) => {
                tracing::warn!(error = %gateway, "Scheduler operation failed");
                match gateway {
                    GatewayError::Unavailable(_) => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "SCHEDULER_UNAVAILABLE",
                        gateway.to_string(),
                    ),
                    GatewayError::SubmissionFailed {
                        stdout: out,
                        stderr: err,
                        ..
                    } => {
                        stdout = Some(out.clone());
                        stderr = Some(err.clone());
                        (StatusCode::BAD_GATEWAY, "SUBMISSION_FAILED", gateway.to_string())
                    }
                    GatewayError::IdExtraction {
                        stdout: out,
                        stderr: err,
                    } => {
                        stdout = Some(out.clone());
                        stderr = Some(err.clone());
                        (
                            StatusCode::BAD_GATEWAY,
                            "JOB_ID_EXTRACTION_FAILED",
                            gateway.to_string(),
                        )
                    }
                    GatewayError::Timeout { .. } => (
                        StatusCode::GATEWAY_TIMEOUT,
                        "SCHEDULER_TIMEOUT",
                        gateway.to_string(),
                    ),
                    GatewayError::CancelFailed { stderr: err, .. } => {
                        stderr = Some(err.clone());
                        (StatusCode::BAD_GATEWAY, "SCHEDULER_ERROR", gateway.to_string())
                    }
                    GatewayError::QueryFailed(_) | GatewayError::Io(_) => {
                        (StatusCode::BAD_GATEWAY, "SCHEDULER_ERROR", gateway.to_string())
                    }
                }
            }

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let mut body = json!({
            "success": false,
            "error": message,
            "code": code,
        });
        if let Some(out) = stdout {
            body["stdout"] = json!(out);
        }
        if let Some(err) = stderr {
            body["stderr"] = json!(err);
        }

        (status, axum::Json(body)).into_response()
    }
}
