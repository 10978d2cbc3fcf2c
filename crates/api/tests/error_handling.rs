//! Tests for `AppError` to HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no server needed.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;

use farmlink_api::error::AppError;
use farmlink_core::coordinator::CoordinatorError;
use farmlink_core::error::CoreError;
use farmlink_core::gateway::GatewayError;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

// ---------------------------------------------------------------------------
// Core errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn not_found_error_returns_404_with_worker_message() {
    let err = AppError::Core(CoreError::NotFound {
        entity: "Worker",
        id: "deadline-render01-cdef0123-4".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Worker not found");
}

#[tokio::test]
async fn validation_error_returns_400() {
    let err = AppError::Core(CoreError::Validation("count must be at least 1".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"], "count must be at least 1");
}

#[tokio::test]
async fn bad_request_error_returns_400() {
    let err = AppError::BadRequest("invalid field value".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(json["error"], "invalid field value");
}

#[tokio::test]
async fn internal_error_returns_500_and_sanitizes_message() {
    let err = AppError::InternalError("snapshot path /secret/location".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}

#[tokio::test]
async fn core_internal_error_is_sanitized_too() {
    let err = AppError::Core(CoreError::Internal("lock poisoned".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "An internal error occurred");
}

// ---------------------------------------------------------------------------
// Scheduler errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unavailable_scheduler_returns_503() {
    let err = AppError::Gateway(GatewayError::Unavailable("deadlinecommand not found".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "SCHEDULER_UNAVAILABLE");
}

#[tokio::test]
async fn submission_failure_carries_scheduler_output() {
    let err = AppError::Gateway(GatewayError::SubmissionFailed {
        exit_code: 2,
        stdout: "Submitting...".into(),
        stderr: "Error: pool 'gpu' does not exist".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "SUBMISSION_FAILED");
    assert_eq!(json["stdout"], "Submitting...");
    assert_eq!(json["stderr"], "Error: pool 'gpu' does not exist");
}

#[tokio::test]
async fn id_extraction_failure_carries_scheduler_output() {
    let err = AppError::Gateway(GatewayError::IdExtraction {
        stdout: "Result=Success".into(),
        stderr: String::new(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "JOB_ID_EXTRACTION_FAILED");
    assert_eq!(json["stdout"], "Result=Success");
}

#[tokio::test]
async fn scheduler_timeout_returns_504() {
    let err = AppError::Gateway(GatewayError::Timeout {
        command: "-SubmitJob".into(),
        elapsed_ms: 30_000,
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["code"], "SCHEDULER_TIMEOUT");
}

#[tokio::test]
async fn query_failure_returns_502() {
    let err = AppError::Gateway(GatewayError::QueryFailed("unexpected output".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "SCHEDULER_ERROR");
    assert!(json.get("stdout").is_none());
}

#[tokio::test]
async fn coordinator_errors_convert_by_source() {
    let from_core: AppError =
        CoordinatorError::Core(CoreError::Validation("bad port".into())).into();
    let (status, _) = error_to_response(from_core).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let from_gateway: AppError =
        CoordinatorError::Gateway(GatewayError::Unavailable("missing".into())).into();
    let (status, _) = error_to_response(from_gateway).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
