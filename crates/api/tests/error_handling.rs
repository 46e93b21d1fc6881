//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no server is
//! needed.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use sonora_api::error::AppError;
use sonora_core::error::CoreError;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn not_found_error_returns_404() {
    let err = AppError::Core(CoreError::NotFound {
        entity: "Job",
        id: "0190f3a2".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Job with id 0190f3a2 not found");
}

#[tokio::test]
async fn insufficient_credits_returns_402_with_amounts() {
    let err = AppError::Core(CoreError::InsufficientCredits {
        required: 5,
        available: 0,
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json["code"], "INSUFFICIENT_CREDITS");
    assert_eq!(
        json["error"],
        "Insufficient credits: 5 minutes required, 0 available"
    );
}

#[tokio::test]
async fn job_not_ready_returns_409() {
    let (status, json) = error_to_response(CoreError::JobNotReady("abc".into()).into()).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "JOB_NOT_READY");
}

#[tokio::test]
async fn unsupported_capability_returns_422() {
    let (status, json) =
        error_to_response(CoreError::UnsupportedCapability("lip_sync".into()).into()).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], "UNSUPPORTED_CAPABILITY");
    assert_eq!(json["error"], "lip_sync");
}

#[tokio::test]
async fn bad_request_error_returns_400() {
    let (status, json) = error_to_response(AppError::BadRequest("invalid field value".into())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(json["error"], "invalid field value");
}

#[tokio::test]
async fn internal_error_returns_500_and_sanitizes_message() {
    let (status, json) =
        error_to_response(AppError::InternalError("secret database credentials".into())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}

#[tokio::test]
async fn row_not_found_maps_to_404() {
    let (status, json) = error_to_response(AppError::Database(sqlx::Error::RowNotFound)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}
