//! Error handling utilities for route handlers

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

use crate::services::late::LateError;

/// API error surfaced to callers as `{error, details?, timing?}` with an
/// appropriate HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub details: Option<Value>,
    pub timing: Option<Value>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timing: Option<&'a Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: None,
            timing: None,
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn conflict(error: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// Map a publishing-client error. The vendor's HTTP status is forwarded
    /// when available, capped to the 400..=599 range; everything else is a
    /// plain 500. The vendor body travels in `details` without leaking its
    /// schema into our taxonomy.
    pub fn from_late(context: &str, err: &LateError) -> Self {
        match err {
            LateError::Api { status, body } => {
                let status = StatusCode::from_u16((*status).clamp(400, 599))
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let details = serde_json::from_str::<Value>(body)
                    .unwrap_or_else(|_| Value::String(body.clone()));
                Self::new(status, format!("{}: publishing API error", context))
                    .with_details(details)
            }
            LateError::UploadTimeout => Self::internal(format!("{}: {}", context, err)),
            other => Self::internal(format!("{}: {}", context, other)),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_timing(mut self, timing: impl Serialize) -> Self {
        self.timing = serde_json::to_value(timing).ok();
        self
    }

    /// Fill in `timing` only when the failing path did not measure one, so
    /// every error body carries the field without overwriting a breakdown
    /// captured mid-pipeline.
    pub fn or_timing(self, timing: impl Serialize) -> Self {
        if self.timing.is_some() {
            self
        } else {
            self.with_timing(timing)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.error,
            details: self.details.as_ref(),
            timing: self.timing.as_ref(),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Extension trait for logging errors and converting to ApiError
pub trait LogErr<T> {
    /// Log error with context and return an internal-error ApiError
    fn log_500(self, context: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str) -> Result<T, ApiError> {
        self.map_err(|e| {
            eprintln!("{}: {}", context, e);
            ApiError::internal(context)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_vendor_status_within_safe_range() {
        let err = LateError::Api {
            status: 429,
            body: r#"{"message":"rate limited"}"#.to_string(),
        };
        let api = ApiError::from_late("Create post failed", &err);
        assert_eq!(api.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            api.details.unwrap()["message"],
            Value::String("rate limited".into())
        );
    }

    #[test]
    fn caps_out_of_range_vendor_status() {
        let err = LateError::Api {
            status: 302,
            body: "redirected".to_string(),
        };
        let api = ApiError::from_late("Presign failed", &err);
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        // Non-JSON bodies still travel as details
        assert_eq!(api.details.unwrap(), Value::String("redirected".into()));
    }

    #[test]
    fn or_timing_fills_only_missing_timing() {
        let api = ApiError::bad_request("Video URL is required")
            .or_timing(serde_json::json!({"totalMs": 3}));
        assert_eq!(api.timing.unwrap()["totalMs"], 3);

        // A breakdown measured mid-pipeline is not overwritten
        let api = ApiError::internal("Publish failed")
            .with_timing(serde_json::json!({"totalMs": 7}))
            .or_timing(serde_json::json!({"totalMs": 99}));
        assert_eq!(api.timing.unwrap()["totalMs"], 7);
    }

    #[test]
    fn upload_timeout_is_distinguishable() {
        let api = ApiError::from_late("Upload failed", &LateError::UploadTimeout);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(api.error.contains("timed out"));
    }
}
