//! JSON error responses.
//!
//! Every failure leaves the server as `{"error": {"code": "...", "message": "..."}}` with a
//! machine-readable code that clients can switch on.

use crate::qa::ServiceError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Error returned by HTTP handlers and middleware.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retry_after: Option<Duration>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    /// 400 with code `bad_request`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// 401 with code `unauthorized`.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    /// 429 with code `rate_limited` and, when known, a `Retry-After` header.
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "rate limit exceeded",
            )
        }
    }

    /// 500 with code `internal`; the cause is logged, not returned.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        tracing::error!(error = %cause, "Request failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal server error",
        )
    }

    /// HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code of this error.
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after {
            let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds.max(1)));
        }
        response
    }
}

impl From<ServiceError> for AppError {
    fn from(error: ServiceError) -> Self {
        let message = error.to_string();
        match error {
            ServiceError::TooLarge { .. } => {
                Self::new(StatusCode::PAYLOAD_TOO_LARGE, "too_large", message)
            }
            ServiceError::UnsupportedType => {
                Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_type", message)
            }
            ServiceError::EncryptedDocument => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "encrypted_document",
                message,
            ),
            ServiceError::MalformedDocument(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "malformed_document",
                message,
            ),
            ServiceError::ExtractionTimedOut(_) => {
                Self::new(StatusCode::REQUEST_TIMEOUT, "timeout", message)
            }
            ServiceError::NotFound => Self::new(StatusCode::NOT_FOUND, "not_found", message),
            ServiceError::Store(error) => Self::internal(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use axum::body::to_bytes;

    #[test]
    fn service_errors_map_to_documented_statuses() {
        let cases = [
            (ServiceError::too_large(11), StatusCode::PAYLOAD_TOO_LARGE, "too_large"),
            (
                ServiceError::UnsupportedType,
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_type",
            ),
            (
                ServiceError::EncryptedDocument,
                StatusCode::UNPROCESSABLE_ENTITY,
                "encrypted_document",
            ),
            (
                ServiceError::MalformedDocument("bad xref".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "malformed_document",
            ),
            (
                ServiceError::ExtractionTimedOut(Duration::from_secs(30)),
                StatusCode::REQUEST_TIMEOUT,
                "timeout",
            ),
            (ServiceError::NotFound, StatusCode::NOT_FOUND, "not_found"),
            (
                ServiceError::Store(StoreError::Corrupt("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
            ),
        ];

        for (error, status, code) in cases {
            let app_error = AppError::from(error);
            assert_eq!(app_error.status(), status);
            assert_eq!(app_error.code(), code);
        }
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_details() {
        let response =
            AppError::from(ServiceError::Store(StoreError::Corrupt("secret path".into())))
                .into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "internal");
        assert!(!json.to_string().contains("secret path"));
    }

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        let response = AppError::rate_limited(Some(Duration::from_millis(1500))).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "2");

        let response = AppError::rate_limited(None).into_response();
        assert!(response.headers().get(RETRY_AFTER).is_none());
    }
}
