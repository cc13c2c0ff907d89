//! HTTP-boundary error type.
//!
//! Every failure that reaches a route handler is converted into an [`ApiError`],
//! which owns the mapping to a status code and a stable machine-readable code.
//! Subsystem errors (`ParserError`, `CrawlerError`, `ExportError`) convert into
//! it via `From`, so handlers can use `?` throughout.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

use crate::core::types::{ErrorBody, ErrorResponse};

/// A single field-level validation message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request validation failed")]
    Validation(Vec<FieldError>),

    #[error("Email and password are required")]
    MissingCredentials,

    #[error("{0}")]
    Unauthorized(String),

    #[error("Unsupported parser: {0}")]
    UnsupportedParser(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Uploaded file exceeds the {limit_bytes} byte limit")]
    PayloadTooLarge { limit_bytes: usize },

    #[error("{message}")]
    TooManyRequests {
        code: &'static str,
        message: String,
        retry_after_secs: u64,
    },

    #[error("{0}")]
    NotImplemented(String),

    #[error("Feature '{0}' is disabled")]
    FeatureDisabled(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::Internal(message.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::MissingCredentials
            | ApiError::UnsupportedParser(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::FeatureDisabled(_) | ApiError::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Parse(_) | ApiError::Auth(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::MissingCredentials => "MISSING_CREDENTIALS",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::UnsupportedParser(_) => "UNSUPPORTED_PARSER",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ApiError::TooManyRequests { code, .. } => *code,
            ApiError::NotImplemented(_) => "NOT_IMPLEMENTED",
            ApiError::FeatureDisabled(_) => "FEATURE_DISABLED",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Parse(_) => "PARSE_ERROR",
            ApiError::Auth(_) => "AUTH_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Validation(errors) => serde_json::to_value(errors).ok(),
            ApiError::FeatureDisabled(feature) => {
                Some(serde_json::json!({ "feature": feature }))
            }
            ApiError::TooManyRequests {
                retry_after_secs, ..
            } => Some(serde_json::json!({ "retryAfter": retry_after_secs })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "request failed: {}", self);
        }

        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::TooManyRequests {
            retry_after_secs, ..
        } = &self
        {
            if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, v);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_codes_to_statuses() {
        let cases = [
            (ApiError::validation("q", "too long"), 400, "VALIDATION_ERROR"),
            (ApiError::MissingCredentials, 400, "MISSING_CREDENTIALS"),
            (ApiError::FeatureDisabled("ocr".into()), 503, "FEATURE_DISABLED"),
            (ApiError::ServiceUnavailable("down".into()), 503, "SERVICE_UNAVAILABLE"),
            (ApiError::NotImplemented("prod".into()), 501, "NOT_IMPLEMENTED"),
            (ApiError::Parse("bad".into()), 500, "PARSE_ERROR"),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status().as_u16(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn rate_limit_error_carries_its_own_code() {
        let err = ApiError::TooManyRequests {
            code: "QUERY_RATE_LIMIT_EXCEEDED",
            message: "slow down".into(),
            retry_after_secs: 12,
        };
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.code(), "QUERY_RATE_LIMIT_EXCEEDED");

        let response = err.into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "12"
        );
    }
}
