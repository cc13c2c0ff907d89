use axum::extract::rejection::JsonRejection;
use axum::response::Json;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::error::ApiError;
use crate::core::types::ApiSuccess;

pub type ApiResult<T> = Result<Json<ApiSuccess<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiSuccess::new(data)))
}

/// Unwraps a JSON body, turning extractor rejections into `VALIDATION_ERROR`.
pub fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    match body {
        Ok(Json(value)) if value.is_object() => Ok(value),
        Ok(_) => Err(ApiError::validation("body", "Request body must be a JSON object")),
        Err(rejection) => Err(ApiError::validation("body", rejection.body_text())),
    }
}

/// Converts an already validated document into its typed form.
pub fn typed<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::validation("body", e.to_string()))
}
