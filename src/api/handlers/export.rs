use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Json, Response};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;

use super::common::{json_body, typed};
use crate::core::error::ApiError;
use crate::tools::export::{self, default_filename, ExportFormat, ExportOptions, Row};
use crate::tools::validate::export_rules;
use crate::AppState;

/// `attachment` disposition with an ASCII fallback name and the RFC 5987
/// encoded original.
pub fn content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        utf8_percent_encode(filename, NON_ALPHANUMERIC)
    )
}

fn rows_from(data: Value) -> Result<Vec<Row>, ApiError> {
    let Value::Array(items) = data else {
        return Err(ApiError::validation("data", "data must be an array"));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(row) => Ok(row),
            _ => Err(ApiError::validation(format!("data.{i}"), "each row must be an object")),
        })
        .collect()
}

/// `POST /api/export`
pub async fn export_data(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let mut body = json_body(body)?;
    export_rules().validate(&body)?;

    let format: ExportFormat = typed(body["format"].take())?;
    let mut options: ExportOptions = match body.get_mut("options").map(Value::take) {
        Some(Value::Null) | None => ExportOptions::default(),
        Some(value) => typed(value)?,
    };
    // Files only ever land in the configured export directory.
    options.directory = options
        .filename
        .as_ref()
        .map(|_| state.config.export_dir.clone());
    let rows = rows_from(body["data"].take())?;

    let output = export::export(&rows, format, &options).await?;
    let filename = output
        .file_path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| default_filename(format));

    let mut response = output.content.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
    if let Ok(v) = HeaderValue::from_str(&content_disposition(&filename)) {
        headers.insert(header::CONTENT_DISPOSITION, v);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn disposition_keeps_unicode_in_extended_form() {
        let header = content_disposition("투표율 2024.csv");
        assert!(header.starts_with("attachment; filename=\"____2024.csv\""));
        assert!(header.contains("filename*=UTF-8''%ED%88%AC"));
        assert!(HeaderValue::from_str(&header).is_ok());
    }

    #[test]
    fn non_object_rows_are_rejected_with_index() {
        let err = rows_from(json!([{ "a": 1 }, 3])).unwrap_err();
        match err {
            ApiError::Validation(fields) => assert_eq!(fields[0].field, "data.1"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
