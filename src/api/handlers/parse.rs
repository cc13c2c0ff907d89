use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use super::common::{ok, typed, ApiResult};
use crate::core::error::ApiError;
use crate::core::types::{ParseOptions, ParseResult};
use crate::parsers::{ParserError, ParserType};
use crate::tools::validate::parse_rules;
use crate::AppState;

const PDF_MIME_TYPES: &[&str] = &["application/pdf", "application/x-pdf"];

struct Upload {
    file: Option<(String, Vec<u8>)>,
    parser_id: Option<String>,
    options: Option<Value>,
}

fn multipart_error(err: MultipartError, limit_bytes: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge { limit_bytes }
    } else {
        ApiError::validation("file", err.body_text())
    }
}

async fn read_upload(mut multipart: Multipart, limit_bytes: usize) -> Result<Upload, ApiError> {
    let mut upload = Upload {
        file: None,
        parser_id: None,
        options: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit_bytes))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let mime = field.content_type().unwrap_or_default().to_ascii_lowercase();
                if !PDF_MIME_TYPES.contains(&mime.as_str()) {
                    return Err(ApiError::validation(
                        "file",
                        format!("Only PDF uploads are accepted (got '{mime}')"),
                    ));
                }
                let name = field.file_name().unwrap_or("upload.pdf").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, limit_bytes))?;
                if bytes.len() > limit_bytes {
                    return Err(ApiError::PayloadTooLarge { limit_bytes });
                }
                upload.file = Some((name, bytes.to_vec()));
            }
            "parserId" => {
                let text = field.text().await.map_err(|e| multipart_error(e, limit_bytes))?;
                upload.parser_id = Some(text.trim().to_string()).filter(|s| !s.is_empty());
            }
            "options" => {
                let text = field.text().await.map_err(|e| multipart_error(e, limit_bytes))?;
                if !text.trim().is_empty() {
                    let value: Value = serde_json::from_str(&text)
                        .map_err(|e| ApiError::validation("options", format!("options must be JSON: {e}")))?;
                    upload.options = Some(value);
                }
            }
            other => warn!("Ignoring unexpected multipart field '{}'", other),
        }
    }
    Ok(upload)
}

fn parse_options(upload: &Upload) -> Result<ParseOptions, ApiError> {
    let mut doc = Map::new();
    if let Some(id) = &upload.parser_id {
        doc.insert("parserId".into(), Value::String(id.clone()));
    }
    if let Some(options) = &upload.options {
        doc.insert("options".into(), options.clone());
    }
    parse_rules().validate(&Value::Object(doc))?;

    let options: ParseOptions = match &upload.options {
        Some(value) => typed(value.clone())?,
        None => ParseOptions::default(),
    };
    if let Some(range) = options.page_range {
        if range.start > range.end {
            return Err(ApiError::validation(
                "options.pageRange",
                "start must not be greater than end",
            ));
        }
    }
    Ok(options)
}

/// `POST /api/parse`
pub async fn parse_document(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<ParseResult> {
    let multipart = multipart.map_err(|e| ApiError::validation("body", e.body_text()))?;
    let limit = state.config.parsers.max_upload_bytes;
    let upload = read_upload(multipart, limit).await?;
    let options = parse_options(&upload)?;
    let (file_name, bytes) = upload
        .file
        .ok_or_else(|| ApiError::validation("file", "A PDF file is required"))?;

    // One deadline covers profiling the upload and the backend call.
    let deadline = Instant::now() + state.config.parsers.timeout;
    let parser = match upload.parser_id.as_deref() {
        Some(id) => state.parsers.create(id)?,
        None => timeout_at(deadline, state.parsers.select_best(&bytes))
            .await
            .map_err(|_| ParserError::Timeout(ParserType::PdfText))??,
    };
    let parser_type = parser.parser_type();
    info!("Parsing {} ({} bytes) with {}", file_name, bytes.len(), parser_type);

    let result = timeout_at(deadline, parser.parse(&bytes, &options))
        .await
        .map_err(|_| ParserError::Timeout(parser_type))??;
    ok(result)
}

#[derive(Debug, Serialize)]
pub struct ParserListing {
    pub available: Vec<ParserType>,
    pub registered: &'static [&'static str],
}

/// `GET /api/parse/parsers`
pub async fn list_parsers(State(state): State<Arc<AppState>>) -> ApiResult<ParserListing> {
    ok(ParserListing {
        available: state.parsers.available_parsers(),
        registered: ParserType::IDS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upload(parser_id: Option<&str>, options: Option<Value>) -> Upload {
        Upload {
            file: None,
            parser_id: parser_id.map(str::to_string),
            options,
        }
    }

    #[test]
    fn options_default_when_absent() {
        let options = parse_options(&upload(None, None)).unwrap();
        assert!(options.extract_tables);
        assert!(options.page_range.is_none());
    }

    #[test]
    fn parser_id_is_only_shape_checked() {
        assert!(parse_options(&upload(Some("tesseract"), None)).is_ok());
        let long = "p".repeat(65);
        let err = parse_options(&upload(Some(&long), None)).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn inverted_page_range_is_rejected() {
        let opts = json!({ "pageRange": { "start": 5, "end": 2 } });
        let err = parse_options(&upload(None, Some(opts))).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let opts = json!({ "pageRange": { "start": 1, "end": 2 }, "outputFormat": "markdown" });
        let options = parse_options(&upload(Some("pdf_text"), Some(opts))).unwrap();
        assert_eq!(options.page_range.unwrap().end, 2);
    }
}
