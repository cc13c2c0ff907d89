// upstage.rs - Upstage document OCR over HTTP
// One multipart POST per document; pages come back with text and a confidence.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{apply_page_options, render_content, DocumentParser, ParserError, ParserType};
use crate::core::config::UpstageConfig;
use crate::core::types::{ParseMetadata, ParseOptions, ParseResult, ParsedContent, ParsedPage};

#[derive(Debug, Deserialize)]
struct UpstageResponse {
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    pages: Vec<UpstagePage>,
}

#[derive(Debug, Deserialize)]
struct UpstagePage {
    /// Zero-based page index.
    #[serde(default)]
    id: u32,
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
}

pub struct UpstageParser {
    http: reqwest::Client,
    config: UpstageConfig,
    /// Per-request budget; overrides the shared client's timeout.
    timeout: Duration,
}

impl UpstageParser {
    pub fn new(http: reqwest::Client, config: UpstageConfig, timeout: Duration) -> Self {
        Self {
            http,
            config,
            timeout,
        }
    }

    fn into_result(
        body: UpstageResponse,
        options: &ParseOptions,
        file_size: usize,
        started: Instant,
    ) -> ParseResult {
        let page_count = u32::try_from(body.pages.len()).unwrap_or(u32::MAX);
        let pages: Vec<ParsedPage> = body
            .pages
            .into_iter()
            .map(|p| ParsedPage {
                page_number: p.id + 1,
                text: p.text,
                confidence: p.confidence,
                ..ParsedPage::default()
            })
            .collect();
        let pages = apply_page_options(pages, options);

        ParseResult {
            success: true,
            parser: ParserType::Upstage.as_str().to_string(),
            page_count,
            content: ParsedContent {
                text: render_content(&pages, options.output_format),
                pages,
            },
            metadata: ParseMetadata {
                processing_time_ms: started.elapsed().as_millis() as u64,
                confidence: body.confidence,
                file_size,
                language: options.language.clone(),
                image_count: 0,
                scanned: true,
            },
            errors: None,
        }
    }
}

#[async_trait]
impl DocumentParser for UpstageParser {
    fn parser_type(&self) -> ParserType {
        ParserType::Upstage
    }

    async fn parse(&self, buffer: &[u8], options: &ParseOptions) -> Result<ParseResult, ParserError> {
        let started = Instant::now();
        let document = Part::bytes(buffer.to_vec())
            .file_name("document.pdf")
            .mime_str("application/pdf")
            .map_err(|e| ParserError::backend(ParserType::Upstage, e))?;
        let form = Form::new().part("document", document).text("model", "ocr");

        debug!("Upstage OCR request: {} bytes", buffer.len());
        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ParserError::request(ParserType::Upstage, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Upstage OCR returned {}: {}", status, body.chars().take(200).collect::<String>());
            return Err(ParserError::backend(
                ParserType::Upstage,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let body: UpstageResponse = response
            .json()
            .await
            .map_err(|e| ParserError::request(ParserType::Upstage, e))?;
        Ok(Self::into_result(body, options, buffer.len(), started))
    }
}
