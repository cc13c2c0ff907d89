// clova.rs - Naver Clova general OCR over HTTP
// The document travels base64-encoded inside a V2 JSON request; every page
// of a PDF comes back as its own image result.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{apply_page_options, render_content, DocumentParser, ParserError, ParserType};
use crate::core::config::ClovaConfig;
use crate::core::types::{
    ExtractedTable, ParseMetadata, ParseOptions, ParseResult, ParsedContent, ParsedPage,
};

#[derive(Debug, Deserialize)]
struct ClovaResponse {
    #[serde(default)]
    images: Vec<ClovaImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClovaImage {
    #[serde(default)]
    infer_result: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    fields: Vec<ClovaField>,
    #[serde(default)]
    tables: Vec<ClovaTable>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClovaField {
    infer_text: String,
    #[serde(default)]
    infer_confidence: Option<f32>,
    #[serde(default)]
    line_break: bool,
}

#[derive(Debug, Deserialize)]
struct ClovaTable {
    #[serde(default)]
    cells: Vec<ClovaCell>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClovaCell {
    row_index: usize,
    column_index: usize,
    #[serde(default)]
    cell_text_lines: Vec<ClovaCellLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClovaCellLine {
    #[serde(default)]
    cell_words: Vec<ClovaCellWord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClovaCellWord {
    infer_text: String,
}

// Cells beyond these bounds are dropped.
const MAX_TABLE_ROWS: usize = 1_000;
const MAX_TABLE_COLS: usize = 100;

impl ClovaTable {
    fn to_rows(&self) -> ExtractedTable {
        let in_bounds = |c: &&ClovaCell| c.row_index < MAX_TABLE_ROWS && c.column_index < MAX_TABLE_COLS;
        let rows = self.cells.iter().filter(in_bounds).map(|c| c.row_index + 1).max().unwrap_or(0);
        let cols = self.cells.iter().filter(in_bounds).map(|c| c.column_index + 1).max().unwrap_or(0);
        let mut grid = vec![vec![String::new(); cols]; rows];
        for cell in self.cells.iter().filter(in_bounds) {
            grid[cell.row_index][cell.column_index] = cell
                .cell_text_lines
                .iter()
                .map(|line| {
                    line.cell_words
                        .iter()
                        .map(|w| w.infer_text.as_str())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect::<Vec<_>>()
                .join("\n");
        }
        ExtractedTable { rows: grid }
    }
}

fn page_text(fields: &[ClovaField]) -> String {
    let mut text = String::new();
    for field in fields {
        text.push_str(&field.infer_text);
        text.push(if field.line_break { '\n' } else { ' ' });
    }
    text.trim_end().to_string()
}

fn mean(values: impl Iterator<Item = f32>) -> Option<f32> {
    let (sum, n) = values.fold((0.0f32, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f32)
}

pub struct ClovaParser {
    http: reqwest::Client,
    config: ClovaConfig,
    timeout: Duration,
}

impl ClovaParser {
    pub fn new(http: reqwest::Client, config: ClovaConfig, timeout: Duration) -> Self {
        Self {
            http,
            config,
            timeout,
        }
    }

    fn request_body(buffer: &[u8], options: &ParseOptions) -> serde_json::Value {
        json!({
            "version": "V2",
            "requestId": Uuid::new_v4().to_string(),
            "timestamp": chrono::Utc::now().timestamp_millis(),
            "lang": options.language.as_deref().unwrap_or("ko"),
            "enableTableDetection": options.extract_tables,
            "images": [{
                "format": "pdf",
                "name": "document",
                "data": base64::engine::general_purpose::STANDARD.encode(buffer),
            }],
        })
    }

    fn into_result(
        body: ClovaResponse,
        options: &ParseOptions,
        file_size: usize,
        started: Instant,
    ) -> ParseResult {
        let page_count = u32::try_from(body.images.len()).unwrap_or(u32::MAX);
        let mut errors = Vec::new();
        let mut pages = Vec::new();

        for (index, image) in body.images.into_iter().enumerate() {
            let page_number = index as u32 + 1;
            if image.infer_result != "SUCCESS" {
                errors.push(format!("page {page_number}: {} {}", image.infer_result, image.message));
                continue;
            }
            pages.push(ParsedPage {
                page_number,
                text: page_text(&image.fields),
                tables: image.tables.iter().map(ClovaTable::to_rows).collect(),
                images: Vec::new(),
                confidence: mean(image.fields.iter().filter_map(|f| f.infer_confidence)),
            });
        }

        let confidence = mean(pages.iter().filter_map(|p| p.confidence));
        let pages = apply_page_options(pages, options);

        ParseResult {
            success: errors.len() < page_count as usize || page_count == 0,
            parser: ParserType::Clova.as_str().to_string(),
            page_count,
            content: ParsedContent {
                text: render_content(&pages, options.output_format),
                pages,
            },
            metadata: ParseMetadata {
                processing_time_ms: started.elapsed().as_millis() as u64,
                confidence,
                file_size,
                language: options.language.clone(),
                image_count: 0,
                scanned: true,
            },
            errors: (!errors.is_empty()).then_some(errors),
        }
    }
}

#[async_trait]
impl DocumentParser for ClovaParser {
    fn parser_type(&self) -> ParserType {
        ParserType::Clova
    }

    async fn parse(&self, buffer: &[u8], options: &ParseOptions) -> Result<ParseResult, ParserError> {
        let started = Instant::now();
        debug!("Clova OCR request: {} bytes", buffer.len());

        let response = self
            .http
            .post(&self.config.invoke_url)
            .header("X-OCR-SECRET", &self.config.secret)
            .timeout(self.timeout)
            .json(&Self::request_body(buffer, options))
            .send()
            .await
            .map_err(|e| ParserError::request(ParserType::Clova, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Clova OCR returned {}", status);
            return Err(ParserError::backend(
                ParserType::Clova,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let body: ClovaResponse = response
            .json()
            .await
            .map_err(|e| ParserError::request(ParserType::Clova, e))?;
        Ok(Self::into_result(body, options, buffer.len(), started))
    }
}
