pub mod clova;
pub mod pdf_text;
pub mod upstage;

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::config::ParserConfig;
use crate::core::error::ApiError;
use crate::core::types::{ExtractedTable, ParseOptions, ParseOutputFormat, ParseResult, ParsedPage};

pub use pdf_text::{DocumentProfile, PdfTextParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserType {
    PdfText,
    Upstage,
    Clova,
}

impl ParserType {
    /// Registry order. Also the OCR preference order for scanned documents.
    pub const ALL: [ParserType; 3] = [ParserType::PdfText, ParserType::Upstage, ParserType::Clova];
    pub const IDS: &'static [&'static str] = &["pdf_text", "upstage", "clova"];

    pub fn as_str(self) -> &'static str {
        match self {
            ParserType::PdfText => "pdf_text",
            ParserType::Upstage => "upstage",
            ParserType::Clova => "clova",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == id.trim())
    }

    pub fn is_ocr(self) -> bool {
        !matches!(self, ParserType::PdfText)
    }
}

impl std::fmt::Display for ParserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("unsupported parser: {0}")]
    Unsupported(String),

    #[error("parser '{0}' is disabled")]
    Disabled(ParserType),

    #[error("no document parser backend is available")]
    NoneAvailable,

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("{parser} backend error: {message}")]
    Backend { parser: ParserType, message: String },

    #[error("{0} did not respond before the parse timeout")]
    Timeout(ParserType),
}

impl ParserError {
    pub fn backend(parser: ParserType, message: impl std::fmt::Display) -> Self {
        Self::Backend {
            parser,
            message: message.to_string(),
        }
    }

    /// Maps a remote-backend transport error, keeping timeouts distinct.
    pub fn request(parser: ParserType, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(parser)
        } else {
            Self::backend(parser, err)
        }
    }
}

impl From<ParserError> for ApiError {
    fn from(err: ParserError) -> Self {
        match err {
            ParserError::Unsupported(id) => ApiError::UnsupportedParser(id),
            ParserError::Disabled(parser) => ApiError::FeatureDisabled(parser.as_str().to_string()),
            ParserError::NoneAvailable => ApiError::FeatureDisabled("ocr_parsing".to_string()),
            ParserError::Malformed(msg) => ApiError::Parse(msg),
            e @ (ParserError::Backend { .. } | ParserError::Timeout(_)) => {
                ApiError::ServiceUnavailable(e.to_string())
            }
        }
    }
}

#[async_trait]
pub trait DocumentParser: Send + Sync {
    fn parser_type(&self) -> ParserType;

    async fn parse(&self, buffer: &[u8], options: &ParseOptions) -> Result<ParseResult, ParserError>;
}

const PDF_MAGIC: &[u8] = b"%PDF-";

/// True when the buffer starts with the PDF header (leading whitespace tolerated).
pub fn has_pdf_signature(buffer: &[u8]) -> bool {
    let start = buffer
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(buffer.len());
    buffer[start..].starts_with(PDF_MAGIC)
}

pub struct ParserFactory {
    config: ParserConfig,
    http: reqwest::Client,
}

impl std::fmt::Debug for ParserFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserFactory")
            .field("available", &self.available_parsers())
            .finish()
    }
}

impl ParserFactory {
    pub fn new(config: ParserConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub fn is_enabled(&self, parser: ParserType) -> bool {
        match parser {
            ParserType::PdfText => self.config.pdf_text_enabled,
            ParserType::Upstage => self.config.upstage.is_some(),
            ParserType::Clova => self.config.clova.is_some(),
        }
    }

    /// Parsers usable with the current configuration, in registry order.
    pub fn available_parsers(&self) -> Vec<ParserType> {
        ParserType::ALL
            .into_iter()
            .filter(|p| self.is_enabled(*p))
            .collect()
    }

    fn build(&self, parser: ParserType) -> Result<Arc<dyn DocumentParser>, ParserError> {
        match parser {
            ParserType::PdfText if self.config.pdf_text_enabled => Ok(Arc::new(PdfTextParser)),
            ParserType::Upstage => match &self.config.upstage {
                Some(cfg) => Ok(Arc::new(upstage::UpstageParser::new(
                    self.http.clone(),
                    cfg.clone(),
                    self.config.timeout,
                ))),
                None => Err(ParserError::Disabled(parser)),
            },
            ParserType::Clova => match &self.config.clova {
                Some(cfg) => Ok(Arc::new(clova::ClovaParser::new(
                    self.http.clone(),
                    cfg.clone(),
                    self.config.timeout,
                ))),
                None => Err(ParserError::Disabled(parser)),
            },
            ParserType::PdfText => Err(ParserError::Disabled(parser)),
        }
    }

    /// Instantiates a parser by identifier.
    pub fn create(&self, id: &str) -> Result<Arc<dyn DocumentParser>, ParserError> {
        let parser = ParserType::from_id(id).ok_or_else(|| ParserError::Unsupported(id.to_string()))?;
        self.build(parser)
    }

    /// Picks a parser for `buffer` when the caller did not name one.
    ///
    /// Text-native PDFs go to the local extractor; scanned or image-heavy
    /// documents go to the first configured OCR backend. When the preferred
    /// kind is unavailable any available parser is used. Non-PDF input fails
    /// with `Malformed`, and a configuration with no parsers fails with
    /// `NoneAvailable`.
    pub async fn select_best(&self, buffer: &[u8]) -> Result<Arc<dyn DocumentParser>, ParserError> {
        if !has_pdf_signature(buffer) {
            return Err(ParserError::Malformed(
                "file does not start with a PDF header".to_string(),
            ));
        }

        let available = self.available_parsers();
        if available.is_empty() {
            return Err(ParserError::NoneAvailable);
        }

        let owned = buffer.to_vec();
        let profile = tokio::task::spawn_blocking(move || DocumentProfile::inspect(&owned))
            .await
            .map_err(|e| ParserError::backend(ParserType::PdfText, e))??;
        let wants_ocr = !profile.is_text_native();
        debug!(
            pages = profile.page_count,
            text_chars = profile.text_chars,
            images = profile.image_count,
            wants_ocr,
            "profiled upload"
        );

        let chosen = available
            .iter()
            .copied()
            .find(|p| p.is_ocr() == wants_ocr)
            .unwrap_or(available[0]);
        info!("Selected parser {} (scanned: {})", chosen, wants_ocr);
        self.build(chosen)
    }
}

// ---------------------------------------------------------------------------
// Shared post-processing
// ---------------------------------------------------------------------------

static CELL_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\t+|\s{2,}").expect("static regex"));

/// Finds runs of at least two consecutive lines that split into the same
/// number (>= 2) of whitespace-aligned cells.
pub fn detect_tables(text: &str) -> Vec<ExtractedTable> {
    let mut tables = Vec::new();
    let mut current: Vec<Vec<String>> = Vec::new();

    let mut flush = |current: &mut Vec<Vec<String>>| {
        if current.len() >= 2 {
            tables.push(ExtractedTable {
                rows: std::mem::take(current),
            });
        } else {
            current.clear();
        }
    };

    for line in text.lines() {
        let cells: Vec<String> = CELL_SPLIT
            .split(line.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        let continues = cells.len() >= 2
            && current
                .first()
                .map_or(true, |first: &Vec<String>| first.len() == cells.len());
        if continues {
            current.push(cells);
        } else {
            flush(&mut current);
            if cells.len() >= 2 {
                current.push(cells);
            }
        }
    }
    flush(&mut current);
    tables
}

fn markdown_table(table: &ExtractedTable) -> String {
    let mut out = String::new();
    for (i, row) in table.rows.iter().enumerate() {
        out.push_str("| ");
        out.push_str(&row.join(" | "));
        out.push_str(" |\n");
        if i == 0 {
            out.push_str(&format!("|{}\n", " --- |".repeat(row.len())));
        }
    }
    out
}

/// Renders the top-level `content.text` for the requested output format.
pub fn render_content(pages: &[ParsedPage], format: ParseOutputFormat) -> String {
    match format {
        ParseOutputFormat::Text => pages
            .iter()
            .map(|p| p.text.trim())
            .collect::<Vec<_>>()
            .join("\n\n"),
        ParseOutputFormat::Markdown => {
            let mut out = String::new();
            for page in pages {
                out.push_str(&format!("## Page {}\n\n", page.page_number));
                out.push_str(page.text.trim());
                out.push_str("\n\n");
                for table in &page.tables {
                    out.push_str(&markdown_table(table));
                    out.push('\n');
                }
            }
            out.trim_end().to_string()
        }
        ParseOutputFormat::Json => String::new(),
    }
}

/// Applies `page_range` and the table/image extraction flags to OCR output.
pub fn apply_page_options(pages: Vec<ParsedPage>, options: &ParseOptions) -> Vec<ParsedPage> {
    pages
        .into_iter()
        .filter(|p| options.page_range.map_or(true, |r| r.contains(p.page_number)))
        .map(|mut p| {
            if !options.extract_tables {
                p.tables.clear();
            } else if p.tables.is_empty() {
                p.tables = detect_tables(&p.text);
            }
            if !options.extract_images {
                p.images.clear();
            }
            p
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ClovaConfig, UpstageConfig};
    use crate::core::types::PageRange;

    fn factory(pdf: bool, upstage: bool, clova: bool) -> ParserFactory {
        let config = ParserConfig {
            pdf_text_enabled: pdf,
            upstage: upstage.then(|| UpstageConfig {
                api_key: "key".into(),
                api_url: "https://ocr.invalid/v1".into(),
            }),
            clova: clova.then(|| ClovaConfig {
                secret: "secret".into(),
                invoke_url: "https://clova.invalid/general".into(),
            }),
            ..ParserConfig::default()
        };
        ParserFactory::new(config, reqwest::Client::new())
    }

    #[test]
    fn ids_round_trip_through_registry() {
        for (t, id) in ParserType::ALL.iter().zip(ParserType::IDS) {
            assert_eq!(t.as_str(), *id);
            assert_eq!(ParserType::from_id(id), Some(*t));
        }
        assert_eq!(ParserType::from_id("tesseract"), None);
    }

    #[test]
    fn available_parsers_follow_config() {
        assert_eq!(factory(true, false, false).available_parsers(), vec![ParserType::PdfText]);
        assert_eq!(
            factory(false, true, true).available_parsers(),
            vec![ParserType::Upstage, ParserType::Clova]
        );
        assert!(factory(false, false, false).available_parsers().is_empty());
    }

    #[test]
    fn create_distinguishes_unknown_from_disabled() {
        let f = factory(true, false, false);
        assert!(matches!(f.create("nope"), Err(ParserError::Unsupported(_))));
        assert!(matches!(
            f.create("upstage"),
            Err(ParserError::Disabled(ParserType::Upstage))
        ));
        assert_eq!(f.create("pdf_text").unwrap().parser_type(), ParserType::PdfText);

        let api: ApiError = f.create("clova").err().unwrap().into();
        assert_eq!(api.code(), "FEATURE_DISABLED");
        let api: ApiError = f.create("nope").err().unwrap().into();
        assert_eq!(api.code(), "UNSUPPORTED_PARSER");
    }

    #[tokio::test]
    async fn select_best_rejects_non_pdf_and_empty_config() {
        let err = factory(true, true, false)
            .select_best(b"PK\x03\x04zip")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ParserError::Malformed(_)));

        let err = factory(false, false, false)
            .select_best(pdf_text::tests::single_page_pdf("Hi").as_slice())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ParserError::NoneAvailable));
    }

    #[tokio::test]
    async fn select_best_prefers_local_parser_for_text_pdfs() {
        let pdf = pdf_text::tests::single_page_pdf(&"Quarterly housing price index ".repeat(6));
        let chosen = factory(true, true, true).select_best(&pdf).await.unwrap();
        assert_eq!(chosen.parser_type(), ParserType::PdfText);
    }

    #[tokio::test]
    async fn select_best_sends_textless_pdfs_to_ocr_and_falls_back() {
        let pdf = pdf_text::tests::single_page_pdf("");
        let chosen = factory(true, false, true).select_best(&pdf).await.unwrap();
        assert_eq!(chosen.parser_type(), ParserType::Clova);

        let chosen = factory(true, false, false).select_best(&pdf).await.unwrap();
        assert_eq!(chosen.parser_type(), ParserType::PdfText);
    }

    #[test]
    fn pdf_signature_tolerates_leading_whitespace() {
        assert!(has_pdf_signature(b"%PDF-1.7\n"));
        assert!(has_pdf_signature(b"\r\n %PDF-1.4"));
        assert!(!has_pdf_signature(b"<html>"));
        assert!(!has_pdf_signature(b""));
    }

    #[test]
    fn tables_need_two_aligned_rows() {
        let text = "Summary line\n지역    2023    2024\n서울    101.2    99.8\n부산    97.1    96.0\nfooter";
        let tables = detect_tables(text);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows.len(), 3);
        assert_eq!(tables[0].rows[1], vec!["서울", "101.2", "99.8"]);

        assert!(detect_tables("a  b\nplain text\nc  d").is_empty());
    }

    #[test]
    fn page_options_filter_range_and_flags() {
        let pages: Vec<ParsedPage> = (1..=4)
            .map(|n| ParsedPage {
                page_number: n,
                text: format!("a  b\nc  d page {n}"),
                ..ParsedPage::default()
            })
            .collect();
        let options = ParseOptions {
            page_range: Some(PageRange { start: 2, end: 3 }),
            extract_tables: false,
            ..ParseOptions::default()
        };
        let out = apply_page_options(pages, &options);
        assert_eq!(out.iter().map(|p| p.page_number).collect::<Vec<_>>(), vec![2, 3]);
        assert!(out.iter().all(|p| p.tables.is_empty()));
    }

    #[test]
    fn markdown_rendering_includes_page_headers_and_tables() {
        let page = ParsedPage {
            page_number: 1,
            text: "Intro".into(),
            tables: vec![ExtractedTable {
                rows: vec![vec!["h1".into(), "h2".into()], vec!["1".into(), "2".into()]],
            }],
            ..ParsedPage::default()
        };
        let md = render_content(&[page], ParseOutputFormat::Markdown);
        assert!(md.starts_with("## Page 1\n\nIntro"));
        assert!(md.contains("| h1 | h2 |\n| --- | --- |\n| 1 | 2 |"));
    }
}
