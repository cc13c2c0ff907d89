// pdf_text.rs - Local text-layer extraction for text-native PDFs
// Pure Rust (lopdf); no external service involved. Scanned pages come back
// with little or no text, which is what `DocumentProfile` uses to route
// uploads to OCR instead.

use std::time::Instant;

use async_trait::async_trait;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};

use super::{apply_page_options, detect_tables, render_content, DocumentParser, ParserError, ParserType};
use crate::core::types::{
    ExtractedImage, ParseMetadata, ParseOptions, ParseResult, ParsedContent, ParsedPage,
};

/// Average glyphs per page below which a document is treated as scanned.
const MIN_GLYPHS_PER_PAGE: usize = 40;

/// Cheap structural summary of a PDF used for parser selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentProfile {
    pub page_count: usize,
    /// Glyphs drawn by text-showing operators across all pages.
    pub text_chars: usize,
    pub image_count: usize,
    pub pages_without_text: usize,
}

impl DocumentProfile {
    pub fn inspect(buffer: &[u8]) -> Result<Self, ParserError> {
        let doc = load(buffer)?;
        let mut profile = DocumentProfile::default();
        for (_, page_id) in doc.get_pages() {
            let glyphs = page_glyph_count(&doc, page_id);
            profile.page_count += 1;
            profile.text_chars += glyphs;
            profile.image_count += page_images(&doc, page_id).len();
            if glyphs == 0 {
                profile.pages_without_text += 1;
            }
        }
        Ok(profile)
    }

    /// Enough text per page, and at most half the pages lack a text layer.
    pub fn is_text_native(&self) -> bool {
        self.page_count > 0
            && self.text_chars / self.page_count >= MIN_GLYPHS_PER_PAGE
            && self.pages_without_text * 2 <= self.page_count
    }
}

fn load(buffer: &[u8]) -> Result<Document, ParserError> {
    if !super::has_pdf_signature(buffer) {
        return Err(ParserError::Malformed(
            "file does not start with a PDF header".to_string(),
        ));
    }
    let doc = Document::load_mem(buffer).map_err(|e| ParserError::Malformed(e.to_string()))?;
    if doc.is_encrypted() {
        return Err(ParserError::Malformed("encrypted PDFs are not supported".to_string()));
    }
    Ok(doc)
}

fn string_len(obj: &Object) -> usize {
    match obj {
        Object::String(bytes, _) => bytes.len(),
        Object::Array(items) => items.iter().map(string_len).sum(),
        _ => 0,
    }
}

fn page_glyph_count(doc: &Document, page_id: ObjectId) -> usize {
    let Ok(raw) = doc.get_page_content(page_id) else {
        return 0;
    };
    let Ok(content) = Content::decode(&raw) else {
        return 0;
    };
    content
        .operations
        .iter()
        .filter(|op| matches!(op.operator.as_str(), "Tj" | "TJ" | "'" | "\""))
        .map(|op| op.operands.iter().map(string_len).sum::<usize>())
        .sum()
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Dictionary(dict) => Some(dict),
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        _ => None,
    }
}

/// Image XObjects referenced directly from the page's resources.
fn page_images(doc: &Document, page_id: ObjectId) -> Vec<ExtractedImage> {
    let Some(xobjects) = doc
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| page.get(b"Resources").ok())
        .and_then(|res| resolve_dict(doc, res))
        .and_then(|res| res.get(b"XObject").ok())
        .and_then(|xo| resolve_dict(doc, xo))
    else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(name, obj)| {
            let target = match obj {
                Object::Reference(id) => doc.get_object(*id).ok()?,
                other => other,
            };
            let Object::Stream(stream) = target else {
                return None;
            };
            let is_image = matches!(
                stream.dict.get(b"Subtype"),
                Ok(Object::Name(subtype)) if subtype.as_slice() == b"Image"
            );
            is_image.then(|| ExtractedImage {
                name: String::from_utf8_lossy(name).into_owned(),
                width: stream
                    .dict
                    .get(b"Width")
                    .ok()
                    .and_then(|w| w.as_i64().ok())
                    .and_then(|w| u32::try_from(w).ok()),
                height: stream
                    .dict
                    .get(b"Height")
                    .ok()
                    .and_then(|h| h.as_i64().ok())
                    .and_then(|h| u32::try_from(h).ok()),
            })
        })
        .collect()
}

fn extract(buffer: &[u8], options: &ParseOptions) -> Result<ParseResult, ParserError> {
    let started = Instant::now();
    let doc = load(buffer)?;
    let pages = doc.get_pages();
    let page_count = u32::try_from(pages.len()).unwrap_or(u32::MAX);

    let mut parsed = Vec::new();
    let mut errors = Vec::new();
    let mut image_count = 0usize;
    let mut glyphs = 0usize;

    for (&number, &page_id) in &pages {
        if options.page_range.is_some_and(|r| !r.contains(number)) {
            continue;
        }
        let text = match doc.extract_text(&[number]) {
            Ok(text) => text,
            Err(e) => {
                errors.push(format!("page {number}: {e}"));
                String::new()
            }
        };
        let images = page_images(&doc, page_id);
        image_count += images.len();
        glyphs += page_glyph_count(&doc, page_id);
        parsed.push(ParsedPage {
            page_number: number,
            tables: if options.extract_tables {
                detect_tables(&text)
            } else {
                Vec::new()
            },
            images,
            text,
            confidence: None,
        });
    }

    let processed = parsed.len();
    let scanned =
        processed > 0 && glyphs / processed < MIN_GLYPHS_PER_PAGE && image_count > 0;
    let pages = apply_page_options(parsed, options);

    Ok(ParseResult {
        success: processed == 0 || errors.len() < processed,
        parser: ParserType::PdfText.as_str().to_string(),
        page_count,
        content: ParsedContent {
            text: render_content(&pages, options.output_format),
            pages,
        },
        metadata: ParseMetadata {
            processing_time_ms: started.elapsed().as_millis() as u64,
            confidence: None,
            file_size: buffer.len(),
            language: options.language.clone(),
            image_count,
            scanned,
        },
        errors: (!errors.is_empty()).then_some(errors),
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextParser;

#[async_trait]
impl DocumentParser for PdfTextParser {
    fn parser_type(&self) -> ParserType {
        ParserType::PdfText
    }

    async fn parse(&self, buffer: &[u8], options: &ParseOptions) -> Result<ParseResult, ParserError> {
        let buffer = buffer.to_vec();
        let options = options.clone();
        tokio::task::spawn_blocking(move || extract(&buffer, &options))
            .await
            .map_err(|e| ParserError::backend(ParserType::PdfText, e))?
    }
}
