// listing.rs - Selector-driven board/listing crawl
// Both the NEC library crawler and the custom crawler are a listing page,
// one element per record, and an optional "next page" link.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use tracing::{info, warn};
use url::Url;

use super::fetch::{download_attachment, fetch_html, resolve_url};
use super::{CrawlContext, CrawlerError};
use crate::core::types::{Attachment, CrawlRecord, CrawlSelectors};

fn compile(field: &str, raw: &str) -> Result<Selector, CrawlerError> {
    Selector::parse(raw)
        .map_err(|e| CrawlerError::InvalidOptions(format!("selectors.{field}: {e}")))
}

fn compile_opt(field: &str, raw: Option<&str>) -> Result<Option<Selector>, CrawlerError> {
    raw.map(|r| compile(field, r)).transpose()
}

/// Parsed form of [`CrawlSelectors`]. Built per page because `Html` is not
/// `Send` and must not live across an await.
struct CompiledSelectors {
    item: Selector,
    title: Option<Selector>,
    link: Option<Selector>,
    date: Option<Selector>,
    attachment: Option<Selector>,
    next_page: Option<Selector>,
}

impl CompiledSelectors {
    fn compile(s: &CrawlSelectors) -> Result<Self, CrawlerError> {
        Ok(Self {
            item: compile("item", &s.item)?,
            title: compile_opt("title", s.title.as_deref())?,
            link: compile_opt("link", s.link.as_deref())?,
            date: compile_opt("date", s.date.as_deref())?,
            attachment: compile_opt("attachment", s.attachment.as_deref())?,
            next_page: compile_opt("nextPage", s.next_page.as_deref())?,
        })
    }
}

/// Rejects selectors that do not parse, before any request goes out.
pub fn check_selectors(selectors: &CrawlSelectors) -> Result<(), CrawlerError> {
    CompiledSelectors::compile(selectors).map(|_| ())
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .map(element_text)
        .find(|t| !t.is_empty())
}

fn first_href(scope: ElementRef<'_>, selector: Option<&Selector>, base: &Url) -> Option<Url> {
    if scope.value().name() == "a" {
        if let Some(url) = scope.value().attr("href").and_then(|h| resolve_url(base, h)) {
            return Some(url);
        }
    }
    let fallback;
    let selector = match selector {
        Some(s) => s,
        None => {
            fallback = Selector::parse("a[href]").ok()?;
            &fallback
        }
    };
    scope
        .select(selector)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|h| resolve_url(base, h))
}

/// Records on one listing page plus the next page's URL, if any.
pub fn extract_page(
    html: &str,
    page_url: &Url,
    selectors: &CrawlSelectors,
) -> Result<(Vec<CrawlRecord>, Option<Url>), CrawlerError> {
    let sel = CompiledSelectors::compile(selectors)?;
    let document = Html::parse_document(html);
    let mut records = Vec::new();

    for item in document.select(&sel.item) {
        let title = match &sel.title {
            Some(s) => first_text(item, s),
            None => Some(element_text(item)).filter(|t| !t.is_empty()),
        };
        let Some(title) = title else {
            continue;
        };

        let url = first_href(item, sel.link.as_ref(), page_url)
            .map(|u| u.to_string())
            .unwrap_or_else(|| page_url.to_string());

        let attachments = sel
            .attachment
            .as_ref()
            .map(|s| {
                item.select(s)
                    .filter_map(|a| {
                        let href = resolve_url(page_url, a.value().attr("href")?)?;
                        let name = element_text(a);
                        Some(Attachment {
                            name: if name.is_empty() {
                                href.path_segments()
                                    .and_then(|mut p| p.next_back())
                                    .unwrap_or("attachment")
                                    .to_string()
                            } else {
                                name
                            },
                            url: href.to_string(),
                            saved_path: None,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        records.push(CrawlRecord {
            title,
            url,
            date: sel.date.as_ref().and_then(|s| first_text(item, s)),
            attachments,
            source_page: page_url.to_string(),
        });
    }

    let next = sel.next_page.as_ref().and_then(|s| {
        document
            .select(s)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|h| resolve_url(page_url, h))
    });
    Ok((records, next))
}

/// Walks the listing from `start`, following next-page links until none is
/// found, a page repeats, or `max_pages` pages have been read.
pub async fn crawl_listing(
    ctx: &CrawlContext,
    start: Url,
    selectors: &CrawlSelectors,
    max_pages: usize,
    download_attachments: bool,
) -> Result<Vec<CrawlRecord>, CrawlerError> {
    let mut records = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(start);

    while let Some(page_url) = next.take() {
        if visited.len() >= max_pages || !visited.insert(page_url.to_string()) {
            break;
        }
        let html = fetch_html(&ctx.http, &ctx.throttle, &page_url).await?;
        let (page_records, next_page) = extract_page(&html, &page_url, selectors)?;
        info!(
            "Crawled {} ({} records, page {}/{})",
            page_url,
            page_records.len(),
            visited.len(),
            max_pages
        );
        records.extend(page_records);
        next = next_page;
    }

    if download_attachments {
        for record in &mut records {
            for attachment in &mut record.attachments {
                let Ok(url) = Url::parse(&attachment.url) else {
                    continue;
                };
                match download_attachment(
                    &ctx.http,
                    &ctx.throttle,
                    &url,
                    &attachment.name,
                    &ctx.config.download_dir,
                )
                .await
                {
                    Ok(path) => attachment.saved_path = Some(path.display().to_string()),
                    Err(e) => warn!("Attachment download failed for {}: {}", attachment.url, e),
                }
            }
        }
    }

    Ok(records)
}
