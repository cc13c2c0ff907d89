use async_trait::async_trait;
use tracing::info;
use url::Url;

use super::listing::crawl_listing;
use super::{CrawlContext, Crawler, CrawlerError, CrawlerType};
use crate::core::types::{CrawlOptions, CrawlRecord, CrawlSelectors};

pub const DEFAULT_URL: &str = "https://library.nec.go.kr/board/list.do?bbsId=BBSMSTR_000000000001";

/// Layout of the NEC library board listing.
pub fn board_selectors() -> CrawlSelectors {
    CrawlSelectors {
        item: "table.board_list tbody tr".into(),
        title: Some("td.subject a, td.title a".into()),
        link: Some("td.subject a, td.title a".into()),
        date: Some("td.date".into()),
        attachment: Some("a[href*='fileDown'], a[href*='download']".into()),
        next_page: Some("div.paging a.next, a.direction.next".into()),
    }
}

/// Publications board of the National Election Commission library.
pub struct NecLibraryCrawler {
    ctx: CrawlContext,
}

impl NecLibraryCrawler {
    pub fn new(ctx: CrawlContext) -> Self {
        Self { ctx }
    }

    fn start_url(options: &CrawlOptions) -> Result<Url, CrawlerError> {
        let raw = options.url.as_deref().unwrap_or(DEFAULT_URL);
        Url::parse(raw).map_err(|e| CrawlerError::InvalidOptions(format!("url: {e}")))
    }
}

#[async_trait]
impl Crawler for NecLibraryCrawler {
    fn crawler_type(&self) -> CrawlerType {
        CrawlerType::NecLibrary
    }

    fn check_options(&self, options: &CrawlOptions) -> Result<(), CrawlerError> {
        Self::start_url(options).map(|_| ())
    }

    async fn run(&self, options: &CrawlOptions) -> Result<Vec<CrawlRecord>, CrawlerError> {
        let start = Self::start_url(options)?;
        let max_pages = self.ctx.page_cap(options);
        info!("NEC library crawl from {} (max {} pages)", start, max_pages);
        crawl_listing(
            &self.ctx,
            start,
            &board_selectors(),
            max_pages,
            options.download_attachments,
        )
        .await
    }
}
