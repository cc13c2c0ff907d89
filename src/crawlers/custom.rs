use async_trait::async_trait;
use tracing::info;
use url::Url;

use super::listing::{check_selectors, crawl_listing};
use super::{CrawlContext, Crawler, CrawlerError, CrawlerType};
use crate::core::types::{CrawlOptions, CrawlRecord, CrawlSelectors};

/// Crawls any listing page described by caller-supplied selectors.
/// Both `url` and `selectors` are required.
pub struct CustomCrawler {
    ctx: CrawlContext,
}

impl CustomCrawler {
    pub fn new(ctx: CrawlContext) -> Self {
        Self { ctx }
    }

    fn target(options: &CrawlOptions) -> Result<(Url, &CrawlSelectors), CrawlerError> {
        let raw = options
            .url
            .as_deref()
            .ok_or_else(|| CrawlerError::InvalidOptions("url is required for custom crawls".into()))?;
        let url = Url::parse(raw).map_err(|e| CrawlerError::InvalidOptions(format!("url: {e}")))?;
        let selectors = options.selectors.as_ref().ok_or_else(|| {
            CrawlerError::InvalidOptions("selectors are required for custom crawls".into())
        })?;
        check_selectors(selectors)?;
        Ok((url, selectors))
    }
}

#[async_trait]
impl Crawler for CustomCrawler {
    fn crawler_type(&self) -> CrawlerType {
        CrawlerType::Custom
    }

    fn check_options(&self, options: &CrawlOptions) -> Result<(), CrawlerError> {
        Self::target(options).map(|_| ())
    }

    async fn run(&self, options: &CrawlOptions) -> Result<Vec<CrawlRecord>, CrawlerError> {
        let (start, selectors) = Self::target(options)?;
        let max_pages = self.ctx.page_cap(options);
        info!("Custom crawl from {} (max {} pages)", start, max_pages);
        crawl_listing(
            &self.ctx,
            start,
            selectors,
            max_pages,
            options.download_attachments,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CrawlerConfig;
    use crate::crawlers::CrawlerFactory;

    fn crawler() -> Box<dyn Crawler> {
        CrawlerFactory::new(CrawlerConfig::default(), reqwest::Client::new())
            .create("custom")
            .unwrap()
    }

    #[test]
    fn url_and_selectors_are_required() {
        let c = crawler();
        let err = c.check_options(&CrawlOptions::default()).unwrap_err();
        assert!(err.to_string().contains("url is required"));

        let options = CrawlOptions {
            url: Some("https://example.kr/list".into()),
            ..CrawlOptions::default()
        };
        let err = c.check_options(&options).unwrap_err();
        assert!(err.to_string().contains("selectors are required"));

        let options = CrawlOptions {
            selectors: Some(CrawlSelectors {
                item: "ul > li".into(),
                ..CrawlSelectors::default()
            }),
            ..options
        };
        c.check_options(&options).unwrap();
    }

    #[tokio::test]
    async fn run_rejects_bad_selectors_without_fetching() {
        let options = CrawlOptions {
            url: Some("https://example.invalid/list".into()),
            selectors: Some(CrawlSelectors {
                item: ":::".into(),
                ..CrawlSelectors::default()
            }),
            ..CrawlOptions::default()
        };
        let err = crawler().run(&options).await.unwrap_err();
        assert!(matches!(err, CrawlerError::InvalidOptions(_)));
    }
}
