pub mod custom;
pub mod fetch;
pub mod listing;
pub mod nec_library;
pub mod politeness;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::core::config::CrawlerConfig;
use crate::core::error::ApiError;
use crate::core::types::{CrawlOptions, CrawlRecord};
use politeness::HostThrottle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlerType {
    NecLibrary,
    Custom,
    NecPolicy,
    NecStatistics,
    RoneReports,
    KosisPublications,
}

/// What the registry holds for a crawler type.
pub enum CrawlerSlot {
    Ready(fn(CrawlContext) -> Box<dyn Crawler>),
    Unimplemented,
}

impl CrawlerType {
    pub const ALL: [CrawlerType; 6] = [
        CrawlerType::NecLibrary,
        CrawlerType::Custom,
        CrawlerType::NecPolicy,
        CrawlerType::NecStatistics,
        CrawlerType::RoneReports,
        CrawlerType::KosisPublications,
    ];
    pub const IDS: &'static [&'static str] = &[
        "nec_library",
        "custom",
        "nec_policy",
        "nec_statistics",
        "rone_reports",
        "kosis_publications",
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CrawlerType::NecLibrary => "nec_library",
            CrawlerType::Custom => "custom",
            CrawlerType::NecPolicy => "nec_policy",
            CrawlerType::NecStatistics => "nec_statistics",
            CrawlerType::RoneReports => "rone_reports",
            CrawlerType::KosisPublications => "kosis_publications",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            CrawlerType::NecLibrary => "NEC election library",
            CrawlerType::Custom => "Custom site (selector driven)",
            CrawlerType::NecPolicy => "NEC policy archive",
            CrawlerType::NecStatistics => "NEC election statistics",
            CrawlerType::RoneReports => "R-ONE real-estate reports",
            CrawlerType::KosisPublications => "KOSIS publications",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == id.trim())
    }

    pub fn slot(self) -> CrawlerSlot {
        match self {
            CrawlerType::NecLibrary => CrawlerSlot::Ready(|ctx| {
                Box::new(nec_library::NecLibraryCrawler::new(ctx)) as Box<dyn Crawler>
            }),
            CrawlerType::Custom => {
                CrawlerSlot::Ready(|ctx| Box::new(custom::CustomCrawler::new(ctx)) as Box<dyn Crawler>)
            }
            CrawlerType::NecPolicy
            | CrawlerType::NecStatistics
            | CrawlerType::RoneReports
            | CrawlerType::KosisPublications => CrawlerSlot::Unimplemented,
        }
    }

    pub fn is_implemented(self) -> bool {
        matches!(self.slot(), CrawlerSlot::Ready(_))
    }
}

impl std::fmt::Display for CrawlerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("unknown crawler type: {0}")]
    Unknown(String),

    #[error("Crawler type '{0}' is not yet implemented")]
    NotImplemented(CrawlerType),

    #[error("invalid crawl options: {0}")]
    InvalidOptions(String),

    #[error("blocked while fetching {url}: {reason}")]
    Blocked { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("{url} exceeds the {limit}-byte download limit")]
    TooLarge { url: String, limit: u64 },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CrawlerError> for ApiError {
    fn from(err: CrawlerError) -> Self {
        match err {
            CrawlerError::Unknown(_) => ApiError::validation("crawlerType", err.to_string()),
            CrawlerError::InvalidOptions(msg) => ApiError::validation("options", msg),
            CrawlerError::Io(e) => ApiError::internal(e),
            e => ApiError::ServiceUnavailable(e.to_string()),
        }
    }
}

/// Everything a crawler needs from the process: the shared HTTP client, the
/// shared per-host throttle and the crawl settings.
#[derive(Clone)]
pub struct CrawlContext {
    pub http: reqwest::Client,
    pub throttle: Arc<HostThrottle>,
    pub config: CrawlerConfig,
}

impl CrawlContext {
    /// Requested page cap, bounded by the configured maximum.
    pub fn page_cap(&self, options: &CrawlOptions) -> usize {
        options
            .max_pages
            .unwrap_or(self.config.max_pages)
            .clamp(1, self.config.max_pages.max(1))
    }
}

#[async_trait]
pub trait Crawler: Send + Sync {
    fn crawler_type(&self) -> CrawlerType;

    /// Checks options that can be rejected before a job is queued.
    fn check_options(&self, _options: &CrawlOptions) -> Result<(), CrawlerError> {
        Ok(())
    }

    async fn run(&self, options: &CrawlOptions) -> Result<Vec<CrawlRecord>, CrawlerError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlerTypeInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub implemented: bool,
}

pub struct CrawlerFactory {
    ctx: CrawlContext,
}

impl CrawlerFactory {
    pub fn new(config: CrawlerConfig, http: reqwest::Client) -> Self {
        Self {
            ctx: CrawlContext {
                http,
                throttle: Arc::new(HostThrottle::new(config.host_delay)),
                config,
            },
        }
    }

    /// Every registered type, implemented or not, in registry order.
    pub fn available_types(&self) -> Vec<CrawlerTypeInfo> {
        CrawlerType::ALL
            .into_iter()
            .map(|t| CrawlerTypeInfo {
                id: t.as_str(),
                name: t.display_name(),
                implemented: t.is_implemented(),
            })
            .collect()
    }

    pub fn create(&self, id: &str) -> Result<Box<dyn Crawler>, CrawlerError> {
        let crawler_type = CrawlerType::from_id(id).ok_or_else(|| CrawlerError::Unknown(id.to_string()))?;
        match crawler_type.slot() {
            CrawlerSlot::Ready(build) => Ok(build(self.ctx.clone())),
            CrawlerSlot::Unimplemented => Err(CrawlerError::NotImplemented(crawler_type)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn factory() -> CrawlerFactory {
        CrawlerFactory::new(
            CrawlerConfig {
                host_delay: Duration::ZERO,
                max_pages: 10,
                download_dir: std::env::temp_dir(),
            },
            reqwest::Client::new(),
        )
    }

    #[test]
    fn registry_lists_every_type_in_order() {
        let ids: Vec<&str> = factory().available_types().iter().map(|t| t.id).collect();
        assert_eq!(ids, CrawlerType::IDS);
        assert_eq!(&ids[..2], &["nec_library", "custom"]);
    }

    #[test]
    fn unimplemented_types_fail_with_named_message() {
        let f = factory();
        for t in CrawlerType::ALL.into_iter().filter(|t| !t.is_implemented()) {
            let err = f.create(t.as_str()).err().unwrap();
            let msg = err.to_string();
            assert!(msg.contains("not yet implemented"), "{msg}");
            assert!(msg.contains(t.as_str()));

            let api: ApiError = err.into();
            assert_eq!(api.code(), "SERVICE_UNAVAILABLE");
        }
    }

    #[test]
    fn implemented_types_build() {
        let f = factory();
        assert_eq!(f.create("nec_library").unwrap().crawler_type(), CrawlerType::NecLibrary);
        assert_eq!(f.create("custom").unwrap().crawler_type(), CrawlerType::Custom);
        assert!(matches!(f.create("naver_news"), Err(CrawlerError::Unknown(_))));
    }

    #[test]
    fn page_cap_is_bounded_by_config() {
        let ctx = factory().ctx;
        let with = |n| CrawlOptions {
            max_pages: n,
            ..CrawlOptions::default()
        };
        assert_eq!(ctx.page_cap(&with(None)), 10);
        assert_eq!(ctx.page_cap(&with(Some(3))), 3);
        assert_eq!(ctx.page_cap(&with(Some(500))), 10);
        assert_eq!(ctx.page_cap(&with(Some(0))), 1);
    }
}
