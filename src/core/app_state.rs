use std::sync::Arc;

use crate::core::config::AppConfig;
use crate::core::jobs::JobStore;
use crate::crawlers::CrawlerFactory;
use crate::features::auth::AuthSessions;
use crate::features::history::QueryHistory;
use crate::features::rate_limit::RateLimiters;
use crate::features::sources::SourceRegistry;
use crate::parsers::ParserFactory;

#[derive(Clone)]
pub struct AppState {
    /// Immutable process configuration, built once at startup.
    pub config: Arc<AppConfig>,
    pub parsers: Arc<ParserFactory>,
    pub crawlers: Arc<CrawlerFactory>,
    // Long-running crawl jobs, expired after a day
    pub jobs: JobStore,
    pub history: Arc<QueryHistory>,
    pub auth: Arc<AuthSessions>,
    pub sources: Arc<SourceRegistry>,
    pub limiters: RateLimiters,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("environment", &self.config.environment)
            .field("features", &self.config.features)
            .field("parsers", &self.parsers)
            .finish()
    }
}

impl AppState {
    pub fn new(config: AppConfig, http_client: reqwest::Client) -> Self {
        let limiters = RateLimiters::in_memory(&config.rate_limits);
        Self {
            parsers: Arc::new(ParserFactory::new(config.parsers.clone(), http_client.clone())),
            crawlers: Arc::new(CrawlerFactory::new(config.crawler.clone(), http_client)),
            jobs: JobStore::new(),
            history: Arc::new(QueryHistory::default()),
            auth: Arc::new(AuthSessions::new(config.environment)),
            sources: Arc::new(SourceRegistry::empty()),
            limiters,
            config: Arc::new(config),
        }
    }

    pub fn with_sources(mut self, sources: SourceRegistry) -> Self {
        self.sources = Arc::new(sources);
        self
    }
}
