use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// FileConfig: `datahub.json` loader with env-var fallback
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "DATAHUB_CONFIG";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Window/threshold pair as written in the config file.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct FileWindow {
    pub window_secs: Option<u64>,
    pub max: Option<u32>,
}

#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct FileFeatures {
    pub nl_query: Option<bool>,
    pub ocr_parsing: Option<bool>,
    pub crawling: Option<bool>,
}

#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct FileRateLimits {
    #[serde(default)]
    pub general: FileWindow,
    #[serde(default)]
    pub query: FileWindow,
    #[serde(default)]
    pub auth: FileWindow,
    /// Key clients on the first `X-Forwarded-For` hop.
    pub trust_proxy: Option<bool>,
}

#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct FileParsers {
    pub pdf_text_enabled: Option<bool>,
    /// Upstage key. Never logged.
    pub upstage_api_key: Option<String>,
    pub upstage_api_url: Option<String>,
    /// Clova OCR secret. Never logged.
    pub clova_secret: Option<String>,
    pub clova_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_upload_bytes: Option<usize>,
}

#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct FileCrawler {
    pub delay_ms: Option<u64>,
    pub max_pages: Option<usize>,
    pub download_dir: Option<String>,
}

/// Top-level shape of `datahub.json`. Every field is optional.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct FileConfig {
    pub environment: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub features: FileFeatures,
    #[serde(default)]
    pub rate_limits: FileRateLimits,
    #[serde(default)]
    pub parsers: FileParsers,
    #[serde(default)]
    pub crawler: FileCrawler,
    pub export_dir: Option<String>,
    pub sources_path: Option<String>,
    pub http_timeout_secs: Option<u64>,
    pub http_connect_timeout_secs: Option<u64>,
}

/// Load `datahub.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `DATAHUB_CONFIG` env var path
/// 2. `./datahub.json`
/// 3. `../datahub.json`
///
/// Missing file → `FileConfig::default()` (env-var fallbacks apply).
/// Parse error → warning, then `FileConfig::default()`.
pub fn load_file_config() -> FileConfig {
    let mut candidates = vec![
        PathBuf::from("datahub.json"),
        PathBuf::from("../datahub.json"),
    ];
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        candidates.insert(0, PathBuf::from(env_path));
    }

    for path in &candidates {
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        match serde_json::from_str::<FileConfig>(&contents) {
            Ok(cfg) => {
                tracing::info!("datahub.json loaded from {}", path.display());
                return cfg;
            }
            Err(e) => {
                tracing::warn!(
                    "datahub.json parse error at {}: {}; using env/defaults",
                    path.display(),
                    e
                );
                return FileConfig::default();
            }
        }
    }

    FileConfig::default()
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Reads a boolean toggle. Accepts `1/true/yes/on` and `0/false/no/off/disabled`.
fn env_flag(key: &str) -> Option<bool> {
    parse_flag(&env_string(key)?)
}

pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// AppConfig: resolved, immutable process settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    NlQuery,
    OcrParsing,
    Crawling,
}

impl Feature {
    pub fn as_str(self) -> &'static str {
        match self {
            Feature::NlQuery => "nl_query",
            Feature::OcrParsing => "ocr_parsing",
            Feature::Crawling => "crawling",
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    pub nl_query: bool,
    pub ocr_parsing: bool,
    pub crawling: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            nl_query: true,
            ocr_parsing: true,
            crawling: true,
        }
    }
}

impl FeatureFlags {
    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::NlQuery => self.nl_query,
            Feature::OcrParsing => self.ocr_parsing,
            Feature::Crawling => self.crawling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub window: Duration,
    pub max: u32,
}

impl WindowConfig {
    pub fn new(window_secs: u64, max: u32) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            max,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub general: WindowConfig,
    pub query: WindowConfig,
    pub auth: WindowConfig,
    /// Off unless the server sits behind a proxy that overwrites
    /// `X-Forwarded-For`; clients can set the header themselves.
    pub trust_proxy: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general: WindowConfig::new(60, 100),
            query: WindowConfig::new(30, 20),
            auth: WindowConfig::new(15 * 60, 5),
            trust_proxy: false,
        }
    }
}

#[derive(Clone)]
pub struct UpstageConfig {
    pub api_key: String,
    pub api_url: String,
}

#[derive(Clone)]
pub struct ClovaConfig {
    pub secret: String,
    pub invoke_url: String,
}

#[derive(Clone)]
pub struct ParserConfig {
    pub pdf_text_enabled: bool,
    pub upstage: Option<UpstageConfig>,
    pub clova: Option<ClovaConfig>,
    pub timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            pdf_text_enabled: true,
            upstage: None,
            clova: None,
            timeout: Duration::from_secs(120),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserConfig")
            .field("pdf_text_enabled", &self.pdf_text_enabled)
            .field("upstage_enabled", &self.upstage.is_some())
            .field("clova_enabled", &self.clova.is_some())
            .field("timeout", &self.timeout)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Minimum spacing between two requests to the same host.
    pub host_delay: Duration,
    pub max_pages: usize,
    pub download_dir: PathBuf,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            host_delay: Duration::from_millis(1000),
            max_pages: 50,
            download_dir: PathBuf::from("downloads"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub port: u16,
    pub features: FeatureFlags,
    pub rate_limits: RateLimitConfig,
    pub parsers: ParserConfig,
    pub crawler: CrawlerConfig,
    pub export_dir: PathBuf,
    pub sources_path: Option<PathBuf>,
    pub http_timeout: Duration,
    pub http_connect_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            port: 4000,
            features: FeatureFlags::default(),
            rate_limits: RateLimitConfig::default(),
            parsers: ParserConfig::default(),
            crawler: CrawlerConfig::default(),
            export_dir: PathBuf::from("exports"),
            sources_path: None,
            http_timeout: Duration::from_secs(30),
            http_connect_timeout: Duration::from_secs(10),
        }
    }
}

impl AppConfig {
    /// Builds the process configuration once: `datahub.json` → env → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::resolve(load_file_config());
        config.validate()?;
        Ok(config)
    }

    /// Resolves every field as JSON value → environment variable → default.
    pub fn resolve(file: FileConfig) -> Self {
        let defaults = AppConfig::default();
        let rl = RateLimitConfig::default();

        let window = |f: &FileWindow, secs_env: &str, max_env: &str, d: WindowConfig| {
            WindowConfig {
                window: Duration::from_secs(
                    f.window_secs
                        .or_else(|| env_parse(secs_env))
                        .unwrap_or(d.window.as_secs()),
                ),
                max: f.max.or_else(|| env_parse(max_env)).unwrap_or(d.max),
            }
        };

        let upstage = file
            .parsers
            .upstage_api_key
            .clone()
            .or_else(|| env_string("UPSTAGE_API_KEY"))
            .map(|api_key| UpstageConfig {
                api_key,
                api_url: file
                    .parsers
                    .upstage_api_url
                    .clone()
                    .or_else(|| env_string("UPSTAGE_API_URL"))
                    .unwrap_or_else(|| {
                        "https://api.upstage.ai/v1/document-digitization".to_string()
                    }),
            });

        let clova_secret = file
            .parsers
            .clova_secret
            .clone()
            .or_else(|| env_string("CLOVA_OCR_SECRET"));
        let clova_url = file
            .parsers
            .clova_url
            .clone()
            .or_else(|| env_string("CLOVA_OCR_URL"));
        let clova = match (clova_secret, clova_url) {
            (Some(secret), Some(invoke_url)) => Some(ClovaConfig { secret, invoke_url }),
            _ => None,
        };

        AppConfig {
            environment: file
                .environment
                .or_else(|| env_string("APP_ENV"))
                .map(|e| Environment::parse(&e))
                .unwrap_or(defaults.environment),
            port: file
                .port
                .or_else(|| env_parse("PORT"))
                .unwrap_or(defaults.port),
            features: FeatureFlags {
                nl_query: file
                    .features
                    .nl_query
                    .or_else(|| env_flag("ENABLE_NL_QUERY"))
                    .unwrap_or(true),
                ocr_parsing: file
                    .features
                    .ocr_parsing
                    .or_else(|| env_flag("ENABLE_OCR_PARSING"))
                    .unwrap_or(true),
                crawling: file
                    .features
                    .crawling
                    .or_else(|| env_flag("ENABLE_CRAWLING"))
                    .unwrap_or(true),
            },
            rate_limits: RateLimitConfig {
                general: window(
                    &file.rate_limits.general,
                    "RATE_LIMIT_WINDOW_SECS",
                    "RATE_LIMIT_MAX",
                    rl.general,
                ),
                query: window(
                    &file.rate_limits.query,
                    "QUERY_RATE_LIMIT_WINDOW_SECS",
                    "QUERY_RATE_LIMIT_MAX",
                    rl.query,
                ),
                auth: window(
                    &file.rate_limits.auth,
                    "AUTH_RATE_LIMIT_WINDOW_SECS",
                    "AUTH_RATE_LIMIT_MAX",
                    rl.auth,
                ),
                trust_proxy: file
                    .rate_limits
                    .trust_proxy
                    .or_else(|| env_flag("TRUST_PROXY"))
                    .unwrap_or(rl.trust_proxy),
            },
            parsers: ParserConfig {
                pdf_text_enabled: file
                    .parsers
                    .pdf_text_enabled
                    .or_else(|| env_flag("PDF_TEXT_PARSER_ENABLED"))
                    .unwrap_or(true),
                upstage,
                clova,
                timeout: Duration::from_secs(
                    file.parsers
                        .timeout_secs
                        .or_else(|| env_parse("PARSE_TIMEOUT_SECS"))
                        .unwrap_or(defaults.parsers.timeout.as_secs()),
                ),
                max_upload_bytes: file
                    .parsers
                    .max_upload_bytes
                    .or_else(|| env_parse("MAX_UPLOAD_BYTES"))
                    .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            },
            crawler: CrawlerConfig {
                host_delay: Duration::from_millis(
                    file.crawler
                        .delay_ms
                        .or_else(|| env_parse("CRAWL_DELAY_MS"))
                        .unwrap_or(1000),
                ),
                max_pages: file
                    .crawler
                    .max_pages
                    .or_else(|| env_parse("CRAWL_MAX_PAGES"))
                    .unwrap_or(defaults.crawler.max_pages),
                download_dir: file
                    .crawler
                    .download_dir
                    .or_else(|| env_string("CRAWL_DOWNLOAD_DIR"))
                    .map(PathBuf::from)
                    .unwrap_or(defaults.crawler.download_dir),
            },
            export_dir: file
                .export_dir
                .or_else(|| env_string("EXPORT_DIR"))
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
            sources_path: file
                .sources_path
                .or_else(|| env_string("API_SOURCES_PATH"))
                .map(PathBuf::from),
            http_timeout: Duration::from_secs(
                file.http_timeout_secs
                    .or_else(|| env_parse("HTTP_TIMEOUT_SECS"))
                    .unwrap_or(30),
            ),
            http_connect_timeout: Duration::from_secs(
                file.http_connect_timeout_secs
                    .or_else(|| env_parse("HTTP_CONNECT_TIMEOUT_SECS"))
                    .unwrap_or(10),
            ),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, w) in [
            ("general", &self.rate_limits.general),
            ("query", &self.rate_limits.query),
            ("auth", &self.rate_limits.auth),
        ] {
            if w.window.is_zero() {
                return Err(ConfigError::Validation(format!(
                    "{name} rate-limit window must be > 0 seconds"
                )));
            }
            if w.max == 0 {
                return Err(ConfigError::Validation(format!(
                    "{name} rate-limit max must be >= 1"
                )));
            }
        }

        if self.parsers.max_upload_bytes == 0 {
            return Err(ConfigError::Validation(
                "max_upload_bytes must be > 0".to_string(),
            ));
        }
        if self.parsers.timeout.is_zero() {
            return Err(ConfigError::Validation(
                "parse timeout must be > 0 seconds".to_string(),
            ));
        }
        if self.crawler.max_pages == 0 {
            return Err(ConfigError::Validation(
                "crawler max_pages must be >= 1".to_string(),
            ));
        }
        for (name, raw) in [
            (
                "upstage_api_url",
                self.parsers.upstage.as_ref().map(|u| u.api_url.as_str()),
            ),
            (
                "clova_url",
                self.parsers.clova.as_ref().map(|c| c.invoke_url.as_str()),
            ),
        ] {
            if let Some(raw) = raw {
                url::Url::parse(raw).map_err(|e| {
                    ConfigError::Validation(format!("{name} is not a valid URL: {e}"))
                })?;
            }
        }
        Ok(())
    }
}
