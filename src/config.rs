//! Configuration management for the translation recommender.
//!
//! Loads settings from environment variables and .env file.

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Global settings instance
static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Application settings loaded from environment variables
#[derive(Debug, Clone)]
pub struct Settings {
    // Server configuration
    pub host: String,
    pub port: u16,
    pub service_version: String,

    // Upstream endpoints
    pub user_agent: String,
    pub wikipedia_api: String,
    pub wikipedia_api_header: Option<String>,
    pub wikidata_api: String,
    pub meta_api: String,
    pub cxserver_url: String,
    pub cxserver_header: Option<String>,
    pub event_logger_api: String,
    pub event_logging_enabled: bool,

    // Performance configuration
    pub api_concurrency_limit: usize,
    pub http_max_connections: usize,
    pub request_timeout_seconds: u64,

    // Page collections
    pub collections_category: String,
    pub collections_namespace: String,
    pub collection_enrichment_language: String,
    pub collection_refresh_enabled: bool,
    pub collection_refresh_interval_seconds: u64,

    // Cache configuration
    pub cache_db_path: String,

    // Size tiers (bytes)
    pub size_thresholds: SizeThresholds,
}

/// Byte-size boundaries of the easy/medium/hard tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeThresholds {
    pub article_easy: u64,
    pub article_medium: u64,
    pub article_hard: u64,
    pub section_easy: u64,
    pub section_medium: u64,
    pub section_hard: u64,
}

impl Default for SizeThresholds {
    fn default() -> Self {
        Self {
            article_easy: 3000,
            article_medium: 10000,
            article_hard: 25000,
            section_easy: 500,
            section_medium: 2000,
            section_hard: 5000,
        }
    }
}

impl Settings {
    /// Load settings from environment variables.
    /// First attempts to load .env file, then reads environment variables.
    pub fn load() -> Self {
        // Try to load .env file from current directory or parent directories
        if let Some(path) = find_env_file() {
            let _ = dotenvy::from_path(&path);
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup, falling back to defaults.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let optional = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let parsed = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(default)
        };

        let service_version = string("SERVICE_VERSION", env!("CARGO_PKG_VERSION"));
        let default_thresholds = SizeThresholds::default();

        Settings {
            // Server configuration
            host: string("HOST", "127.0.0.1"),
            port: lookup("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            user_agent: string(
                "USER_AGENT",
                &format!(
                    "translation-recommender/{} (https://recommend.wmcloud.org/)",
                    service_version
                ),
            ),
            service_version,

            // Upstream endpoints
            wikipedia_api: string("WIKIPEDIA_API", "https://{source}.wikipedia.org/w/api.php"),
            wikipedia_api_header: optional("WIKIPEDIA_API_HEADER"),
            wikidata_api: string("WIKIDATA_API", "https://www.wikidata.org/w/api.php"),
            meta_api: string("META_API", "https://meta.wikimedia.org/w/api.php"),
            cxserver_url: string("CXSERVER_URL", "https://cxserver.wikimedia.org/"),
            cxserver_header: optional("CXSERVER_HEADER"),
            event_logger_api: string(
                "EVENT_LOGGER_API",
                "https://intake-analytics.wikimedia.org/v1/events?hasty=true",
            ),
            event_logging_enabled: flag("EVENT_LOGGING_ENABLED", false),

            // Performance configuration
            api_concurrency_limit: parsed("API_CONCURRENCY_LIMIT").unwrap_or(10).max(1) as usize,
            http_max_connections: parsed("HTTP_MAX_CONNECTIONS").unwrap_or(5) as usize,
            request_timeout_seconds: parsed("REQUEST_TIMEOUT_SECONDS").unwrap_or(30),

            // Page collections
            collections_category: string("COLLECTIONS_CATEGORY", "Pages including a page collection"),
            collections_namespace: string("COLLECTIONS_NAMESPACE", "*"),
            collection_enrichment_language: string("COLLECTION_ENRICHMENT_LANGUAGE", "en"),
            collection_refresh_enabled: flag("COLLECTION_REFRESH_ENABLED", true),
            collection_refresh_interval_seconds: parsed("COLLECTION_REFRESH_INTERVAL_SECONDS")
                .unwrap_or(3600)
                .max(1),

            // Cache configuration
            cache_db_path: string("CACHE_DB_PATH", "./data/recommendation-cache.db"),

            size_thresholds: SizeThresholds {
                article_easy: parsed("ARTICLE_EASY_THRESHOLD").unwrap_or(default_thresholds.article_easy),
                article_medium: parsed("ARTICLE_MEDIUM_THRESHOLD")
                    .unwrap_or(default_thresholds.article_medium),
                article_hard: parsed("ARTICLE_HARD_THRESHOLD").unwrap_or(default_thresholds.article_hard),
                section_easy: parsed("SECTION_EASY_THRESHOLD").unwrap_or(default_thresholds.section_easy),
                section_medium: parsed("SECTION_MEDIUM_THRESHOLD")
                    .unwrap_or(default_thresholds.section_medium),
                section_hard: parsed("SECTION_HARD_THRESHOLD").unwrap_or(default_thresholds.section_hard),
            },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// Find .env file in current directory or parent directories
fn find_env_file() -> Option<PathBuf> {
    let current_dir = env::current_dir().ok()?;

    // Check current directory
    let env_path = current_dir.join(".env");
    if env_path.exists() {
        return Some(env_path);
    }

    // Check parent directories
    let mut parent = current_dir.parent();
    while let Some(dir) = parent {
        let env_path = dir.join(".env");
        if env_path.exists() {
            return Some(env_path);
        }
        parent = dir.parent();
    }

    None
}

/// Get the global settings instance.
/// Initializes settings on first call.
pub fn get_settings() -> &'static Settings {
    SETTINGS.get_or_init(Settings::load)
}
