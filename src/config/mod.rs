use std::env;
use std::path::PathBuf;

use crate::error::FeedError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
    pub request: RequestConfig,
    pub logging: LoggingConfig,
}

/// Session manager tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a timeout-bound population waits for an outstanding request.
    pub population_timeout_ms: u64,
    /// Sessions older than this are dropped from the session cache.
    pub lifetime_ms: u64,
    /// Fraction of requested content that may be missing before a fetch fails.
    pub content_miss_threshold: f64,
    /// Maximum number of payloads kept in the content cache.
    pub content_cache_capacity: usize,
    /// Tell providers when every payload a session needs is already cached.
    pub use_cached_bindings: bool,
    /// Schema version stamped on new sessions.
    pub schema_version: u32,
}

/// Request scheduling policy configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Content older than this is considered stale.
    pub staleness_threshold_ms: i64,
}

/// Where persistent content lives
#[derive(Debug, Clone, PartialEq)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub kind: StoreKind,
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Feed server request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, FeedError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = SessionConfig::default();
        let session = SessionConfig {
            population_timeout_ms: env_parse(
                "SESSION_POPULATION_TIMEOUT_MS",
                defaults.population_timeout_ms,
            ),
            lifetime_ms: env_parse("SESSION_LIFETIME_MS", defaults.lifetime_ms),
            content_miss_threshold: env_parse(
                "CONTENT_MISS_THRESHOLD",
                defaults.content_miss_threshold,
            ),
            content_cache_capacity: env_parse(
                "CONTENT_CACHE_CAPACITY",
                defaults.content_cache_capacity,
            ),
            use_cached_bindings: env::var("USE_CACHED_BINDINGS")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(defaults.use_cached_bindings),
            schema_version: env_parse("SESSION_SCHEMA_VERSION", defaults.schema_version),
        };

        if !(0.0..=1.0).contains(&session.content_miss_threshold) {
            return Err(FeedError::Config {
                message: format!(
                    "CONTENT_MISS_THRESHOLD must be between 0 and 1, got {}",
                    session.content_miss_threshold
                ),
            });
        }

        let scheduler = SchedulerConfig {
            staleness_threshold_ms: env_parse(
                "SCHEDULER_STALENESS_MS",
                SchedulerConfig::default().staleness_threshold_ms,
            ),
        };

        let database = DatabaseConfig {
            kind: match env::var("STORE_KIND")
                .unwrap_or_else(|_| "sqlite".to_string())
                .to_lowercase()
                .as_str()
            {
                "memory" => StoreKind::Memory,
                _ => StoreKind::Sqlite,
            },
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/feed.db".to_string()),
            ),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 5),
        };

        let request_defaults = RequestConfig::default();
        let request = RequestConfig {
            base_url: env::var("FEED_BASE_URL").unwrap_or(request_defaults.base_url),
            timeout_ms: env_parse("REQUEST_TIMEOUT_MS", request_defaults.timeout_ms),
            max_retries: env_parse("MAX_RETRIES", request_defaults.max_retries),
            retry_delay_ms: env_parse("RETRY_DELAY_MS", request_defaults.retry_delay_ms),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        Ok(Config {
            session,
            scheduler,
            database,
            request,
            logging,
        })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            population_timeout_ms: 2000,
            lifetime_ms: 24 * 60 * 60 * 1000, // 1 day
            content_miss_threshold: 0.1,
            content_cache_capacity: 1000,
            use_cached_bindings: true,
            schema_version: 1,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_ms: 60 * 60 * 1000, // 1 hour
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}
