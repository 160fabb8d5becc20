//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate:
//! 1. Built-in defaults (see [`defaults`])
//! 2. An optional configuration file (TOML/JSON/YAML by extension)
//! 3. Environment overrides prefixed with `COMIC_INGEST_`, nested keys joined
//!    by `__` (e.g. `COMIC_INGEST_QUEUES__IMAGE_CONCURRENCY=8`)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig,
    pub queues: QueueConfig,
    pub ingestion: IngestionConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. `sqlite:/var/lib/comic-ingest/comics.db`
    pub url: String,
    pub max_connections: u32,
    /// How long a writer waits for the SQLite write lock before failing
    pub busy_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory all downloaded images are written to
    pub image_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub request_timeout_seconds: u64,
    pub user_agent: String,
    pub follow_redirects: bool,
    /// Chapter list endpoint path with `{id}` and `{slug}` placeholders
    pub chapter_list_path: String,
}

/// Concurrency of the two crawl queues. Fixed at startup, never shared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub chapter_concurrency: usize,
    pub image_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Start chapter ingestion right after a comic is created
    pub eager_chapters: bool,
}

/// Settings for the read-path response cache the pipeline invalidates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_capacity: u64,
    pub ttl_seconds: u64,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Directory for log files; defaults to `logs/` under the data directory
    pub log_dir: Option<PathBuf>,

    /// Log file name
    pub file_name: String,

    /// Module-specific log level filters (e.g., "sqlx": "warn", "reqwest": "info")
    pub module_filters: HashMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            http: HttpConfig::default(),
            queues: QueueConfig::default(),
            ingestion: IngestionConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: format!("sqlite:{}", app_data_dir().join(defaults::DATABASE_FILE).display()),
            max_connections: defaults::DB_MAX_CONNECTIONS,
            busy_timeout_seconds: defaults::DB_BUSY_TIMEOUT_SECONDS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image_dir: app_data_dir().join(defaults::IMAGE_DIR),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            user_agent: defaults::USER_AGENT.to_string(),
            follow_redirects: true,
            chapter_list_path: defaults::CHAPTER_LIST_PATH.to_string(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            chapter_concurrency: defaults::CHAPTER_CONCURRENCY,
            image_concurrency: defaults::IMAGE_CONCURRENCY,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            eager_chapters: defaults::EAGER_CHAPTERS,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: defaults::CACHE_MAX_CAPACITY,
            ttl_seconds: defaults::CACHE_TTL_SECONDS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("sqlx".to_string(), "warn".to_string());
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("tokio".to_string(), "info".to_string());
                filters
            },
        }
    }
}

impl AppConfig {
    /// Load defaults, an optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = config::Config::try_from(&Self::default())?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            info!("Loading configuration from: {:?}", path);
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.chapter_concurrency == 0 || self.queues.image_concurrency == 0 {
            return Err(ConfigError::Validation {
                message: "queue concurrency must be greater than 0".to_string(),
            });
        }

        if self.storage.image_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: "storage.image_dir must not be empty".to_string(),
            });
        }

        if self.http.request_timeout_seconds == 0 {
            return Err(ConfigError::Validation {
                message: "http.request_timeout_seconds must be greater than 0".to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation {
                message: "database.max_connections must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Get application data directory
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(defaults::APP_DIR_NAME)
}

/// Default configuration values
pub mod defaults {
    pub const APP_DIR_NAME: &str = "comic-ingest";

    pub const ENV_PREFIX: &str = "COMIC_INGEST";

    pub const DATABASE_FILE: &str = "comic_ingest.db";

    pub const DB_MAX_CONNECTIONS: u32 = 10;

    pub const DB_BUSY_TIMEOUT_SECONDS: u64 = 30;

    pub const IMAGE_DIR: &str = "images";

    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

    pub const CHAPTER_LIST_PATH: &str = "/api/comics/{id}/chapters?slug={slug}";

    /// Chapters are heavy (one page fetch plus every image), keep this low
    pub const CHAPTER_CONCURRENCY: usize = 2;

    pub const IMAGE_CONCURRENCY: usize = 8;

    pub const EAGER_CHAPTERS: bool = false;

    pub const CACHE_MAX_CAPACITY: u64 = 10_000;

    pub const CACHE_TTL_SECONDS: u64 = 300;

    pub const LOG_LEVEL: &str = "info";

    pub const LOG_JSON_FORMAT: bool = false;

    pub const LOG_CONSOLE_OUTPUT: bool = true;

    pub const LOG_FILE_OUTPUT: bool = false;

    pub const LOG_FILE_NAME: &str = "comic-ingest.log";
}
