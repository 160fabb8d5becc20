//! Infrastructure layer module
//!
//! Adapters to the outside world: configuration, logging, HTTP, HTML
//! extraction, SQLite persistence, image storage and the response cache.

pub mod config;
pub mod content_store;
pub mod database_connection;
pub mod http_client;
pub mod logging;
pub mod parsing;
pub mod parsing_error;
pub mod repositories;
pub mod response_cache;

pub use config::AppConfig;
pub use content_store::{ContentStore, FsContentStore};
pub use database_connection::DatabaseConnection;
pub use http_client::{HttpClient, PageFetcher};
pub use repositories::{ChapterRepository, ComicRepository, ImageRepository};
pub use response_cache::{MokaResponseCache, NoopResponseCache, ResponseCache};
