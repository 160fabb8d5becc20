//! Ingestion context and the service facade built on top of it
//!
//! The context bundles every collaborator the ingestors need. It is cheap to
//! clone, so background chapter batches can own a copy.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use super::chapter_ingestor::{ChapterIngestor, ChapterRequest, ChapterStream};
use super::comic_ingestor::ComicIngestor;
use super::error::IngestResult;
use super::image_ingestor::ImageIngestor;
use crate::crawling::{CrawlScheduler, SchedulerStatus};
use crate::domain::{Chapter, Comic};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::content_store::{ContentStore, FsContentStore};
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::http_client::{HttpClient, PageFetcher};
use crate::infrastructure::parsing::{ChapterPageParser, ComicPageParser};
use crate::infrastructure::response_cache::{MokaResponseCache, ResponseCache};

#[derive(Clone)]
pub struct IngestionContext {
    pub pool: SqlitePool,
    pub fetcher: Arc<dyn PageFetcher>,
    pub store: Arc<dyn ContentStore>,
    pub cache: Arc<dyn ResponseCache>,
    pub scheduler: CrawlScheduler,
    pub comic_parser: Arc<ComicPageParser>,
    pub chapter_parser: Arc<ChapterPageParser>,
    /// Start chapter ingestion in the background right after a comic is created
    pub eager_chapters: bool,
}

impl IngestionContext {
    pub fn new(
        pool: SqlitePool,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn ContentStore>,
        cache: Arc<dyn ResponseCache>,
        scheduler: CrawlScheduler,
    ) -> Result<Self> {
        Ok(Self {
            pool,
            fetcher,
            store,
            cache,
            scheduler,
            comic_parser: Arc::new(ComicPageParser::new()?),
            chapter_parser: Arc::new(ChapterPageParser::new()?),
            eager_chapters: false,
        })
    }

    #[must_use]
    pub fn with_eager_chapters(mut self, eager_chapters: bool) -> Self {
        self.eager_chapters = eager_chapters;
        self
    }

    /// Wire the production adapters: SQLite pool (migrated), reqwest fetcher,
    /// filesystem store and moka cache.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let database = DatabaseConnection::from_config(&config.database).await?;
        database.migrate().await?;
        info!("✅ Database ready: {}", config.database.url);

        let fetcher = HttpClient::from_http_config(&config.http)?;
        let store = FsContentStore::new(&config.storage.image_dir);
        info!("📁 Image directory: {:?}", store.root());

        let context = Self::new(
            database.pool().clone(),
            Arc::new(fetcher),
            Arc::new(store),
            Arc::new(MokaResponseCache::from_config(&config.cache)),
            CrawlScheduler::from_config(&config.queues),
        )?;
        Ok(context.with_eager_chapters(config.ingestion.eager_chapters))
    }

    pub fn image_ingestor(&self) -> ImageIngestor {
        ImageIngestor::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.store),
            self.scheduler.image.clone(),
        )
    }
}

/// Entry points of the pipeline.
#[derive(Clone)]
pub struct IngestionService {
    context: IngestionContext,
    comics: ComicIngestor,
    chapters: ChapterIngestor,
}

impl IngestionService {
    pub fn new(context: IngestionContext) -> Self {
        let chapters = ChapterIngestor::new(context.clone());
        let comics = ComicIngestor::new(context.clone(), chapters.clone());
        Self {
            context,
            comics,
            chapters,
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(IngestionContext::from_config(config).await?))
    }

    pub fn context(&self) -> &IngestionContext {
        &self.context
    }

    pub async fn resolve_or_create(&self, url: &str) -> IngestResult<Comic> {
        self.comics.resolve_or_create(url).await
    }

    pub async fn ingest_chapter(&self, request: &ChapterRequest) -> IngestResult<Chapter> {
        self.chapters.ingest_chapter(request).await
    }

    pub async fn ingest_chapters_for_comic(&self, comic_id: i64) -> IngestResult<ChapterStream> {
        self.chapters.ingest_chapters_for_comic(comic_id).await
    }

    pub async fn queue_status(&self) -> SchedulerStatus {
        self.context.scheduler.status().await
    }
}
