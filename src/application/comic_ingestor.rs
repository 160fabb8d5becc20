//! Comic ingestion: resolve a comic URL to a stored comic, creating it on first sight.

use futures::StreamExt;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use url::Url;

use super::chapter_ingestor::ChapterIngestor;
use super::error::{IngestError, IngestResult};
use super::image_ingestor::{ImageIngestor, ImageJob};
use super::state::IngestionContext;
use crate::domain::{Comic, ComicInfo, ImageKind, NewChapter, NewComic, StoredImage};
use crate::infrastructure::database_connection::begin_write;
use crate::infrastructure::repositories::{ChapterRepository, ComicRepository, ImageRepository};
use crate::infrastructure::response_cache::keys;

#[derive(Clone)]
pub struct ComicIngestor {
    context: IngestionContext,
    images: ImageIngestor,
    chapters: ChapterIngestor,
}

impl ComicIngestor {
    pub fn new(context: IngestionContext, chapters: ChapterIngestor) -> Self {
        let images = context.image_ingestor();
        Self {
            context,
            images,
            chapters,
        }
    }

    /// Return the stored comic for `url`, extracting and creating it if needed.
    ///
    /// Lookup order: source URL, then the source's comic id (another URL for
    /// a comic we already have). Creation is all-or-nothing.
    pub async fn resolve_or_create(&self, url: &str) -> IngestResult<Comic> {
        validate_comic_url(url)?;

        {
            let mut conn = self.context.pool.acquire().await?;
            if let Some(comic) = ComicRepository::find_by_origin_url(&mut conn, url).await? {
                debug!("Comic {} already stored for {}", comic.id, url);
                return Ok(comic);
            }
        }

        let info = self.extract(url).await?;

        {
            let mut conn = self.context.pool.acquire().await?;
            if let Some(comic) = ComicRepository::find_by_origin_id(&mut conn, &info.origin_id).await? {
                info!("🔗 {} is an alias of comic {} ({})", url, comic.id, comic.origin_url);
                return Ok(comic);
            }
        }

        let comic = match self.create(url, &info).await {
            Ok(comic) => comic,
            // Lost a creation race for the same source id.
            Err(e) if e.is_unique_violation() => {
                let mut conn = self.context.pool.acquire().await?;
                return ComicRepository::find_by_origin_id(&mut conn, &info.origin_id)
                    .await?
                    .ok_or(e);
            }
            Err(e) => return Err(e),
        };

        self.context.cache.invalidate_pattern(keys::COMIC_LIST_PREFIX).await;
        self.context.cache.invalidate(&keys::comic(comic.id)).await;
        info!(
            "✅ Created comic {} '{}' with {} chapter stubs",
            comic.id, comic.title, comic.chapter_count
        );

        if self.context.eager_chapters {
            self.spawn_chapter_ingestion(comic.id);
        }

        Ok(comic)
    }

    /// Fetch and extract the comic page. Every failure collapses into
    /// `ComicNotFoundByUrl`; the underlying cause is only logged.
    async fn extract(&self, url: &str) -> IngestResult<ComicInfo> {
        let not_found = || IngestError::ComicNotFoundByUrl { url: url.to_string() };

        let html = self.context.fetcher.get(url).await.map_err(|e| {
            warn!("Comic page fetch failed for {}: {}", url, e);
            not_found()
        })?;

        self.context
            .comic_parser
            .extract(Some(self.context.fetcher.as_ref()), url, &html)
            .await
            .map_err(|e| {
                warn!("Comic extraction failed for {}: {}", url, e);
                not_found()
            })
    }

    /// The cover download runs before the write lock is taken; the rows are
    /// then written in one immediate transaction.
    async fn create(&self, url: &str, info: &ComicInfo) -> IngestResult<Comic> {
        let thumbnail = self
            .images
            .ingest_queued(ImageJob {
                candidates: vec![info.thumb_url.clone()],
                domain: info.domain.clone(),
                position: 0,
                kind: ImageKind::Thumb,
            })
            .await?;

        let mut tx = begin_write(&self.context.pool).await?;

        match create_in(&mut tx, url, info, thumbnail).await {
            Ok(comic) => {
                tx.commit().await?;
                Ok(comic)
            }
            Err(e) => {
                warn!("Comic creation for {} rolled back: {}", url, e);
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    fn spawn_chapter_ingestion(&self, comic_id: i64) {
        let chapters = self.chapters.clone();
        tokio::spawn(async move {
            match chapters.ingest_chapters_for_comic(comic_id).await {
                Ok(stream) => {
                    let ingested = stream.count().await;
                    info!("Background ingestion of comic {} finished: {} chapters", comic_id, ingested);
                }
                Err(e) => warn!("Background chapter ingestion for comic {} failed: {}", comic_id, e),
            }
        });
    }
}

async fn create_in(
    conn: &mut SqliteConnection,
    url: &str,
    info: &ComicInfo,
    thumbnail: StoredImage,
) -> IngestResult<Comic> {
    let new_comic = NewComic {
        origin_id: info.origin_id.clone(),
        origin_url: url.to_string(),
        title: info.title.clone(),
        description: info.description.clone(),
        status: info.status.clone(),
        chapter_count: i64::try_from(info.chapters.len()).unwrap_or(i64::MAX),
    };
    let mut comic = ComicRepository::insert(&mut *conn, &new_comic).await?;

    let thumbnail = ImageRepository::insert(&mut *conn, &thumbnail.owned_by(comic.id)).await?;
    ComicRepository::set_thumbnail(&mut *conn, comic.id, thumbnail.id).await?;
    comic.thumb_image_id = Some(thumbnail.id);

    let stubs = NewChapter::stubs_for(comic.id, &info.chapters);
    ChapterRepository::insert_stubs(&mut *conn, &stubs).await?;

    Ok(comic)
}

fn validate_comic_url(url: &str) -> IngestResult<()> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| IngestError::validation(format!("invalid comic url '{url}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(IngestError::validation(format!(
            "comic url '{url}' must be an absolute http(s) url"
        )));
    }
    Ok(())
}
