//! Chapter ingestion
//!
//! Network work (the chapter page and its images) always happens before a
//! write lock is taken. The row writes then run on a borrowed connection:
//! [`ChapterIngestor::ingest_chapter`] owns an immediate transaction around
//! them, [`ChapterIngestor::ingest_chapter_in`] runs them inside a savepoint
//! on the caller's transaction and leaves the commit to the caller.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqliteConnection};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use url::Url;

use super::error::{IngestError, IngestResult};
use super::image_ingestor::{ImageIngestor, ImageJob};
use super::state::IngestionContext;
use crate::crawling::TaskId;
use crate::domain::{Chapter, CrawlStatus, ImageKind, NewChapter, PageCandidates, StoredImage};
use crate::infrastructure::database_connection::begin_write;
use crate::infrastructure::repositories::{ChapterRepository, ComicRepository, ImageRepository};
use crate::infrastructure::response_cache::keys;

/// Completed chapters of a batch, in completion order.
pub type ChapterStream = ReceiverStream<Chapter>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRequest {
    pub url: String,
    pub chapter_number: String,
    pub comic_id: i64,
    pub position: i64,
}

#[derive(Clone)]
pub struct ChapterIngestor {
    context: IngestionContext,
    images: ImageIngestor,
}

impl ChapterIngestor {
    pub fn new(context: IngestionContext) -> Self {
        let images = context.image_ingestor();
        Self { context, images }
    }

    /// Ingest one chapter in its own transaction.
    ///
    /// On error everything written is rolled back and the original error is returned.
    pub async fn ingest_chapter(&self, request: &ChapterRequest) -> IngestResult<Chapter> {
        let (domain, pages) = self.fetch_request(request).await?;
        {
            let mut conn = self.context.pool.acquire().await?;
            require_comic(&mut conn, request.comic_id).await?;
        }
        let stored = self.images.ingest_many(page_jobs(&pages, &domain)).await;

        let mut tx = begin_write(&self.context.pool).await?;
        match persist_chapter(&mut tx, request, stored).await {
            Ok(chapter) => {
                tx.commit().await?;
                self.invalidate_cache(chapter.comic_id, chapter.id).await;
                info!(
                    "✅ Chapter {} of comic {} ingested with {} images",
                    chapter.chapter_number,
                    chapter.comic_id,
                    chapter.images.len()
                );
                Ok(chapter)
            }
            Err(e) => {
                error!("❌ Chapter ingestion failed for {}: {}", request.url, e);
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Ingest one chapter inside the caller's transaction.
    ///
    /// Writes are wrapped in a savepoint: on error only this chapter's writes
    /// are undone and the error is re-raised. Committing the outer
    /// transaction, and invalidating caches afterwards, is the caller's job.
    pub async fn ingest_chapter_in(
        &self,
        conn: &mut SqliteConnection,
        request: &ChapterRequest,
    ) -> IngestResult<Chapter> {
        let (domain, pages) = self.fetch_request(request).await?;
        require_comic(&mut *conn, request.comic_id).await?;
        let stored = self.images.ingest_many(page_jobs(&pages, &domain)).await;

        let mut savepoint = Connection::begin(&mut *conn).await?;
        match persist_chapter(&mut savepoint, request, stored).await {
            Ok(chapter) => {
                savepoint.commit().await?;
                Ok(chapter)
            }
            Err(e) => {
                error!("❌ Chapter ingestion failed for {}: {}", request.url, e);
                if let Err(rollback_err) = savepoint.rollback().await {
                    warn!("Savepoint rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn fetch_request(&self, request: &ChapterRequest) -> IngestResult<(String, Vec<PageCandidates>)> {
        let domain = source_domain(&request.url)?;
        let pages = self.fetch_pages(&request.url).await?;
        Ok((domain, pages))
    }

    async fn fetch_pages(&self, url: &str) -> IngestResult<Vec<PageCandidates>> {
        let html = self.context.fetcher.get(url).await?;
        let pages = self.context.chapter_parser.extract_pages(&html);
        debug!("Chapter page {} lists {} images", url, pages.len());
        Ok(pages)
    }

    /// Ingest an existing stub chapter.
    ///
    /// Downloads happen first. Claiming the stub (`READY_FOR_CRAWL -> ON_CRAWL`),
    /// the image rows and `DONE` are then written in one transaction, so a
    /// failure leaves the stub ready with nothing attached. `None` means
    /// another run claimed the stub first.
    async fn ingest_stub(&self, chapter: Chapter) -> IngestResult<Option<Chapter>> {
        let domain = source_domain(&chapter.source_url)?;
        let pages = self.fetch_pages(&chapter.source_url).await?;
        let stored = self.images.ingest_many(page_jobs(&pages, &domain)).await;

        let mut tx = begin_write(&self.context.pool).await?;
        match attach_images(&mut tx, chapter, stored).await {
            Ok(Some(chapter)) => {
                tx.commit().await?;
                self.invalidate_cache(chapter.comic_id, chapter.id).await;
                Ok(Some(chapter))
            }
            Ok(None) => {
                tx.rollback().await?;
                Ok(None)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Ingest every `READY_FOR_CRAWL` chapter of a comic through the chapter queue.
    ///
    /// Chapters already holding images are skipped, as are chapters another
    /// run claims first. Each completed chapter is pushed to the returned
    /// stream; failures are skipped (the chapter queue logs them). The stream
    /// ends once every chapter has been attempted.
    pub async fn ingest_chapters_for_comic(&self, comic_id: i64) -> IngestResult<ChapterStream> {
        let mut conn = self.context.pool.acquire().await?;
        require_comic(&mut conn, comic_id).await?;

        let mut pending = Vec::new();
        for chapter in ChapterRepository::find_ready_for_crawl(&mut conn, comic_id).await? {
            if ChapterRepository::has_images(&mut conn, chapter.id).await? {
                debug!("Chapter {} already has images, skipping", chapter.id);
                continue;
            }
            pending.push(chapter);
        }

        if !pending.is_empty() {
            ComicRepository::advance_crawl_status(&mut conn, comic_id, CrawlStatus::OnCrawl).await?;
        }
        drop(conn);

        info!("📚 Queueing {} chapters of comic {}", pending.len(), comic_id);

        let (sender, receiver) = mpsc::channel(pending.len().max(1));
        let this = self.clone();
        tokio::spawn(async move {
            let submissions = pending.into_iter().map(|chapter| {
                let this = this.clone();
                let sender = sender.clone();
                async move {
                    let chapter_id = chapter.id;
                    let priority = chapter.position;
                    let job = this.clone();
                    let result = this
                        .context
                        .scheduler
                        .chapter
                        .submit(TaskId::chapter(chapter_id), priority, async move {
                            job.ingest_stub(chapter).await
                        })
                        .await;

                    match result {
                        Ok(Some(chapter)) => {
                            if sender.send(chapter).await.is_err() {
                                debug!("Chapter stream receiver dropped");
                            }
                        }
                        Ok(None) => debug!("Chapter {} was claimed by another run", chapter_id),
                        Err(_) => debug!("Chapter {} left ready for a later run", chapter_id),
                    }
                }
            });
            join_all(submissions).await;

            if let Err(e) = this.finish_comic(comic_id).await {
                warn!("Could not update crawl status of comic {}: {}", comic_id, e);
            }
            // Stream ends when this last sender goes away.
            drop(sender);
        });

        Ok(ReceiverStream::new(receiver))
    }

    /// Mark the comic `DONE` once none of its chapters is left unfinished.
    async fn finish_comic(&self, comic_id: i64) -> IngestResult<()> {
        let mut conn = self.context.pool.acquire().await?;
        let unfinished = ChapterRepository::count_unfinished(&mut conn, comic_id).await?;
        if unfinished == 0 {
            ComicRepository::advance_crawl_status(&mut conn, comic_id, CrawlStatus::Done).await?;
            self.context.cache.invalidate(&keys::comic(comic_id)).await;
            info!("🏁 Comic {} fully ingested", comic_id);
        } else {
            info!("Comic {} still has {} unfinished chapters", comic_id, unfinished);
        }
        Ok(())
    }

    async fn invalidate_cache(&self, comic_id: i64, chapter_id: i64) {
        let cache = &self.context.cache;
        cache.invalidate(&keys::chapter(chapter_id)).await;
        cache.invalidate(&keys::comic(comic_id)).await;
        cache.invalidate_pattern(&keys::comic_chapters_prefix(comic_id)).await;
    }
}

async fn require_comic(conn: &mut SqliteConnection, comic_id: i64) -> IngestResult<()> {
    match ComicRepository::find_by_id(conn, comic_id).await? {
        Some(_) => Ok(()),
        None => Err(IngestError::ComicNotFound { comic_id }),
    }
}

/// Row writes of an explicit chapter request: the chapter in `ON_CRAWL`,
/// its images, then `DONE`.
async fn persist_chapter(
    conn: &mut SqliteConnection,
    request: &ChapterRequest,
    stored: Vec<StoredImage>,
) -> IngestResult<Chapter> {
    require_comic(&mut *conn, request.comic_id).await?;

    let new_chapter = NewChapter {
        comic_id: request.comic_id,
        chapter_number: request.chapter_number.clone(),
        title: format!("Chapter {}", request.chapter_number),
        source_url: request.url.clone(),
        position: request.position,
    };
    let chapter = ChapterRepository::insert(&mut *conn, &new_chapter, CrawlStatus::OnCrawl).await?;
    finish_chapter(conn, chapter, stored).await
}

/// Claim a stub and attach its images. `None` when the stub is no longer ready.
async fn attach_images(
    conn: &mut SqliteConnection,
    chapter: Chapter,
    stored: Vec<StoredImage>,
) -> IngestResult<Option<Chapter>> {
    if !ChapterRepository::claim_for_crawl(&mut *conn, chapter.id).await? {
        return Ok(None);
    }
    finish_chapter(conn, chapter, stored).await.map(Some)
}

async fn finish_chapter(
    conn: &mut SqliteConnection,
    mut chapter: Chapter,
    stored: Vec<StoredImage>,
) -> IngestResult<Chapter> {
    let rows: Vec<_> = stored.into_iter().map(|image| image.owned_by(chapter.id)).collect();
    chapter.images = ImageRepository::insert_many(&mut *conn, &rows).await?;
    ChapterRepository::advance_crawl_status(&mut *conn, chapter.id, CrawlStatus::Done).await?;
    chapter.crawl_status = CrawlStatus::Done;
    Ok(chapter)
}

fn source_domain(url: &str) -> IngestResult<String> {
    let parsed = Url::parse(url).map_err(|e| IngestError::validation(format!("invalid chapter url '{url}': {e}")))?;
    if parsed.host_str().is_none() {
        return Err(IngestError::validation(format!("chapter url '{url}' has no host")));
    }
    Ok(parsed.origin().ascii_serialization())
}

fn page_jobs(pages: &[PageCandidates], domain: &str) -> Vec<ImageJob> {
    pages
        .iter()
        .map(|page| ImageJob {
            candidates: page.candidates.clone(),
            domain: domain.to_string(),
            position: page.position,
            kind: ImageKind::Page,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewComic;
    use crate::test_utils::{FakeFetcher, RecordingCache, TestDatabase, chapter_html, test_context, test_context_with_cache};
    use futures::StreamExt;
    use std::sync::Arc;

    async fn seed_comic(db: &TestDatabase, origin_id: &str) -> i64 {
        let mut conn = db.pool().acquire().await.unwrap();
        ComicRepository::insert(
            &mut conn,
            &NewComic {
                origin_id: origin_id.to_string(),
                origin_url: format!("https://comics.example/truyen-tranh/{origin_id}"),
                title: "Seeded".to_string(),
                description: String::new(),
                status: String::new(),
                chapter_count: 0,
            },
        )
        .await
        .unwrap()
        .id
    }

    fn request(comic_id: i64) -> ChapterRequest {
        ChapterRequest {
            url: "https://comics.example/truyen-tranh/seeded/chapter-1".to_string(),
            chapter_number: "1".to_string(),
            comic_id,
            position: 1,
        }
    }

    fn fetcher_with_chapter(url: &str, pages: usize) -> FakeFetcher {
        let mut fetcher = FakeFetcher::new().with_page(url, &chapter_html(pages));
        for i in 0..pages {
            fetcher = fetcher.with_image(&format!("https://a.example/{i}.jpg"), format!("img-{i}").as_bytes(), Some("image/jpeg"));
        }
        fetcher
    }

    #[tokio::test]
    async fn ingest_chapter_persists_images_and_marks_done() {
        let db = TestDatabase::new().await.unwrap();
        let comic_id = seed_comic(&db, "c-1").await;
        let req = request(comic_id);
        let context = test_context(&db, fetcher_with_chapter(&req.url, 3));
        let ingestor = ChapterIngestor::new(context);

        let chapter = ingestor.ingest_chapter(&req).await.unwrap();

        assert_eq!(chapter.crawl_status, CrawlStatus::Done);
        assert_eq!(chapter.images.len(), 3);
        let mut conn = db.pool().acquire().await.unwrap();
        let stored = ChapterRepository::find_by_id(&mut conn, chapter.id).await.unwrap().unwrap();
        assert_eq!(stored.crawl_status, CrawlStatus::Done);
        let images = ImageRepository::find_by_chapter(&mut conn, chapter.id).await.unwrap();
        assert_eq!(images.iter().map(|i| i.position).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn unknown_comic_rolls_back() {
        let db = TestDatabase::new().await.unwrap();
        let req = request(999);
        let ingestor = ChapterIngestor::new(test_context(&db, fetcher_with_chapter(&req.url, 1)));

        let err = ingestor.ingest_chapter(&req).await.unwrap_err();

        assert!(matches!(err, IngestError::ComicNotFound { comic_id: 999 }));
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chapters")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn page_fetch_failure_is_returned_unchanged() {
        let db = TestDatabase::new().await.unwrap();
        let comic_id = seed_comic(&db, "c-2").await;
        let ingestor = ChapterIngestor::new(test_context(&db, FakeFetcher::new()));

        let err = ingestor.ingest_chapter(&request(comic_id)).await.unwrap_err();

        assert!(matches!(err, IngestError::Fetch(_)));
    }

    #[tokio::test]
    async fn savepoint_variant_leaves_commit_to_the_caller() {
        let db = TestDatabase::new().await.unwrap();
        let comic_id = seed_comic(&db, "c-3").await;
        let good = request(comic_id);
        let bad = ChapterRequest {
            comic_id: 4242,
            ..request(comic_id)
        };
        let ingestor = ChapterIngestor::new(test_context(&db, fetcher_with_chapter(&good.url, 2)));

        let mut tx = db.pool().begin().await.unwrap();
        let first = ingestor.ingest_chapter_in(&mut tx, &good).await.unwrap();
        let second = ingestor.ingest_chapter_in(&mut tx, &bad).await;
        assert!(matches!(second, Err(IngestError::ComicNotFound { .. })));

        // The failed savepoint did not poison the outer transaction.
        let inside: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chapters")
            .fetch_one(&mut *tx)
            .await
            .unwrap();
        assert_eq!(inside, 1);
        tx.commit().await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let chapters = ChapterRepository::find_by_comic(&mut conn, comic_id).await.unwrap();
        assert_eq!(chapters.iter().map(|c| c.id).collect::<Vec<_>>(), vec![first.id]);
    }

    #[tokio::test]
    async fn batch_skips_chapters_with_images_and_is_idempotent() {
        let db = TestDatabase::new().await.unwrap();
        let comic_id = seed_comic(&db, "c-4").await;
        let urls: Vec<String> = (1..=3)
            .map(|n| format!("https://comics.example//truyen-tranh/c-4/chapter-{n}"))
            .collect();
        {
            let mut conn = db.pool().acquire().await.unwrap();
            let stubs: Vec<NewChapter> = urls
                .iter()
                .zip(1_i64..)
                .map(|(url, n)| NewChapter {
                    comic_id,
                    chapter_number: n.to_string(),
                    title: format!("Chapter {n}"),
                    source_url: url.clone(),
                    position: n,
                })
                .collect();
            ChapterRepository::insert_stubs(&mut conn, &stubs).await.unwrap();
        }

        let mut fetcher = FakeFetcher::new();
        for url in &urls {
            fetcher = fetcher.with_page(url, &chapter_html(2));
        }
        for i in 0..2 {
            fetcher = fetcher.with_image(&format!("https://a.example/{i}.jpg"), b"x", Some("image/png"));
        }
        let ingestor = ChapterIngestor::new(test_context(&db, fetcher.clone()));

        let first: Vec<Chapter> = ingestor.ingest_chapters_for_comic(comic_id).await.unwrap().collect().await;
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|c| c.crawl_status == CrawlStatus::Done && c.images.len() == 2));

        let requests_after_first = fetcher.requests().len();
        let second: Vec<Chapter> = ingestor.ingest_chapters_for_comic(comic_id).await.unwrap().collect().await;
        assert!(second.is_empty());
        assert_eq!(fetcher.requests().len(), requests_after_first);

        let mut conn = db.pool().acquire().await.unwrap();
        let image_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(image_count, 6);
        let comic = ComicRepository::find_by_id(&mut conn, comic_id).await.unwrap().unwrap();
        assert_eq!(comic.crawl_status, CrawlStatus::Done);
    }

    #[tokio::test]
    async fn batch_failure_leaves_stub_ready_for_retry() {
        let db = TestDatabase::new().await.unwrap();
        let comic_id = seed_comic(&db, "c-5").await;
        {
            let mut conn = db.pool().acquire().await.unwrap();
            let stubs = vec![
                NewChapter {
                    comic_id,
                    chapter_number: "1".to_string(),
                    title: "Chapter 1".to_string(),
                    source_url: "https://comics.example//truyen-tranh/c-5/chapter-1".to_string(),
                    position: 1,
                },
                NewChapter {
                    comic_id,
                    chapter_number: "2".to_string(),
                    title: "Chapter 2".to_string(),
                    source_url: "https://comics.example//truyen-tranh/c-5/chapter-2".to_string(),
                    position: 2,
                },
            ];
            ChapterRepository::insert_stubs(&mut conn, &stubs).await.unwrap();
        }
        // Only chapter 1's page is reachable.
        let fetcher = FakeFetcher::new()
            .with_page("https://comics.example//truyen-tranh/c-5/chapter-1", &chapter_html(1))
            .with_image("https://a.example/0.jpg", b"x", Some("image/jpeg"));
        let ingestor = ChapterIngestor::new(test_context(&db, fetcher));

        let done: Vec<Chapter> = ingestor.ingest_chapters_for_comic(comic_id).await.unwrap().collect().await;
        assert_eq!(done.iter().map(|c| c.chapter_number.as_str()).collect::<Vec<_>>(), vec!["1"]);

        let mut conn = db.pool().acquire().await.unwrap();
        let ready = ChapterRepository::find_ready_for_crawl(&mut conn, comic_id).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].chapter_number, "2");
        let comic = ComicRepository::find_by_id(&mut conn, comic_id).await.unwrap().unwrap();
        assert_eq!(comic.crawl_status, CrawlStatus::OnCrawl);
    }

    async fn seed_stub(db: &TestDatabase, comic_id: i64, url: &str) {
        let mut conn = db.pool().acquire().await.unwrap();
        let stub = NewChapter {
            comic_id,
            chapter_number: "1".to_string(),
            title: "Chapter 1".to_string(),
            source_url: url.to_string(),
            position: 1,
        };
        ChapterRepository::insert_stubs(&mut conn, &[stub]).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_explicit_ingestions_all_commit() {
        let db = TestDatabase::new().await.unwrap();
        let comic_id = seed_comic(&db, "c-6").await;
        let ingestor = ChapterIngestor::new(test_context(&db, fetcher_with_chapter(&request(comic_id).url, 3)));

        let requests: Vec<ChapterRequest> = (1..=4)
            .map(|n| ChapterRequest {
                chapter_number: n.to_string(),
                position: n,
                ..request(comic_id)
            })
            .collect();
        let results = join_all(requests.iter().map(|req| ingestor.ingest_chapter(req))).await;

        for result in &results {
            assert!(result.is_ok(), "{result:?}");
        }
        let images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(images, 12);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_batches_attach_a_stub_once() {
        let db = TestDatabase::new().await.unwrap();
        let comic_id = seed_comic(&db, "c-7").await;
        let url = "https://comics.example//truyen-tranh/c-7/chapter-1";
        seed_stub(&db, comic_id, url).await;
        let ingestor = ChapterIngestor::new(test_context(&db, fetcher_with_chapter(url, 2)));

        // The second run may list the stub before the first one claims it.
        let first = ingestor.ingest_chapters_for_comic(comic_id).await.unwrap();
        let second = ingestor.ingest_chapters_for_comic(comic_id).await.unwrap();
        let (a, b): (Vec<Chapter>, Vec<Chapter>) = tokio::join!(first.collect(), second.collect());

        assert_eq!(a.len() + b.len(), 1);
        let images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(images, 2);
    }

    #[tokio::test]
    async fn committed_chapter_drops_its_cache_entries() {
        let db = TestDatabase::new().await.unwrap();
        let comic_id = seed_comic(&db, "c-8").await;
        let req = request(comic_id);
        let cache = RecordingCache::default();
        let context = test_context_with_cache(&db, fetcher_with_chapter(&req.url, 1), Arc::new(cache.clone()));

        let chapter = ChapterIngestor::new(context).ingest_chapter(&req).await.unwrap();

        let invalidated = cache.invalidated();
        assert!(invalidated.contains(&format!("comics:{comic_id}:chapters*")), "{invalidated:?}");
        assert!(invalidated.contains(&format!("comics:{comic_id}")));
        assert!(invalidated.contains(&format!("chapters:{}", chapter.id)));
    }

    #[tokio::test]
    async fn failed_chapter_leaves_the_cache_alone() {
        let db = TestDatabase::new().await.unwrap();
        let cache = RecordingCache::default();
        let req = request(404);
        let context = test_context_with_cache(&db, fetcher_with_chapter(&req.url, 1), Arc::new(cache.clone()));

        assert!(ChapterIngestor::new(context).ingest_chapter(&req).await.is_err());
        assert!(cache.invalidated().is_empty());
    }
}
