//! Shared fixtures for the integration tests: a scripted comic site behind
//! the public `PageFetcher` trait and a migrated database in a temp dir.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use comic_ingest_lib::application::{IngestionContext, IngestionService};
use comic_ingest_lib::crawling::CrawlScheduler;
use comic_ingest_lib::infrastructure::http_client::{ChapterRecord, FetchError, FetchedImage};
use comic_ingest_lib::infrastructure::{DatabaseConnection, FsContentStore, NoopResponseCache, PageFetcher};

pub const SITE: &str = "https://comics.example";

#[derive(Default)]
struct SiteState {
    pages: HashMap<String, String>,
    images: HashMap<String, Vec<u8>>,
    chapter_lists: HashMap<String, Vec<ChapterRecord>>,
    hits: usize,
}

/// A tiny comic site. Clones share the same pages and request counter.
#[derive(Clone, Default)]
pub struct StubSite {
    state: Arc<Mutex<SiteState>>,
}

impl StubSite {
    /// Publish a comic landing page at `url` with `chapters` chapters of
    /// `pages` images each. Chapter list comes back newest first.
    pub fn publish_comic(&self, url: &str, origin_id: &str, slug: &str, chapters: i64, pages: usize) {
        let cover = format!("https://cdn.example/{origin_id}/cover.jpg");
        let mut state = self.state.lock().unwrap();
        state.pages.insert(url.to_string(), comic_page(origin_id, slug, &cover));
        state.images.insert(cover, format!("cover-{origin_id}").into_bytes());

        let mut records = Vec::new();
        for number in (1..=chapters).rev() {
            let chapter_slug = format!("chuong-{number}");
            let chapter_url = format!("{SITE}//truyen-tranh/{slug}/{chapter_slug}");
            let mut body = String::new();
            for page in 0..pages {
                let image = format!("https://cdn.example/{origin_id}/{number}/{page}.jpg");
                body.push_str(&format!(
                    r#"<img data-original="{image}" data-cdn="https://mirror.example/{origin_id}/{number}/{page}.jpg">"#
                ));
                state.images.insert(image, format!("{origin_id}-{number}-{page}").into_bytes());
            }
            state.pages.insert(chapter_url, format!("<html><body>{body}</body></html>"));
            records.push(ChapterRecord {
                num: number.into(),
                slug: chapter_slug,
            });
        }
        state.chapter_lists.insert(origin_id.to_string(), records);
    }

    /// Serve an extra URL with the same landing page as `existing`.
    pub fn alias(&self, existing: &str, alias: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(html) = state.pages.get(existing).cloned() {
            state.pages.insert(alias.to_string(), html);
        }
    }

    pub fn hits(&self) -> usize {
        self.state.lock().unwrap().hits
    }
}

fn comic_page(origin_id: &str, slug: &str, cover: &str) -> String {
    format!(
        r#"<html><head><meta name="description" content="A test comic"></head><body>
        <script>var comicId = "{origin_id}"; var comicSlug = "{slug}"; var comicName = "Comic {origin_id}";</script>
        <div class="book_avatar"><img src="{cover}"></div>
        </body></html>"#
    )
}

fn missing(url: &str) -> FetchError {
    FetchError::Status {
        status: 404,
        url: url.to_string(),
    }
}

#[async_trait]
impl PageFetcher for StubSite {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.hits += 1;
        state.pages.get(url).cloned().ok_or_else(|| missing(url))
    }

    async fn get_image(&self, url: &str, _domain: &str) -> Result<FetchedImage, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.hits += 1;
        let bytes = state.images.get(url).cloned().ok_or_else(|| missing(url))?;
        Ok(FetchedImage {
            bytes,
            content_type: Some("image/jpeg".to_string()),
        })
    }

    async fn get_chapter_list(
        &self,
        _domain: &str,
        _slug: &str,
        comic_id: &str,
    ) -> Result<Vec<ChapterRecord>, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.hits += 1;
        state
            .chapter_lists
            .get(comic_id)
            .cloned()
            .ok_or_else(|| missing(comic_id))
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub database: DatabaseConnection,
    pub site: StubSite,
    pub service: IngestionService,
}

impl Harness {
    pub async fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let database = DatabaseConnection::new(&format!("sqlite:{}", dir.path().join("ingest.db").display())).await?;
        database.migrate().await?;

        let site = StubSite::default();
        let context = IngestionContext::new(
            database.pool().clone(),
            Arc::new(site.clone()),
            Arc::new(FsContentStore::new(dir.path().join("images"))),
            Arc::new(NoopResponseCache),
            CrawlScheduler::new(2, 3),
        )?;

        Ok(Self {
            dir,
            database,
            site,
            service: IngestionService::new(context),
        })
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(self.database.pool())
            .await
            .unwrap()
    }
}
