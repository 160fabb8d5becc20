//! Test utilities for comic-ingest
//!
//! Isolated file-backed databases, an in-memory fetcher and small HTML
//! fixtures shared by the unit tests.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::application::IngestionContext;
use crate::crawling::CrawlScheduler;
use crate::infrastructure::content_store::FsContentStore;
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::http_client::{ChapterRecord, FetchError, FetchedImage, PageFetcher};
use crate::infrastructure::response_cache::{NoopResponseCache, ResponseCache};

/// Test database in its own temporary directory
///
/// Each test gets a fresh, migrated database plus an image directory next to it.
pub struct TestDatabase {
    dir: TempDir,
    connection: DatabaseConnection,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let url = format!("sqlite:{}", dir.path().join("test.db").display());
        let connection = DatabaseConnection::new(&url).await?;
        connection.migrate().await?;
        Ok(Self { dir, connection })
    }

    pub fn pool(&self) -> &SqlitePool {
        self.connection.pool()
    }

    pub fn image_dir(&self) -> PathBuf {
        self.dir.path().join("images")
    }
}

/// Context wired to the test database, the given fetcher and a no-op cache.
pub fn test_context(db: &TestDatabase, fetcher: FakeFetcher) -> IngestionContext {
    test_context_with_cache(db, fetcher, Arc::new(NoopResponseCache))
}

pub fn test_context_with_cache(
    db: &TestDatabase,
    fetcher: FakeFetcher,
    cache: Arc<dyn ResponseCache>,
) -> IngestionContext {
    IngestionContext::new(
        db.pool().clone(),
        Arc::new(fetcher),
        Arc::new(FsContentStore::new(db.image_dir())),
        cache,
        CrawlScheduler::new(2, 4),
    )
    .expect("parsers compile")
}

/// Cache that remembers what was invalidated. Prefix drops are recorded as `{prefix}*`.
#[derive(Clone, Default)]
pub struct RecordingCache {
    invalidated: Arc<Mutex<Vec<String>>>,
}

impl RecordingCache {
    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseCache for RecordingCache {
    async fn invalidate(&self, key: &str) {
        self.invalidated.lock().unwrap().push(key.to_string());
    }

    async fn invalidate_pattern(&self, prefix: &str) {
        self.invalidated.lock().unwrap().push(format!("{prefix}*"));
    }
}

#[derive(Default)]
struct FakeState {
    pages: HashMap<String, String>,
    images: HashMap<String, FetchedImage>,
    failing_images: HashSet<String>,
    chapter_lists: HashMap<String, serde_json::Value>,
    requests: Vec<String>,
}

/// In-memory [`PageFetcher`]. Unknown URLs answer 404. Clones share state.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    state: Arc<Mutex<FakeState>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.state.lock().unwrap().pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn with_image(self, url: &str, bytes: &[u8], content_type: Option<&str>) -> Self {
        self.state.lock().unwrap().images.insert(
            url.to_string(),
            FetchedImage {
                bytes: bytes.to_vec(),
                content_type: content_type.map(str::to_string),
            },
        );
        self
    }

    /// Image URL that answers 503.
    pub fn with_failing_image(self, url: &str) -> Self {
        self.state.lock().unwrap().failing_images.insert(url.to_string());
        self
    }

    pub fn with_chapter_list(self, comic_id: &str, records: serde_json::Value) -> Self {
        self.state
            .lock()
            .unwrap()
            .chapter_lists
            .insert(comic_id.to_string(), records);
        self
    }

    /// Every URL requested so far, in order. Chapter list calls show up as `chapter-list:{id}`.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    fn not_found(url: &str) -> FetchError {
        FetchError::Status {
            status: 404,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(url.to_string());
        state.pages.get(url).cloned().ok_or_else(|| Self::not_found(url))
    }

    async fn get_image(&self, url: &str, _domain: &str) -> Result<FetchedImage, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(url.to_string());
        if state.failing_images.contains(url) {
            return Err(FetchError::Status {
                status: 503,
                url: url.to_string(),
            });
        }
        state.images.get(url).cloned().ok_or_else(|| Self::not_found(url))
    }

    async fn get_chapter_list(
        &self,
        _domain: &str,
        _slug: &str,
        comic_id: &str,
    ) -> Result<Vec<ChapterRecord>, FetchError> {
        let mut state = self.state.lock().unwrap();
        let label = format!("chapter-list:{comic_id}");
        state.requests.push(label.clone());
        let records = state
            .chapter_lists
            .get(comic_id)
            .cloned()
            .ok_or_else(|| Self::not_found(&label))?;
        serde_json::from_value(records).map_err(|e| FetchError::Body {
            url: label,
            reason: e.to_string(),
        })
    }
}

/// Chapter page with `pages` images mirrored on `a.example` and `b.example`.
pub fn chapter_html(pages: usize) -> String {
    let images: String = (0..pages)
        .map(|i| {
            format!(
                r#"<div class="page-chapter"><img alt="page {i}" data-original="https://a.example/{i}.jpg" data-cdn="https://b.example/{i}.jpg"></div>"#
            )
        })
        .collect();
    format!("<html><body><div class=\"reading-detail\">{images}</div></body></html>")
}

/// Comic landing page with the inline script variables and a cover image.
pub fn comic_html(origin_id: &str, slug: &str, title: &str, thumb_url: &str) -> String {
    format!(
        r#"<html><body>
        <script>var comicId = "{origin_id}"; var comicSlug = "{slug}"; var comicName = "{title}";</script>
        <div class="book_avatar"><img data-src="{thumb_url}"></div>
        </body></html>"#
    )
}
