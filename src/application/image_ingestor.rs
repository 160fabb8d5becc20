//! Image ingestion: fetch one logical image from its mirrors, store the bytes
//! under a content-addressed name, and hand back the row to persist.
//!
//! No database writes happen here. The caller attaches the returned
//! [`StoredImage`] to its parent and inserts it inside its own transaction.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{IngestError, IngestResult};
use crate::crawling::{CrawlQueue, DEFAULT_PRIORITY, TaskId};
use crate::domain::{ImageKind, StoredImage};
use crate::infrastructure::content_store::ContentStore;
use crate::infrastructure::http_client::PageFetcher;

/// Hex characters of the BLAKE3 digest kept in file names.
const SHORT_HASH_LEN: usize = 16;

/// One image to ingest: ordered mirror URLs plus what kind of image it is.
///
/// The parent row is chosen later, when the caller attaches the stored
/// image inside its own transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    pub candidates: Vec<String>,
    pub domain: String,
    pub position: i64,
    pub kind: ImageKind,
}

impl ImageJob {
    fn task_id(&self) -> TaskId {
        let source = self.candidates.first().map_or("<none>", String::as_str);
        TaskId::image(self.kind, source)
    }
}

/// File extension for a response content type. Parameters such as
/// `; charset=binary` are ignored.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/avif" => Some("avif"),
        "image/bmp" => Some("bmp"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

/// `{thumb|page}-{first 16 hex chars of blake3(bytes)}.{ext}`
pub fn image_file_name(kind: ImageKind, bytes: &[u8], extension: &str) -> String {
    let hash = blake3::hash(bytes);
    let hex = hash.to_hex();
    format!(
        "{}-{}.{}",
        kind.file_prefix(),
        &hex.as_str()[..SHORT_HASH_LEN],
        extension
    )
}

#[derive(Clone)]
pub struct ImageIngestor {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn ContentStore>,
    queue: CrawlQueue,
}

impl ImageIngestor {
    pub fn new(fetcher: Arc<dyn PageFetcher>, store: Arc<dyn ContentStore>, queue: CrawlQueue) -> Self {
        Self { fetcher, store, queue }
    }

    /// Try each candidate in order and keep the first that downloads.
    ///
    /// Only download failures move on to the next candidate. A winning
    /// response with a missing or unknown content type fails the image.
    pub async fn ingest_one(
        &self,
        candidates: &[String],
        domain: &str,
        position: i64,
        kind: ImageKind,
    ) -> IngestResult<StoredImage> {
        let mut downloaded = None;
        for url in candidates {
            match self.fetcher.get_image(url, domain).await {
                Ok(image) => {
                    downloaded = Some((url, image));
                    break;
                }
                Err(e) => debug!("Image candidate {} failed: {}", url, e),
            }
        }

        let Some((url, image)) = downloaded else {
            return Err(IngestError::NoResultFound {
                tried: candidates.to_vec(),
            });
        };

        let content_type = image
            .content_type
            .as_deref()
            .ok_or_else(|| IngestError::MissingContentType { url: url.clone() })?;
        let extension = extension_for(content_type).ok_or_else(|| IngestError::UnsupportedContentType {
            content_type: content_type.to_string(),
            url: url.clone(),
        })?;

        let file_name = image_file_name(kind, &image.bytes, extension);
        self.store
            .save(&file_name, &image.bytes)
            .await
            .map_err(|source| IngestError::Storage {
                file_name: file_name.clone(),
                source,
            })?;

        debug!("🖼️ Stored {} from {}", file_name, url);

        Ok(StoredImage {
            file_name,
            origin_urls: candidates.to_vec(),
            position,
            kind,
        })
    }

    /// Run one job through the image queue and wait for it.
    pub async fn ingest_queued(&self, job: ImageJob) -> IngestResult<StoredImage> {
        let this = self.clone();
        let task_id = job.task_id();
        self.queue
            .submit(task_id, DEFAULT_PRIORITY, async move {
                this.ingest_one(&job.candidates, &job.domain, job.position, job.kind)
                    .await
            })
            .await
    }

    /// Ingest every job through the image queue.
    ///
    /// Failed jobs are left out (the image queue logs them); the rest keep
    /// job order.
    pub async fn ingest_many(&self, jobs: Vec<ImageJob>) -> Vec<StoredImage> {
        let total = jobs.len();
        let results = join_all(jobs.into_iter().map(|job| self.ingest_queued(job))).await;

        let images: Vec<StoredImage> = results.into_iter().filter_map(Result::ok).collect();

        info!("Ingested {}/{} images", images.len(), total);
        images
    }
}
