//! Error taxonomy of the ingestion pipeline

use std::io;
use thiserror::Error;

use crate::crawling::QueueError;
use crate::infrastructure::http_client::FetchError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Stable message for any failure to understand a comic page; the raw
    /// cause is logged where it happens.
    #[error("comic not found at {url}")]
    ComicNotFoundByUrl { url: String },

    #[error("comic {comic_id} not found")]
    ComicNotFound { comic_id: i64 },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("no candidate url produced an image (tried {tried:?})")]
    NoResultFound { tried: Vec<String> },

    #[error("unsupported content type '{content_type}' from {url}")]
    UnsupportedContentType { content_type: String, url: String },

    #[error("response from {url} has no content type")]
    MissingContentType { url: String },

    #[error("failed to store {file_name}: {source}")]
    Storage {
        file_name: String,
        #[source]
        source: io::Error,
    },

    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl IngestError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the error is a `comics.origin_id` (or other) uniqueness violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Persistence(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
