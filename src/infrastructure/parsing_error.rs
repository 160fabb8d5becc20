//! Extraction error types for comic and chapter pages
//!
//! Every missing input and every missing page field has its own variant so the
//! caller can tell exactly which part of the source page was not understood.

use thiserror::Error;

use crate::infrastructure::http_client::FetchError;

#[derive(Error, Debug)]
pub enum ParsingError {
    #[error("chapter list fetcher is required")]
    MissingFetcher,

    #[error("html body is required")]
    MissingHtml,

    #[error("source url is required")]
    MissingUrl,

    #[error("invalid source url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("comic id not found in page script")]
    IdNotFound,

    #[error("comic slug not found in page script")]
    SlugNotFound,

    #[error("comic title not found in page script")]
    TitleNotFound,

    #[error("thumbnail image not found (tried selectors: {tried_selectors:?})")]
    ThumbnailNotFound { tried_selectors: Vec<String> },

    #[error("failed to fetch chapter list: {0}")]
    ChapterList(#[from] FetchError),
}

impl ParsingError {
    pub fn invalid_url(url: &str, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type ParsingResult<T> = Result<T, ParsingError>;
