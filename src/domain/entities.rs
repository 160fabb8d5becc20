//! Domain entities
//!
//! Contains the persisted entities and the crawl status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-entity crawl lifecycle marker.
///
/// Only moves forward: `ReadyForCrawl -> OnCrawl -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlStatus {
    ReadyForCrawl,
    OnCrawl,
    Done,
}

impl CrawlStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadyForCrawl => "READY_FOR_CRAWL",
            Self::OnCrawl => "ON_CRAWL",
            Self::Done => "DONE",
        }
    }

    /// Whether a transition from `self` to `next` keeps the lifecycle moving forward.
    /// Re-asserting the current status is allowed.
    pub fn can_advance_to(self, next: Self) -> bool {
        next >= self
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrawlStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READY_FOR_CRAWL" => Ok(Self::ReadyForCrawl),
            "ON_CRAWL" => Ok(Self::OnCrawl),
            "DONE" => Ok(Self::Done),
            other => Err(format!("unknown crawl status: {other}")),
        }
    }
}

/// Which parent an image is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageKind {
    Thumb,
    Page,
}

impl ImageKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Thumb => "THUMB",
            Self::Page => "PAGE",
        }
    }

    /// Prefix used for stored file names.
    pub const fn file_prefix(self) -> &'static str {
        match self {
            Self::Thumb => "thumb",
            Self::Page => "page",
        }
    }
}

impl FromStr for ImageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "THUMB" => Ok(Self::Thumb),
            "PAGE" => Ok(Self::Page),
            other => Err(format!("unknown image kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comic {
    pub id: i64,
    /// Identifier assigned by the source website; unique across all comics.
    pub origin_id: String,
    pub origin_url: String,
    pub title: String,
    pub description: String,
    pub status: String,
    /// Number of chapters listed at creation time. Never recomputed.
    pub chapter_count: i64,
    pub crawl_status: CrawlStatus,
    pub thumb_image_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub comic_id: i64,
    pub chapter_number: String,
    pub title: String,
    pub source_url: String,
    pub position: i64,
    pub crawl_status: CrawlStatus,
    /// Filled only when loaded explicitly through the image repository.
    #[serde(default)]
    pub images: Vec<Image>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub file_name: String,
    /// Every candidate URL tried for this image, in the order they were given.
    pub origin_urls: Vec<String>,
    pub position: i64,
    pub kind: ImageKind,
    pub comic_id: Option<i64>,
    pub chapter_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}
