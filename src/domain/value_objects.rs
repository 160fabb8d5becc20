//! Value objects passed between extraction, ingestion and persistence.

use serde::{Deserialize, Serialize};

use super::entities::ImageKind;

/// One chapter as advertised by the source's chapter list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterStub {
    pub href: String,
    pub chapter_number: String,
}

/// Everything the extractor learns about a comic from its landing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComicInfo {
    pub title: String,
    pub description: String,
    pub status: String,
    pub thumb_url: String,
    pub origin_id: String,
    pub slug: String,
    /// Origin of the source site, e.g. `https://example.com` (no trailing slash).
    pub domain: String,
    /// Newest first, as the source lists them.
    pub chapters: Vec<ChapterStub>,
}

/// Mirrored source URLs for one page of a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCandidates {
    pub position: i64,
    pub candidates: Vec<String>,
}

/// The single parent an image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageOwner {
    Thumb { comic_id: i64 },
    Page { chapter_id: i64 },
}

impl ImageOwner {
    pub const fn kind(self) -> ImageKind {
        match self {
            Self::Thumb { .. } => ImageKind::Thumb,
            Self::Page { .. } => ImageKind::Page,
        }
    }

    pub const fn comic_id(self) -> Option<i64> {
        match self {
            Self::Thumb { comic_id } => Some(comic_id),
            Self::Page { .. } => None,
        }
    }

    pub const fn chapter_id(self) -> Option<i64> {
        match self {
            Self::Thumb { .. } => None,
            Self::Page { chapter_id } => Some(chapter_id),
        }
    }
}

/// Image bytes already in the content store, not yet tied to a parent row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub file_name: String,
    pub origin_urls: Vec<String>,
    pub position: i64,
    pub kind: ImageKind,
}

impl StoredImage {
    /// Attach to its parent: a comic for thumbnails, a chapter for pages.
    pub fn owned_by(self, parent_id: i64) -> NewImage {
        let owner = match self.kind {
            ImageKind::Thumb => ImageOwner::Thumb { comic_id: parent_id },
            ImageKind::Page => ImageOwner::Page { chapter_id: parent_id },
        };
        NewImage {
            file_name: self.file_name,
            origin_urls: self.origin_urls,
            position: self.position,
            owner,
        }
    }
}

/// An image whose bytes are already stored but whose row is not yet written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewImage {
    pub file_name: String,
    pub origin_urls: Vec<String>,
    pub position: i64,
    pub owner: ImageOwner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComic {
    pub origin_id: String,
    pub origin_url: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub chapter_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChapter {
    pub comic_id: i64,
    pub chapter_number: String,
    pub title: String,
    pub source_url: String,
    pub position: i64,
}

impl NewChapter {
    /// Build the stub rows for a freshly created comic.
    ///
    /// The source lists chapters newest first, so the chapter at index `i` of
    /// `n` gets position `n - i` and positions grow with chapter number.
    pub fn stubs_for(comic_id: i64, chapters: &[ChapterStub]) -> Vec<Self> {
        let total = i64::try_from(chapters.len()).unwrap_or(i64::MAX);
        chapters
            .iter()
            .zip(0_i64..)
            .map(|(stub, index)| Self {
                comic_id,
                chapter_number: stub.chapter_number.clone(),
                title: format!("Chapter {}", stub.chapter_number),
                source_url: stub.href.clone(),
                position: total - index,
            })
            .collect()
    }
}
