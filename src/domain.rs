//! Domain module - Core entities of the ingestion pipeline
//!
//! Comics, chapters and images as they are persisted, plus the value objects
//! that travel between the extractor, the ingestors and the repositories.

pub mod entities;
pub mod value_objects;

pub use entities::{Chapter, Comic, CrawlStatus, Image, ImageKind};
pub use value_objects::{ChapterStub, ComicInfo, ImageOwner, NewChapter, NewComic, NewImage, PageCandidates, StoredImage};
