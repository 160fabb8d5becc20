//! Application layer module
//!
//! The ingestors that turn source pages into stored comics, chapters and
//! images, and the service facade exposing them.

pub mod chapter_ingestor;
pub mod comic_ingestor;
pub mod error;
pub mod image_ingestor;
pub mod state;

pub use chapter_ingestor::{ChapterIngestor, ChapterRequest, ChapterStream};
pub use comic_ingestor::ComicIngestor;
pub use error::{IngestError, IngestResult};
pub use image_ingestor::{ImageIngestor, ImageJob};
pub use state::{IngestionContext, IngestionService};
