//! # Crawl Task Identifiers
//!
//! Every job submitted to a crawl queue carries a `TaskId` so status snapshots
//! and logs can say which work is in flight.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::ImageKind;

/// Identifier of one queued job.
///
/// Usually a readable label such as `chapter:42` or
/// `page:https://cdn.example/42/3.jpg`; anonymous jobs get a random UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a new unique anonymous task ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn chapter(chapter_id: i64) -> Self {
        Self(format!("chapter:{chapter_id}"))
    }

    /// Image download labelled with its kind and first source URL.
    #[must_use]
    pub fn image(kind: ImageKind, source: &str) -> Self {
        Self(format!("{}:{source}", kind.file_prefix()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

impl From<String> for TaskId {
    fn from(label: String) -> Self {
        Self(label)
    }
}
