//! Chapter page extractor: ordered page image candidates

use anyhow::Result;
use regex::Regex;
use tracing::debug;

use crate::domain::PageCandidates;

/// Finds every page image of a chapter together with its CDN mirror.
pub struct ChapterPageParser {
    page_regex: Regex,
}

impl ChapterPageParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            page_regex: Regex::new(
                r#"data-original\s*=\s*["']([^"']+)["'][^>]*?data-cdn\s*=\s*["']([^"']+)["']"#,
            )?,
        })
    }

    /// One entry per matched image, zero-based positions in document order.
    /// Identical mirrors collapse into a single candidate.
    pub fn extract_pages(&self, html: &str) -> Vec<PageCandidates> {
        let pages: Vec<PageCandidates> = self
            .page_regex
            .captures_iter(html)
            .zip(0_i64..)
            .map(|(captures, position)| {
                let mut candidates: Vec<String> = Vec::with_capacity(2);
                for url in [captures.get(1), captures.get(2)].into_iter().flatten() {
                    let url = normalize_image_url(url.as_str());
                    if !url.is_empty() && !candidates.contains(&url) {
                        candidates.push(url);
                    }
                }
                PageCandidates { position, candidates }
            })
            .collect();

        debug!("Found {} page images", pages.len());
        pages
    }
}

fn normalize_image_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("//") {
        format!("https:{trimmed}")
    } else {
        trimmed.to_string()
    }
}
