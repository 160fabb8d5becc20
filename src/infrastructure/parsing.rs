//! HTML and inline-script extraction for comic source pages

pub mod chapter_page_parser;
pub mod comic_page_parser;

pub use super::parsing_error::{ParsingError, ParsingResult};
pub use chapter_page_parser::ChapterPageParser;
pub use comic_page_parser::ComicPageParser;

use anyhow::Result;
use scraper::Selector;
use tracing::{debug, warn};

/// Compile selector strings, keeping the source text next to each compiled selector.
///
/// Invalid entries are skipped; an empty result is an error.
pub(crate) fn compile_selectors(selector_strings: &[&str]) -> Result<Vec<(String, Selector)>> {
    let mut selectors = Vec::new();
    let mut errors = Vec::new();

    for selector_str in selector_strings {
        match Selector::parse(selector_str) {
            Ok(selector) => selectors.push(((*selector_str).to_string(), selector)),
            Err(e) => {
                warn!("Failed to compile selector '{}': {}", selector_str, e);
                errors.push(format!("'{}': {}", selector_str, e));
            }
        }
    }

    if selectors.is_empty() {
        return Err(anyhow::anyhow!(
            "No valid selectors compiled. Errors: {}",
            errors.join(", ")
        ));
    }

    if !errors.is_empty() {
        debug!("Some selectors failed to compile: {}", errors.join(", "));
    }

    Ok(selectors)
}
