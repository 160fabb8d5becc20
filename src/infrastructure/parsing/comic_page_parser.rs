//! Comic landing page extractor
//!
//! Pulls the identifying variables out of the page's inline script block,
//! finds the cover image with an ordered list of fallback selectors, then asks
//! the fetcher for the chapter list.

use anyhow::Result;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use super::{ParsingError, ParsingResult, compile_selectors};
use crate::domain::{ChapterStub, ComicInfo};
use crate::infrastructure::http_client::PageFetcher;

const THUMBNAIL_SELECTORS: &[&str] = &[
    ".book_avatar img",
    ".book_detail .book_avatar img",
    ".detail-info .col-image img",
    ".story-detail .thumbnail img",
    "img[itemprop='image']",
];

const DESCRIPTION_SELECTORS: &[&str] = &[
    ".story-detail-info",
    ".detail-content p",
    ".book_detail .detail-content",
];

const STATUS_SELECTORS: &[&str] = &[
    ".list-info .status .col-xs-8",
    "li.status p.col-xs-9",
    ".book_info .status",
];

/// Data read from the page itself, before the chapter list is fetched.
#[derive(Debug)]
struct ParsedComicPage {
    origin_id: String,
    slug: String,
    title: String,
    description: String,
    status: String,
    thumb_url: String,
}

pub struct ComicPageParser {
    id_regex: Regex,
    slug_regex: Regex,
    title_regex: Regex,
    thumbnail_selectors: Vec<(String, Selector)>,
    description_selectors: Vec<(String, Selector)>,
    status_selectors: Vec<(String, Selector)>,
    meta_description: Selector,
}

impl ComicPageParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            id_regex: Regex::new(r#"comicId\s*=\s*["']?([\w-]+)["']?"#)?,
            slug_regex: Regex::new(r#"comicSlug\s*=\s*(?:"([^"]+)"|'([^']+)')"#)?,
            title_regex: Regex::new(r#"comicName\s*=\s*(?:"([^"]+)"|'([^']+)')"#)?,
            thumbnail_selectors: compile_selectors(THUMBNAIL_SELECTORS)?,
            description_selectors: compile_selectors(DESCRIPTION_SELECTORS)?,
            status_selectors: compile_selectors(STATUS_SELECTORS)?,
            meta_description: Selector::parse("meta[name='description']")
                .map_err(|e| anyhow::anyhow!("Failed to compile meta selector: {}", e))?,
        })
    }

    /// Extract comic metadata plus the chapter list.
    ///
    /// Inputs are validated before any network call; the fetcher is only used
    /// for the chapter list.
    pub async fn extract(
        &self,
        fetcher: Option<&dyn PageFetcher>,
        url: &str,
        html: &str,
    ) -> ParsingResult<ComicInfo> {
        let fetcher = fetcher.ok_or(ParsingError::MissingFetcher)?;
        if html.trim().is_empty() {
            return Err(ParsingError::MissingHtml);
        }
        if url.trim().is_empty() {
            return Err(ParsingError::MissingUrl);
        }
        let base = parse_source_url(url)?;
        let domain = base.origin().ascii_serialization();

        // `Html` is not Send; finish with it before awaiting.
        let page = self.parse_page(&base, html)?;
        debug!("Parsed comic page {} (id {}, slug {})", url, page.origin_id, page.slug);

        let records = fetcher
            .get_chapter_list(&domain, &page.slug, &page.origin_id)
            .await?;

        let chapters: Vec<ChapterStub> = records
            .into_iter()
            .map(|record| {
                let path = format!("/truyen-tranh/{}/{}", page.slug, record.slug);
                ChapterStub {
                    href: format!("{domain}/{path}"),
                    chapter_number: record.num.to_string(),
                }
            })
            .collect();

        info!("📖 Extracted '{}' with {} chapters from {}", page.title, chapters.len(), url);

        Ok(ComicInfo {
            title: page.title,
            description: page.description,
            status: page.status,
            thumb_url: page.thumb_url,
            origin_id: page.origin_id,
            slug: page.slug,
            domain,
            chapters,
        })
    }

    fn parse_page(&self, base: &Url, html: &str) -> ParsingResult<ParsedComicPage> {
        let origin_id = first_capture(&self.id_regex, html).ok_or(ParsingError::IdNotFound)?;
        let slug = quoted_capture(&self.slug_regex, html).ok_or(ParsingError::SlugNotFound)?;
        let title = quoted_capture(&self.title_regex, html).ok_or(ParsingError::TitleNotFound)?;

        let document = Html::parse_document(html);
        let thumb_url = self.extract_thumbnail(&document, base)?;
        let description = self.extract_description(&document);
        let status = first_text(&document, &self.status_selectors).unwrap_or_default();

        Ok(ParsedComicPage {
            origin_id,
            slug,
            title,
            description,
            status,
            thumb_url,
        })
    }

    fn extract_thumbnail(&self, document: &Html, base: &Url) -> ParsingResult<String> {
        for (selector_str, selector) in &self.thumbnail_selectors {
            for element in document.select(selector) {
                let value = element.value();
                let src = value
                    .attr("data-src")
                    .filter(|s| !s.trim().is_empty())
                    .or_else(|| value.attr("src").filter(|s| !s.trim().is_empty()));

                if let Some(src) = src {
                    debug!("Thumbnail found with selector '{}'", selector_str);
                    return Ok(resolve_url(base, src.trim()));
                }
            }
        }

        Err(ParsingError::ThumbnailNotFound {
            tried_selectors: self
                .thumbnail_selectors
                .iter()
                .map(|(selector_str, _)| selector_str.clone())
                .collect(),
        })
    }

    fn extract_description(&self, document: &Html) -> String {
        if let Some(text) = first_text(document, &self.description_selectors) {
            return text;
        }
        document
            .select(&self.meta_description)
            .find_map(|meta| meta.value().attr("content"))
            .map(|content| content.trim().to_string())
            .unwrap_or_default()
    }
}

fn parse_source_url(url: &str) -> ParsingResult<Url> {
    let parsed = Url::parse(url.trim()).map_err(|e| ParsingError::invalid_url(url, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ParsingError::invalid_url(url, "scheme must be http or https"));
    }
    if parsed.host_str().is_none() {
        return Err(ParsingError::invalid_url(url, "missing host"));
    }
    Ok(parsed)
}

fn first_capture(regex: &Regex, haystack: &str) -> Option<String> {
    regex
        .captures(haystack)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

fn first_text(document: &Html, selectors: &[(String, Selector)]) -> Option<String> {
    selectors.iter().find_map(|(_, selector)| {
        document
            .select(selector)
            .map(|element| element.text().collect::<Vec<_>>().join(" "))
            .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
            .find(|text| !text.is_empty())
    })
}

/// Value of whichever quoted alternative matched.
fn quoted_capture(regex: &Regex, haystack: &str) -> Option<String> {
    regex
        .captures(haystack)
        .and_then(|captures| captures.get(1).or_else(|| captures.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Absolute URLs pass through; relative and protocol-relative ones resolve against the page.
fn resolve_url(base: &Url, src: &str) -> String {
    base.join(src)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| src.to_string())
}
