//! HTTP fetcher for comic source sites
//!
//! Outbound GETs in text, binary and JSON mode. Image requests carry spoofed
//! `Referer`/`Origin`/`Sec-Fetch-*` headers so hotlink protection on the
//! source CDN lets them through. There is no retry logic here: every failure
//! is returned to the caller unchanged and the caller decides what to do.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER};
use reqwest::{Client, ClientBuilder, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::infrastructure::config::HttpConfig;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status}: {url}")]
    Status { status: u16, url: String },

    #[error("Failed to read response body from {url}: {reason}")]
    Body { url: String, reason: String },

    #[error("Empty response from {url}")]
    Empty { url: String },

    #[error("Invalid header value for {name}: {value}")]
    InvalidHeader { name: &'static str, value: String },

    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

/// Raw image bytes plus the content type the server announced, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Chapter numbers arrive as JSON numbers or, on some mirrors, as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChapterNumber {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for ChapterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => f.write_str(text.trim()),
        }
    }
}

impl From<i64> for ChapterNumber {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

/// One entry of the remote chapter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    #[serde(alias = "chapter_num", alias = "number")]
    pub num: ChapterNumber,
    #[serde(alias = "chapter_slug")]
    pub slug: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChapterListResponse {
    List(Vec<ChapterRecord>),
    Wrapped { data: Vec<ChapterRecord> },
}

impl ChapterListResponse {
    fn into_records(self) -> Vec<ChapterRecord> {
        match self {
            Self::List(records) | Self::Wrapped { data: records } => records,
        }
    }
}

/// Network capability consumed by the extractor and the ingestors.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page as text.
    async fn get(&self, url: &str) -> Result<String, FetchError>;

    /// Fetch an image in binary mode, pretending to be embedded on `domain`.
    async fn get_image(&self, url: &str, domain: &str) -> Result<FetchedImage, FetchError>;

    /// Fetch the full chapter list of a comic.
    async fn get_chapter_list(
        &self,
        domain: &str,
        slug: &str,
        comic_id: &str,
    ) -> Result<Vec<ChapterRecord>, FetchError>;
}

/// Configuration for HTTP client behavior
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
    /// Whether to follow redirects
    pub follow_redirects: bool,
    /// Path of the chapter list endpoint, with `{id}` and `{slug}` placeholders
    pub chapter_list_path: String,
}

impl HttpClientConfig {
    pub fn from_http_config(http: &HttpConfig) -> Self {
        Self {
            timeout_seconds: http.request_timeout_seconds,
            user_agent: http.user_agent.clone(),
            follow_redirects: http.follow_redirects,
            chapter_list_path: http.chapter_list_path.clone(),
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::from_http_config(&HttpConfig::default())
    }
}

/// reqwest-backed [`PageFetcher`].
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn with_config(config: HttpClientConfig) -> Result<Self, FetchError> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn from_http_config(http: &HttpConfig) -> Result<Self, FetchError> {
        Self::with_config(HttpClientConfig::from_http_config(http))
    }

    /// URL of the chapter list endpoint for one comic.
    pub fn chapter_list_url(&self, domain: &str, slug: &str, comic_id: &str) -> String {
        let path = self
            .config
            .chapter_list_path
            .replace("{id}", comic_id)
            .replace("{slug}", slug);
        format!("{}{}", domain.trim_end_matches('/'), path)
    }

    async fn send(&self, url: &str, headers: HeaderMap) -> Result<Response, FetchError> {
        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            error!("❌ HTTP error {}: {}", response.status(), url);
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response)
    }
}

/// Headers that make an image request look like it came from a page on `domain`.
pub fn image_request_headers(domain: &str) -> Result<HeaderMap, FetchError> {
    let origin = domain.trim_end_matches('/');
    let mut headers = HeaderMap::new();
    headers.insert(REFERER, header_value("referer", &format!("{origin}/"))?);
    headers.insert(ORIGIN, header_value("origin", origin)?);
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("image/avif,image/webp,image/apng,image/*,*/*;q=0.8"),
    );
    headers.insert(HeaderName::from_static("sec-fetch-dest"), HeaderValue::from_static("image"));
    headers.insert(HeaderName::from_static("sec-fetch-mode"), HeaderValue::from_static("no-cors"));
    headers.insert(HeaderName::from_static("sec-fetch-site"), HeaderValue::from_static("cross-site"));
    Ok(headers)
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, FetchError> {
    HeaderValue::from_str(value).map_err(|_| FetchError::InvalidHeader {
        name,
        value: value.to_string(),
    })
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        info!("🌐 HTTP GET: {}", url);
        let response = self.send(url, HeaderMap::new()).await?;

        let body = response.text().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if body.is_empty() {
            return Err(FetchError::Empty { url: url.to_string() });
        }

        Ok(body)
    }

    async fn get_image(&self, url: &str, domain: &str) -> Result<FetchedImage, FetchError> {
        debug!("🖼️ HTTP GET (image, referer {}): {}", domain, url);
        let response = self.send(url, image_request_headers(domain)?).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if bytes.is_empty() {
            return Err(FetchError::Empty { url: url.to_string() });
        }

        Ok(FetchedImage {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    async fn get_chapter_list(
        &self,
        domain: &str,
        slug: &str,
        comic_id: &str,
    ) -> Result<Vec<ChapterRecord>, FetchError> {
        let url = self.chapter_list_url(domain, slug, comic_id);
        info!("📚 Fetching chapter list: {}", url);

        let mut headers = HeaderMap::new();
        headers.insert(REFERER, header_value("referer", &format!("{}/", domain.trim_end_matches('/')))?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response = self.send(&url, headers).await?;
        let records = response
            .json::<ChapterListResponse>()
            .await
            .map_err(|e| FetchError::Body {
                url: url.clone(),
                reason: e.to_string(),
            })?
            .into_records();

        debug!("Chapter list for {} has {} entries", comic_id, records.len());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpClient::with_config(HttpClientConfig::default());
        assert!(client.is_ok());
    }

    #[test]
    fn image_headers_spoof_the_source_site() {
        let headers = image_request_headers("https://comics.example").unwrap();

        assert_eq!(headers[REFERER], "https://comics.example/");
        assert_eq!(headers[ORIGIN], "https://comics.example");
        assert_eq!(headers["sec-fetch-dest"], "image");
        assert_eq!(headers["sec-fetch-mode"], "no-cors");
        assert_eq!(headers["sec-fetch-site"], "cross-site");
    }

    #[test]
    fn image_headers_reject_unprintable_domains() {
        let result = image_request_headers("https://bad\nhost");
        assert!(matches!(result, Err(FetchError::InvalidHeader { name: "referer", .. })));
    }

    #[test]
    fn chapter_list_url_fills_placeholders() {
        let client = HttpClient::with_config(HttpClientConfig {
            chapter_list_path: "/api/comics/{id}/chapters?slug={slug}".to_string(),
            ..HttpClientConfig::default()
        })
        .unwrap();

        assert_eq!(
            client.chapter_list_url("https://comics.example/", "my-comic", "42"),
            "https://comics.example/api/comics/42/chapters?slug=my-comic"
        );
    }

    #[test]
    fn chapter_list_accepts_bare_and_wrapped_payloads() {
        let bare: ChapterListResponse =
            serde_json::from_str(r#"[{"num": 1, "slug": "chapter-1"}]"#).unwrap();
        let wrapped: ChapterListResponse = serde_json::from_str(
            r#"{"data": [{"chapter_num": "2", "chapter_slug": "chapter-2"}, {"number": 2.5, "slug": "chapter-2-5"}]}"#,
        )
        .unwrap();

        let bare = bare.into_records();
        assert_eq!(bare[0].num.to_string(), "1");
        assert_eq!(bare[0].slug, "chapter-1");

        let wrapped = wrapped.into_records();
        assert_eq!(wrapped.len(), 2);
        assert_eq!(wrapped[0].num.to_string(), "2");
        assert_eq!(wrapped[1].num.to_string(), "2.5");
    }
}
