//! HTTP fetch utilities, the fetch-or-reuse cache layer and the release
//! host client.

use std::sync::Arc;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN, USER_AGENT};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

pub mod cache;
pub mod release;

pub const CRATE_NAME: &str = "qag-fetch";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("empty response body from {url}")]
    EmptyBody { url: String },
    #[error("invalid JSON from {url}: {source}")]
    InvalidJson {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Sent on every request; the marketplace rejects anonymous clients.
    pub origin: String,
    pub user_agent: String,
    pub max_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            origin: "https://sidequestvr.com".to_string(),
            user_agent: "QuestAppLauncher Assets".to_string(),
            max_concurrency: 16,
        }
    }
}

/// Raw response payload for binary fetches (cover images, release assets).
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Thin `reqwest` wrapper: fixed header set, bounded outbound concurrency,
/// fail-fast on non-success statuses and empty bodies.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ORIGIN,
            HeaderValue::from_str(&config.origin).context("origin header")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("user-agent header")?,
        );

        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .default_headers(headers)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
        })
    }

    async fn get(&self, url: &str, accept: Option<&'static str>) -> Result<reqwest::Response, FetchError> {
        let _permit = self.limit.acquire().await.expect("semaphore not closed");
        debug!(url, "http get");
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response)
    }

    pub async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let response = self.get(url, None).await?;
        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }
        serde_json::from_slice(&body).map_err(|source| FetchError::InvalidJson {
            url: url.to_string(),
            source,
        })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.get(url, Some("*/*")).await?;
        let text = response.text().await?;
        if text.is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }
        Ok(text)
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedBytes, FetchError> {
        let response = self.get(url, Some("*/*")).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let final_url = response.url().to_string();
        let body = response.bytes().await?.to_vec();
        Ok(FetchedBytes {
            url: final_url,
            content_type,
            body,
        })
    }
}

/// Maps an image response's content type to a file extension.
fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    // Parameters like "; charset=..." are not part of the media type.
    let media_type = content_type.split(';').next().unwrap_or("").trim();
    match media_type {
        "image/jpeg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/webp" => Some(".webp"),
        "image/gif" => Some(".gif"),
        "image/bmp" => Some(".bmp"),
        _ => None,
    }
}

/// Extension of the URL's path component, including the dot.
fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let dot = file.rfind('.')?;
    if dot + 1 == file.len() {
        return None;
    }
    Some(file[dot..].to_ascii_lowercase())
}

/// Picks a file extension for a fetched image: content type first, the
/// URL's own extension when the content type is unrecognized.
pub fn guess_extension(content_type: Option<&str>, url: &str) -> Option<String> {
    if let Some(ext) = content_type.and_then(extension_for_content_type) {
        return Some(ext.to_string());
    }
    extension_from_url(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_wins_over_url_extension() {
        assert_eq!(
            guess_extension(Some("image/png"), "https://cdn.example/icon.jpg").as_deref(),
            Some(".png")
        );
    }

    #[test]
    fn charset_parameters_are_ignored() {
        assert_eq!(
            guess_extension(Some("image/jpeg; charset=binary"), "https://x/y").as_deref(),
            Some(".jpg")
        );
    }

    #[test]
    fn unrecognized_content_type_falls_back_to_url() {
        assert_eq!(
            guess_extension(Some("application/octet-stream"), "https://cdn/a/banner.WEBP?v=2")
                .as_deref(),
            Some(".webp")
        );
        assert_eq!(
            guess_extension(None, "https://cdn/a/banner.png#frag").as_deref(),
            Some(".png")
        );
    }

    #[test]
    fn extensionless_url_yields_none() {
        assert_eq!(guess_extension(None, "https://cdn/app/icon"), None);
        assert_eq!(guess_extension(None, "https://cdn/app/icon."), None);
    }
}
