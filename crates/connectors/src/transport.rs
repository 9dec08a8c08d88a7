//! Raw byte transport for metric sources: local files and HTTP GET.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use quarry_common::config::FetchSettings;
use quarry_error::{ErrorCode, ErrorContext, QuarryError, Result};
use reqwest::header::{HeaderValue, ACCEPT};
use tracing::{debug, warn};
use url::Url;

const BODY_EXCERPT_CHARS: usize = 512;

/// Where a locator points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Http(Url),
}

impl Location {
    /// `http(s)://` URLs are remote; `file://` URLs and bare paths are local.
    pub fn parse(locator: &str) -> Result<Self> {
        let lower = locator.trim_start().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = Url::parse(locator.trim()).map_err(|e| {
                QuarryError::new(
                    ErrorCode::InvalidRequest,
                    format!("invalid source URL '{}': {}", locator, e),
                )
            })?;
            return Ok(Location::Http(url));
        }
        if lower.starts_with("file://") {
            let url = Url::parse(locator.trim()).map_err(|e| {
                QuarryError::new(
                    ErrorCode::InvalidRequest,
                    format!("invalid file URL '{}': {}", locator, e),
                )
            })?;
            let path = url.to_file_path().map_err(|_| {
                QuarryError::new(
                    ErrorCode::InvalidRequest,
                    format!("file URL '{}' has no local path", locator),
                )
            })?;
            return Ok(Location::File(path));
        }
        Ok(Location::File(PathBuf::from(locator)))
    }
}

/// Appends `name=value` pairs to the URL's query string, percent-encoded.
pub fn with_query_params(mut url: Url, params: &[(String, String)]) -> Url {
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in params {
            pairs.append_pair(name, value);
        }
    }
    url
}

/// Fetches source payloads. One instance owns one pooled HTTP client.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
}

impl Transport {
    pub fn new(settings: &FetchSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(|e| {
                QuarryError::new(
                    ErrorCode::InternalPanic,
                    format!("failed to build HTTP client: {}", e),
                )
            })?;
        Ok(Self { client })
    }

    /// Reads the payload behind `locator`. `params` are only sent to HTTP sources.
    pub async fn fetch(&self, locator: &str, params: &[(String, String)]) -> Result<Bytes> {
        match Location::parse(locator)? {
            Location::File(path) => {
                debug!(path = %path.display(), "reading local source");
                let data = tokio::fs::read(&path).await.map_err(|e| {
                    QuarryError::new(
                        ErrorCode::SourceIo,
                        format!("cannot read {}: {}", path.display(), e),
                    )
                    .with_context(source_context(locator, None, None))
                })?;
                Ok(Bytes::from(data))
            }
            Location::Http(url) => self.get(with_query_params(url, params), locator).await,
        }
    }

    async fn get(&self, url: Url, locator: &str) -> Result<Bytes> {
        debug!(url = %url, "fetching remote source");
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await
            .map_err(|e| request_error(e, locator))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(BODY_EXCERPT_CHARS).collect();
            warn!(url = %url, status = status.as_u16(), "source returned an error status");
            return Err(QuarryError::new(
                ErrorCode::SourceUnavailable,
                format!("GET {} returned {}: {}", url, status, excerpt),
            )
            .with_context(source_context(
                locator,
                Some(status.as_u16()),
                Some(excerpt),
            )));
        }

        response.bytes().await.map_err(|e| request_error(e, locator))
    }
}

fn source_context(locator: &str, status: Option<u16>, body: Option<String>) -> ErrorContext {
    ErrorContext::Source {
        locator: locator.to_string(),
        status,
        body_excerpt: body,
    }
}

fn request_error(err: reqwest::Error, locator: &str) -> QuarryError {
    let code = if err.is_timeout() {
        ErrorCode::ConnectionTimeout
    } else {
        ErrorCode::SourceUnavailable
    };
    QuarryError::new(code, format!("request to {} failed: {}", locator, err))
        .with_context(source_context(locator, err.status().map(|s| s.as_u16()), None))
}
