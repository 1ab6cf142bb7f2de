//! HTTP retrieval of raw OpenAPI documents.

use async_trait::async_trait;
use indexmap::IndexMap;
use openapi_explorer_index::{FetchError, FetchedDocument};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use url::Url;

const ACCEPT_DOCUMENT: &str =
    "application/json, application/yaml;q=0.9, application/x-yaml;q=0.9, */*;q=0.8";

/// Source of raw document bytes.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        headers: &IndexMap<String, String>,
    ) -> Result<FetchedDocument, FetchError>;
}

/// [`DocumentFetcher`] over `reqwest` with a per-request timeout and a body size limit.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl HttpFetcher {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed (TLS backend init).
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("openapi-explorer-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            timeout,
            max_bytes,
        })
    }

    fn map_reqwest_error(&self, url: &str, e: &reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: sanitize_reqwest_error(e),
            }
        }
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        headers: &IndexMap<String, String>,
    ) -> Result<FetchedDocument, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::Network {
            url: url.to_string(),
            message: format!("invalid url: {e}"),
        })?;
        let shown = redact_url(&parsed);
        let header_map = build_headers(&shown, headers)?;

        tracing::info!(url = %shown, "Fetching OpenAPI document");
        let mut response = self
            .client
            .get(parsed)
            .headers(header_map)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(&shown, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: shown,
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(len) = response.content_length()
            && len > self.max_bytes as u64
        {
            return Err(FetchError::TooLarge {
                url: shown,
                limit: self.max_bytes,
            });
        }

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.map_reqwest_error(&shown, &e))?
        {
            if bytes.len().saturating_add(chunk.len()) > self.max_bytes {
                return Err(FetchError::TooLarge {
                    url: shown,
                    limit: self.max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        tracing::debug!(url = %shown, bytes = bytes.len(), "Fetched OpenAPI document");
        Ok(FetchedDocument::new(bytes, content_type))
    }
}

fn build_headers(url: &str, headers: &IndexMap<String, String>) -> Result<HeaderMap, FetchError> {
    let invalid = |what: &str, name: &str| FetchError::Network {
        url: url.to_string(),
        message: format!("invalid header {what} for '{name}'"),
    };
    let mut map = HeaderMap::new();
    map.insert(ACCEPT, HeaderValue::from_static(ACCEPT_DOCUMENT));
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid("name", name))?;
        let mut header_value =
            HeaderValue::from_str(value).map_err(|_| invalid("value", name))?;
        header_value.set_sensitive(true);
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Drop credentials, query and fragment before a URL reaches logs or error messages.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}
