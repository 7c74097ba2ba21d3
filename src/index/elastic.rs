//! Elasticsearch backend over its HTTP API
//!
//! Definitions live in one index under the [`DOC_TYPE`] document type.
//! Basic auth is sent only when both user and password are configured.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::backend::{BulkDocument, ScrollPage, SearchBackend};
use super::mapping::DOC_TYPE;
use crate::config::SecretString;
use crate::error::IndexError;

/// Default timeout of a single HTTP request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Split a `host:port` address, rejecting anything else
pub fn parse_addr(addr: &str) -> Result<(String, u16), IndexError> {
    let invalid = || IndexError::InvalidAddress(addr.to_string());

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.contains(':') || host.contains('/') {
        return Err(invalid());
    }
    let port: u16 = port.parse().map_err(|_| invalid())?;
    if port == 0 {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// Format a scroll keep-alive the way the search API expects it
pub fn format_ttl(ttl: Duration) -> String {
    let secs = ttl.as_secs().max(1);
    if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Build the newline-delimited body of a bulk request
///
/// Every document becomes an `index` action line followed by its source
/// line. The body ends with a newline.
pub fn bulk_body(index: &str, docs: &[BulkDocument]) -> Result<String, IndexError> {
    let mut body = String::new();
    for doc in docs {
        let action = json!({
            "index": { "_index": index, "_type": DOC_TYPE, "_id": doc.id }
        });
        let action = serde_json::to_string(&action)
            .map_err(|e| IndexError::SerializationError(e.to_string()))?;
        let source = serde_json::to_string(&doc.source)
            .map_err(|e| IndexError::SerializationError(e.to_string()))?;
        body.push_str(&action);
        body.push('\n');
        body.push_str(&source);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

impl BulkResponse {
    /// First per-item error, if the response reports any
    fn first_error(&self) -> Option<String> {
        if !self.errors {
            return None;
        }
        let reason = self
            .items
            .iter()
            .filter_map(|item| item.as_object()?.values().next()?.get("error").cloned())
            .next()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown item error".to_string());
        Some(reason)
    }
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: Value,
}

#[derive(Debug, Default, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct ScrollResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    #[serde(default)]
    hits: SearchHits,
}

impl From<ScrollResponse> for ScrollPage {
    fn from(resp: ScrollResponse) -> Self {
        ScrollPage {
            scroll_id: resp.scroll_id,
            hits: resp.hits.hits.into_iter().map(|h| h.source).collect(),
        }
    }
}

/// Parse a search or scroll response body into a page
pub fn parse_scroll_page(body: &[u8]) -> Result<ScrollPage, IndexError> {
    serde_json::from_slice::<ScrollResponse>(body)
        .map(ScrollPage::from)
        .map_err(|e| IndexError::DeserializationError(e.to_string()))
}

/// Elasticsearch client
pub struct ElasticsearchBackend {
    client: Client,
    base: Url,
    user: Option<String>,
    pass: Option<SecretString>,
}

impl ElasticsearchBackend {
    /// Create a client for `addr` (`host:port`)
    ///
    /// Credentials are used only when both are non-empty.
    pub fn new(
        addr: &str,
        user: &str,
        pass: &SecretString,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        let (host, port) = parse_addr(addr)?;
        let base = Url::parse(&format!("http://{}:{}/", host, port))
            .map_err(|_| IndexError::InvalidAddress(addr.to_string()))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::ConnectionError(e.to_string()))?;

        let (user, pass) = if user.is_empty() || pass.expose_secret().is_empty() {
            (None, None)
        } else {
            (Some(user.to_string()), Some(pass.clone()))
        };

        Ok(Self {
            client,
            base,
            user,
            pass,
        })
    }

    /// Whether requests carry basic auth
    pub fn uses_auth(&self) -> bool {
        self.user.is_some()
    }

    fn url(&self, segments: &[&str]) -> Result<Url, IndexError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::InvalidAddress(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match (&self.user, &self.pass) {
            (Some(user), Some(pass)) => builder.basic_auth(user, Some(pass.expose_secret())),
            _ => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<(StatusCode, Vec<u8>), IndexError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| IndexError::ConnectionError(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| IndexError::ConnectionError(e.to_string()))?;
        Ok((status, body.to_vec()))
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> IndexError {
    IndexError::QueryError(format!(
        "status {}: {}",
        status,
        String::from_utf8_lossy(body)
    ))
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    async fn index_exists(&self, index: &str) -> Result<bool, IndexError> {
        let url = self.url(&[index])?;
        let (status, body) = self.send(self.request(Method::HEAD, url)).await?;
        match status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(status_error(other, &body)),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), IndexError> {
        let url = self.url(&[index])?;
        let (status, resp) = self
            .send(self.request(Method::PUT, url).json(body))
            .await?;
        if !status.is_success() {
            return Err(status_error(status, &resp));
        }
        debug!(index, "created index");
        Ok(())
    }

    async fn bulk(
        &self,
        index: &str,
        docs: &[BulkDocument],
        refresh: bool,
    ) -> Result<(), IndexError> {
        let mut url = self.url(&["_bulk"])?;
        if refresh {
            url.set_query(Some("refresh=true"));
        }
        let body = bulk_body(index, docs)?;

        let (status, resp) = self
            .send(
                self.request(Method::POST, url)
                    .header("Content-Type", "application/x-ndjson")
                    .body(body),
            )
            .await?;
        if !status.is_success() {
            return Err(IndexError::BulkFailed(format!(
                "status {}: {}",
                status,
                String::from_utf8_lossy(&resp)
            )));
        }

        let parsed: BulkResponse = serde_json::from_slice(&resp)
            .map_err(|e| IndexError::DeserializationError(e.to_string()))?;
        match parsed.first_error() {
            Some(reason) => Err(IndexError::BulkFailed(reason)),
            None => Ok(()),
        }
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, IndexError> {
        let url = self.url(&[index, DOC_TYPE, id])?;
        let (status, body) = self.send(self.request(Method::GET, url)).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let parsed: GetResponse = serde_json::from_slice(&body)
                    .map_err(|e| IndexError::DeserializationError(e.to_string()))?;
                if !parsed.found {
                    return Ok(None);
                }
                Ok(parsed.source)
            },
            other => Err(status_error(other, &body)),
        }
    }

    async fn search_scroll(&self, index: &str, ttl: Duration) -> Result<ScrollPage, IndexError> {
        let mut url = self.url(&[index, DOC_TYPE, "_search"])?;
        url.set_query(Some(&format!("scroll={}", format_ttl(ttl))));
        let (status, body) = self.send(self.request(Method::GET, url)).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        parse_scroll_page(&body)
    }

    async fn scroll(&self, scroll_id: &str, ttl: Duration) -> Result<ScrollPage, IndexError> {
        let url = self.url(&["_search", "scroll"])?;
        let req = json!({ "scroll": format_ttl(ttl), "scroll_id": scroll_id });
        let (status, body) = self
            .send(self.request(Method::POST, url).json(&req))
            .await?;
        if !status.is_success() {
            warn!(%status, "scroll request rejected");
            return Err(status_error(status, &body));
        }
        parse_scroll_page(&body)
    }
}
