//! Search engine seam of the definition index

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::IndexError;

/// One document of a bulk request
#[derive(Debug, Clone, PartialEq)]
pub struct BulkDocument {
    /// Document id
    pub id: String,
    /// Document body
    pub source: Value,
}

/// One page of a scroll session
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    /// Scroll id to continue the session with
    pub scroll_id: Option<String>,
    /// Document sources of this page
    pub hits: Vec<Value>,
}

/// Operations the definition index needs from a search engine
///
/// Implementations must be safe to call from several flush workers at once.
#[async_trait]
pub trait SearchBackend: Send + Sync + 'static {
    /// Whether `index` exists
    async fn index_exists(&self, index: &str) -> Result<bool, IndexError>;

    /// Create `index` with the given settings and mappings
    async fn create_index(&self, index: &str, body: &Value) -> Result<(), IndexError>;

    /// Upsert documents by id in one request
    ///
    /// With `refresh` set, the documents are searchable when the call returns.
    async fn bulk(
        &self,
        index: &str,
        docs: &[BulkDocument],
        refresh: bool,
    ) -> Result<(), IndexError>;

    /// Fetch a document source by id; `Ok(None)` when absent
    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, IndexError>;

    /// Open a scroll session over every document in `index`
    async fn search_scroll(&self, index: &str, ttl: Duration) -> Result<ScrollPage, IndexError>;

    /// Fetch the next page of a scroll session
    async fn scroll(&self, scroll_id: &str, ttl: Duration) -> Result<ScrollPage, IndexError>;
}
