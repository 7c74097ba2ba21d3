//! In-memory search backend
//!
//! Keeps documents in ordered maps per index and serves scroll sessions from
//! snapshots. Used by tests and by local runs without a search engine.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::backend::{BulkDocument, ScrollPage, SearchBackend};
use crate::error::IndexError;

/// Default number of hits per scroll page
pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Default)]
struct StoredIndex {
    body: Value,
    docs: BTreeMap<String, Value>,
}

/// Search backend holding everything in process memory
pub struct MemoryBackend {
    indices: RwLock<HashMap<String, StoredIndex>>,
    scrolls: Mutex<HashMap<String, VecDeque<Value>>>,
    page_size: usize,
    next_scroll: AtomicU64,
    fail_bulk: AtomicBool,
    fail_reads: AtomicBool,
    bulk_sizes: Mutex<Vec<usize>>,
    last_refresh: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty backend returning at most `page_size` hits per scroll page
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            indices: RwLock::new(HashMap::new()),
            scrolls: Mutex::new(HashMap::new()),
            page_size: page_size.max(1),
            next_scroll: AtomicU64::new(1),
            fail_bulk: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            bulk_sizes: Mutex::new(Vec::new()),
            last_refresh: AtomicBool::new(false),
        }
    }

    /// Make every following bulk request fail
    pub fn set_fail_bulk(&self, fail: bool) {
        self.fail_bulk.store(fail, Ordering::SeqCst);
    }

    /// Make every following get and scroll request fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Store a raw document, bypassing bulk accounting
    pub fn insert_raw(&self, index: &str, id: &str, source: Value) {
        self.indices
            .write()
            .entry(index.to_string())
            .or_default()
            .docs
            .insert(id.to_string(), source);
    }

    /// Number of bulk requests received, failed ones included
    pub fn bulk_calls(&self) -> usize {
        self.bulk_sizes.lock().len()
    }

    /// Document count of each bulk request, in arrival order
    pub fn bulk_sizes(&self) -> Vec<usize> {
        self.bulk_sizes.lock().clone()
    }

    /// Refresh flag of the most recent bulk request
    pub fn last_refresh(&self) -> bool {
        self.last_refresh.load(Ordering::SeqCst)
    }

    /// Number of documents stored in `index`
    pub fn doc_count(&self, index: &str) -> usize {
        self.indices
            .read()
            .get(index)
            .map(|i| i.docs.len())
            .unwrap_or(0)
    }

    /// Body `index` was created with, if it exists
    pub fn index_body(&self, index: &str) -> Option<Value> {
        self.indices.read().get(index).map(|i| i.body.clone())
    }

    /// Number of open scroll sessions
    pub fn open_scrolls(&self) -> usize {
        self.scrolls.lock().len()
    }

    fn check_reads(&self) -> Result<(), IndexError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(IndexError::ConnectionError(
                "memory backend: reads disabled".to_string(),
            ));
        }
        Ok(())
    }

    fn next_page(&self, scroll_id: String, remaining: &mut VecDeque<Value>) -> ScrollPage {
        let take = self.page_size.min(remaining.len());
        ScrollPage {
            scroll_id: Some(scroll_id),
            hits: remaining.drain(..take).collect(),
        }
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn index_exists(&self, index: &str) -> Result<bool, IndexError> {
        Ok(self.indices.read().contains_key(index))
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), IndexError> {
        let mut indices = self.indices.write();
        if indices.contains_key(index) {
            return Err(IndexError::QueryError(format!(
                "index {} already exists",
                index
            )));
        }
        indices.insert(
            index.to_string(),
            StoredIndex {
                body: body.clone(),
                docs: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn bulk(
        &self,
        index: &str,
        docs: &[BulkDocument],
        refresh: bool,
    ) -> Result<(), IndexError> {
        self.bulk_sizes.lock().push(docs.len());
        self.last_refresh.store(refresh, Ordering::SeqCst);

        if self.fail_bulk.load(Ordering::SeqCst) {
            return Err(IndexError::BulkFailed(
                "memory backend: bulk disabled".to_string(),
            ));
        }

        let mut indices = self.indices.write();
        let stored = indices.entry(index.to_string()).or_default();
        for doc in docs {
            stored.docs.insert(doc.id.clone(), doc.source.clone());
        }
        Ok(())
    }

    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>, IndexError> {
        self.check_reads()?;
        Ok(self
            .indices
            .read()
            .get(index)
            .and_then(|i| i.docs.get(id).cloned()))
    }

    async fn search_scroll(&self, index: &str, _ttl: Duration) -> Result<ScrollPage, IndexError> {
        self.check_reads()?;
        let mut snapshot: VecDeque<Value> = match self.indices.read().get(index) {
            Some(stored) => stored.docs.values().cloned().collect(),
            None => {
                return Err(IndexError::QueryError(format!("no such index {}", index)));
            },
        };

        let scroll_id = format!("scroll-{}", self.next_scroll.fetch_add(1, Ordering::SeqCst));
        let page = self.next_page(scroll_id.clone(), &mut snapshot);
        self.scrolls.lock().insert(scroll_id, snapshot);
        Ok(page)
    }

    async fn scroll(&self, scroll_id: &str, _ttl: Duration) -> Result<ScrollPage, IndexError> {
        self.check_reads()?;
        let mut scrolls = self.scrolls.lock();
        let remaining = scrolls.get_mut(scroll_id).ok_or_else(|| {
            IndexError::QueryError(format!("no search context found for id {}", scroll_id))
        })?;

        let page = self.next_page(scroll_id.to_string(), remaining);
        if page.hits.is_empty() {
            scrolls.remove(scroll_id);
        }
        Ok(page)
    }
}
