//! Definition index
//!
//! Durable, searchable store of series metadata. One document per series id,
//! written as upserts through a bulk batching writer.
//!
//! # Write path
//!
//! ```text
//! index_definition ──validate──> warmup gate ──admit──> BulkIndexer ──> SearchBackend::bulk
//!                                      │
//!                                      └──shed──> Admission::Discarded
//! ```
//!
//! # Read path
//!
//! - [`DefinitionIndex::get_definition`]: point lookup by id
//! - [`DefinitionIndex::list_definitions`]: paginated full scan over a scroll cursor

pub mod backend;
pub mod bulk;
pub mod defcache;
pub mod elastic;
pub mod mapping;
pub mod memory;
pub mod warmup;

pub use backend::{BulkDocument, ScrollPage, SearchBackend};
pub use bulk::{BulkConfig, BulkIndexer};
pub use defcache::DefCache;
pub use elastic::ElasticsearchBackend;
pub use memory::MemoryBackend;
pub use warmup::WarmupGate;

use async_trait::async_trait;
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SecretString;
use crate::engine::DefinitionSink;
use crate::error::IndexError;
use crate::metrics::{IndexMetrics, OUTCOME_DISCARDED, OUTCOME_INVALID, OUTCOME_QUEUED};
use crate::types::{MetricData, MetricDefinition};

/// Configuration of the definition index
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Search engine address, `host:port`
    pub addr: String,
    /// Basic auth user; auth is used only with a password too
    pub user: String,
    /// Basic auth password
    pub pass: SecretString,
    /// Name of the index holding definitions
    pub index_name: String,
    /// Length of the warmup window after startup
    pub warmup_window: Duration,
    /// Percentage of writes admitted during warmup
    pub warmup_percent: u32,
    /// Bulk writer settings
    pub bulk: BulkConfig,
    /// Keep-alive of scroll sessions
    pub scroll_ttl: Duration,
    /// Timeout of a single HTTP request
    pub request_timeout: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:9200".to_string(),
            user: String::new(),
            pass: SecretString::from(""),
            index_name: "metric".to_string(),
            warmup_window: warmup::DEFAULT_WARMUP_WINDOW,
            warmup_percent: 1,
            bulk: BulkConfig::default(),
            scroll_ttl: Duration::from_secs(60),
            request_timeout: elastic::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl IndexConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        elastic::parse_addr(&self.addr).map_err(|e| e.to_string())?;
        if self.index_name.is_empty() {
            return Err("index_name cannot be empty".to_string());
        }
        if self.warmup_percent > 100 {
            return Err(format!(
                "warmup_percent must be within 0..=100, got {}",
                self.warmup_percent
            ));
        }
        if self.scroll_ttl.is_zero() {
            return Err("scroll_ttl must be > 0".to_string());
        }
        self.bulk.validate()
    }
}

/// Outcome of a definition write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Handed to the bulk writer
    Queued,
    /// Shed by the warmup gate
    Discarded,
}

/// Definition index over a search backend
pub struct DefinitionIndex {
    backend: Arc<dyn SearchBackend>,
    index_name: String,
    warmup: WarmupGate,
    bulk: BulkIndexer,
    scroll_ttl: Duration,
    metrics: IndexMetrics,
}

impl DefinitionIndex {
    /// Connect to Elasticsearch at `config.addr` and initialize the index
    pub async fn connect(config: IndexConfig, registry: &Registry) -> Result<Self, IndexError> {
        let backend = ElasticsearchBackend::new(
            &config.addr,
            &config.user,
            &config.pass,
            config.request_timeout,
        )?;
        Self::init(config, Arc::new(backend), registry).await
    }

    /// Initialize the index on `backend`
    ///
    /// Creates the index with the definition mapping when it does not exist,
    /// opens the warmup window and starts the bulk writer.
    pub async fn init(
        config: IndexConfig,
        backend: Arc<dyn SearchBackend>,
        registry: &Registry,
    ) -> Result<Self, IndexError> {
        let gate = WarmupGate::new(config.warmup_window, config.warmup_percent);
        Self::init_with_gate(config, backend, registry, gate).await
    }

    /// Initialize the index with a given warmup gate
    pub async fn init_with_gate(
        config: IndexConfig,
        backend: Arc<dyn SearchBackend>,
        registry: &Registry,
        warmup: WarmupGate,
    ) -> Result<Self, IndexError> {
        config.validate().map_err(IndexError::ConfigError)?;
        let metrics =
            IndexMetrics::new(registry).map_err(|e| IndexError::ConfigError(e.to_string()))?;

        if backend.index_exists(&config.index_name).await? {
            debug!(index = %config.index_name, "index exists");
        } else {
            info!(index = %config.index_name, "creating index");
            backend
                .create_index(&config.index_name, &mapping::metric_mapping())
                .await?;
        }

        let bulk = BulkIndexer::start(
            Arc::clone(&backend),
            config.index_name.clone(),
            config.bulk.clone(),
            metrics.clone(),
        )?;

        info!(
            index = %config.index_name,
            warmup_percent = warmup.percent(),
            warmup_remaining = ?warmup.remaining(),
            "definition index ready"
        );

        Ok(Self {
            backend,
            index_name: config.index_name,
            warmup,
            bulk,
            scroll_ttl: config.scroll_ttl,
            metrics,
        })
    }

    /// Offer a definition for indexing
    ///
    /// # Returns
    ///
    /// * `Ok(Admission::Queued)` - handed to the bulk writer
    /// * `Ok(Admission::Discarded)` - shed during warmup
    /// * `Err(IndexError::InvalidDefinition)` - nothing was written
    pub async fn index_definition(&self, def: &MetricDefinition) -> Result<Admission, IndexError> {
        if let Err(reason) = def.validate() {
            self.metrics.record_write(OUTCOME_INVALID);
            return Err(IndexError::InvalidDefinition(reason));
        }

        if !self.warmup.admit() {
            self.metrics.record_write(OUTCOME_DISCARDED);
            return Ok(Admission::Discarded);
        }

        let source = serde_json::to_value(def)
            .map_err(|e| IndexError::SerializationError(e.to_string()))?;
        debug!(id = %def.id, index = %self.index_name, "queueing definition");
        self.bulk
            .index(BulkDocument {
                id: def.id.clone(),
                source,
            })
            .await?;
        self.metrics.record_write(OUTCOME_QUEUED);
        Ok(Admission::Queued)
    }

    /// Look up a definition by id
    ///
    /// An empty id is a caller error, distinct from "not found".
    pub async fn get_definition(&self, id: &str) -> Result<Option<MetricDefinition>, IndexError> {
        if id.is_empty() {
            return Err(IndexError::EmptyKey);
        }
        match self.backend.get(&self.index_name, id).await? {
            Some(source) => MetricDefinition::from_json(&source)
                .map(Some)
                .map_err(|e| IndexError::DeserializationError(format!("{}: {}", id, e))),
            None => Ok(None),
        }
    }

    /// Fetch one page of a full scan
    ///
    /// Pass an empty cursor to start a scan, then the returned cursor to
    /// continue it. An empty returned cursor means the scan is exhausted.
    pub async fn list_definitions(
        &self,
        cursor: &str,
    ) -> Result<(Vec<MetricDefinition>, String), IndexError> {
        let page = if cursor.is_empty() {
            self.backend
                .search_scroll(&self.index_name, self.scroll_ttl)
                .await?
        } else {
            self.backend.scroll(cursor, self.scroll_ttl).await?
        };

        let defs = page
            .hits
            .iter()
            .map(|source| {
                MetricDefinition::from_json(source)
                    .map_err(|e| IndexError::DeserializationError(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let next = if defs.is_empty() {
            String::new()
        } else {
            page.scroll_id.unwrap_or_default()
        };
        Ok((defs, next))
    }

    /// Write everything queued so far
    pub async fn flush(&self) -> Result<(), IndexError> {
        self.bulk.flush().await
    }

    /// Stop the bulk writer after a final flush
    pub async fn stop(&self) {
        info!(index = %self.index_name, "stopping definition index");
        self.bulk.stop().await;
    }

    /// Whether writes are still being sampled
    pub fn in_warmup(&self) -> bool {
        self.warmup.in_warmup()
    }

    /// Index metrics
    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }

    /// Name of the backing index
    pub fn index_name(&self) -> &str {
        &self.index_name
    }
}

#[async_trait]
impl DefinitionSink for DefinitionIndex {
    async fn add(&self, metric: &MetricData) {
        let def = MetricDefinition::from(metric);
        if let Err(e) = self.index_definition(&def).await {
            warn!(id = %metric.id, error = %e, "failed to index definition");
        }
    }
}
