//! Bulk batching writer for definition documents
//!
//! Documents are queued individually and written to the search engine in
//! bulk requests. A batch is flushed when either:
//! - `max_docs` documents are buffered
//! - the oldest buffered document has waited `buffer_delay_max`
//!
//! Up to `workers` bulk requests run concurrently. When all workers are busy
//! the flush loop waits, the queue fills up and `index` callers wait in turn.
//!
//! A failed bulk request is logged and counted, and its documents are
//! dropped. Nothing is retried: definitions are re-offered by the next point
//! of each series.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::backend::{BulkDocument, SearchBackend};
use crate::error::IndexError;
use crate::metrics::IndexMetrics;

/// Configuration for the bulk writer
#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Maximum concurrent bulk requests
    pub workers: usize,
    /// Maximum documents per bulk request
    pub max_docs: usize,
    /// Maximum time a document waits in the buffer
    pub buffer_delay_max: Duration,
    /// Make written documents searchable immediately
    pub refresh: bool,
    /// Retries of a failed bulk request (only 0 is supported)
    pub max_retries: usize,
    /// Capacity of the queue in front of the flush loop
    pub queue_capacity: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            workers: 20,
            max_docs: 10_000,
            buffer_delay_max: Duration::from_secs(10),
            refresh: true,
            max_retries: 0,
            queue_capacity: 10_000,
        }
    }
}

impl BulkConfig {
    /// Maximum allowed number of concurrent bulk requests
    const MAX_WORKERS: usize = 256;

    /// Maximum allowed documents per request
    const MAX_DOCS: usize = 100_000;

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be > 0".to_string());
        }
        if self.workers > Self::MAX_WORKERS {
            return Err(format!(
                "workers {} exceeds maximum allowed {}",
                self.workers,
                Self::MAX_WORKERS
            ));
        }
        if self.max_docs == 0 {
            return Err("max_docs must be > 0".to_string());
        }
        if self.max_docs > Self::MAX_DOCS {
            return Err(format!(
                "max_docs {} exceeds maximum allowed {}",
                self.max_docs,
                Self::MAX_DOCS
            ));
        }
        if self.buffer_delay_max.is_zero() {
            return Err("buffer_delay_max must be > 0".to_string());
        }
        if self.max_retries != 0 {
            return Err("bulk requests are never retried, max_retries must be 0".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be > 0".to_string());
        }
        Ok(())
    }
}

enum Command {
    Index(BulkDocument),
    Flush(oneshot::Sender<()>),
}

/// Bulk batching writer
pub struct BulkIndexer {
    /// Queue into the flush loop; `None` once stopped
    tx: RwLock<Option<mpsc::Sender<Command>>>,
    /// Flush loop task
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BulkIndexer {
    /// Validate the configuration and start the flush loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        backend: Arc<dyn SearchBackend>,
        index: impl Into<String>,
        config: BulkConfig,
        metrics: IndexMetrics,
    ) -> Result<Self, IndexError> {
        config.validate().map_err(IndexError::ConfigError)?;

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let flush_loop = FlushLoop {
            backend,
            index: index.into(),
            config,
            metrics,
        };

        info!(
            index = %flush_loop.index,
            workers = flush_loop.config.workers,
            max_docs = flush_loop.config.max_docs,
            buffer_delay_max = ?flush_loop.config.buffer_delay_max,
            "bulk indexer started"
        );
        let task = tokio::spawn(flush_loop.run(rx));

        Ok(Self {
            tx: RwLock::new(Some(tx)),
            task: Mutex::new(Some(task)),
        })
    }

    fn sender(&self) -> Result<mpsc::Sender<Command>, IndexError> {
        self.tx
            .read()
            .clone()
            .ok_or_else(|| IndexError::ChannelClosed("bulk indexer stopped".to_string()))
    }

    /// Queue a document
    ///
    /// Waits while the queue is full.
    pub async fn index(&self, doc: BulkDocument) -> Result<(), IndexError> {
        self.sender()?
            .send(Command::Index(doc))
            .await
            .map_err(|_| IndexError::ChannelClosed("bulk indexer stopped".to_string()))
    }

    /// Flush everything queued so far and wait for the bulk requests to finish
    pub async fn flush(&self) -> Result<(), IndexError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.sender()?
            .send(Command::Flush(done_tx))
            .await
            .map_err(|_| IndexError::ChannelClosed("bulk indexer stopped".to_string()))?;
        done_rx
            .await
            .map_err(|_| IndexError::ChannelClosed("flush loop ended".to_string()))
    }

    /// Close the queue, flush what is buffered and wait for the flush loop
    pub async fn stop(&self) {
        let tx = self.tx.write().take();
        drop(tx);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("bulk indexer flush loop panicked: {}", e);
            }
        }
    }

    /// Whether the queue still accepts documents
    pub fn is_running(&self) -> bool {
        self.tx.read().is_some()
    }
}

struct FlushLoop {
    backend: Arc<dyn SearchBackend>,
    index: String,
    config: BulkConfig,
    metrics: IndexMetrics,
}

impl FlushLoop {
    async fn run(self, mut rx: mpsc::Receiver<Command>) {
        let this = Arc::new(self);
        let permits = Arc::new(Semaphore::new(this.config.workers));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut buffer: Vec<BulkDocument> = Vec::new();
        let mut oldest: Option<Instant> = None;

        loop {
            let deadline = oldest.map(|t| t + this.config.buffer_delay_max);

            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Index(doc)) => {
                        if buffer.is_empty() {
                            oldest = Some(Instant::now());
                        }
                        buffer.push(doc);
                        if buffer.len() >= this.config.max_docs {
                            oldest = None;
                            this.dispatch(&mut buffer, &permits, &mut in_flight).await;
                        }
                    },
                    Some(Command::Flush(done)) => {
                        oldest = None;
                        this.dispatch(&mut buffer, &permits, &mut in_flight).await;
                        drain(&mut in_flight).await;
                        let _ = done.send(());
                    },
                    None => break,
                },
                _ = wait_until(deadline) => {
                    oldest = None;
                    this.dispatch(&mut buffer, &permits, &mut in_flight).await;
                },
                Some(res) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = res {
                        error!("bulk flush task failed: {}", e);
                    }
                },
            }
        }

        this.dispatch(&mut buffer, &permits, &mut in_flight).await;
        drain(&mut in_flight).await;
        info!(index = %this.index, "bulk indexer stopped");
    }

    /// Hand the buffered documents to a worker
    ///
    /// Waits for a free worker slot first.
    async fn dispatch(
        self: &Arc<Self>,
        buffer: &mut Vec<BulkDocument>,
        permits: &Arc<Semaphore>,
        in_flight: &mut JoinSet<()>,
    ) {
        if buffer.is_empty() {
            return;
        }
        let docs = std::mem::take(buffer);

        let permit = match Arc::clone(permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("bulk worker pool closed, dropping {} docs: {}", docs.len(), e);
                self.metrics.record_flush_error(docs.len());
                return;
            },
        };

        let this = Arc::clone(self);
        in_flight.spawn(async move {
            this.send(docs).await;
            drop(permit);
        });
    }

    async fn send(&self, docs: Vec<BulkDocument>) {
        let count = docs.len();
        let start = std::time::Instant::now();

        match self
            .backend
            .bulk(&self.index, &docs, self.config.refresh)
            .await
        {
            Ok(()) => {
                self.metrics.record_flush(count);
                debug!(
                    index = %self.index,
                    docs = count,
                    elapsed = ?start.elapsed(),
                    "bulk request done"
                );
            },
            Err(e) => {
                self.metrics.record_flush_error(count);
                error!(
                    index = %self.index,
                    docs = count,
                    error = %e,
                    "bulk request failed, dropping batch"
                );
            },
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn drain(in_flight: &mut JoinSet<()>) {
    while let Some(res) = in_flight.join_next().await {
        if let Err(e) = res {
            warn!("bulk flush task failed: {}", e);
        }
    }
}
