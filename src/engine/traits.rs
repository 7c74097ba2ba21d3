//! Trait seams to the collaborators of the ingestion path
//!
//! The series storage engine, the definition cache and usage accounting live
//! outside this crate. The dispatch stage only talks to them through these
//! traits.

use async_trait::async_trait;
use std::sync::Arc;

use crate::types::MetricData;

// =============================================================================
// Series storage
// =============================================================================

/// Handle to one in-memory series of the storage engine
pub trait SeriesHandle: Send + Sync {
    /// Append a sample
    ///
    /// Appending the same `(ts, value)` twice must be harmless: redelivered
    /// messages replay their points.
    fn add(&self, ts: u32, value: f64);
}

/// The series storage engine
pub trait SeriesStore: Send + Sync + 'static {
    /// Get the series for `id`, creating it on first use
    fn get_or_create(&self, id: &str) -> Arc<dyn SeriesHandle>;
}

// =============================================================================
// Definition sink
// =============================================================================

/// Receiver of series metadata for every accepted point
///
/// Implementations decide whether the definition needs (re)indexing. They
/// never fail the caller: indexing problems are logged and counted.
#[async_trait]
pub trait DefinitionSink: Send + Sync + 'static {
    /// Offer the metadata carried by `metric`
    async fn add(&self, metric: &MetricData);
}

// =============================================================================
// Usage accounting
// =============================================================================

/// Per-organisation usage accounting
pub trait UsageTracker: Send + Sync + 'static {
    /// Record one observation of series `id` for `org_id`
    fn add(&self, org_id: i32, id: &str);
}
