//! In-memory implementations of the collaborator traits
//!
//! These implementations are intended for:
//! - **Unit and integration testing** without a real storage engine
//! - **Development** of the ingestion binary without external services
//!
//! # Warning
//!
//! [`MemorySeriesStore`] keeps every point in memory forever and is not a
//! storage engine. It exists so the pipeline can be exercised end to end.
//!
//! # Example
//!
//! ```rust
//! use metric_ingest::engine::stubs::MemorySeriesStore;
//! use metric_ingest::engine::traits::SeriesStore;
//!
//! let store = MemorySeriesStore::new();
//! store.get_or_create("1.abc").add(60, 1.0);
//! store.get_or_create("1.abc").add(60, 1.0);
//!
//! assert_eq!(store.points("1.abc").unwrap().len(), 1);
//! ```

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::traits::{SeriesHandle, SeriesStore, UsageTracker};
use crate::types::Point;

// =============================================================================
// MemorySeries
// =============================================================================

/// A series held in memory, keyed by timestamp
///
/// Adding a point for an existing timestamp overwrites it, which makes
/// replayed points idempotent.
#[derive(Default)]
pub struct MemorySeries {
    points: RwLock<BTreeMap<u32, f64>>,
    adds: AtomicU64,
}

impl MemorySeries {
    /// Points in timestamp order
    pub fn points(&self) -> Vec<Point> {
        self.points
            .read()
            .iter()
            .map(|(ts, val)| Point::new(*ts, *val))
            .collect()
    }

    /// Number of `add` calls received, including overwrites
    pub fn adds(&self) -> u64 {
        self.adds.load(Ordering::Relaxed)
    }
}

impl SeriesHandle for MemorySeries {
    fn add(&self, ts: u32, value: f64) {
        self.points.write().insert(ts, value);
        self.adds.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// MemorySeriesStore
// =============================================================================

/// In-memory series store
#[derive(Default)]
pub struct MemorySeriesStore {
    series: DashMap<String, Arc<MemorySeries>>,
}

impl MemorySeriesStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Points of series `id`, if it exists
    pub fn points(&self, id: &str) -> Option<Vec<Point>> {
        self.series.get(id).map(|s| s.points())
    }

    /// The series `id`, if it exists
    pub fn series(&self, id: &str) -> Option<Arc<MemorySeries>> {
        self.series.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Number of series
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Whether the store holds no series
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl SeriesStore for MemorySeriesStore {
    fn get_or_create(&self, id: &str) -> Arc<dyn SeriesHandle> {
        if let Some(series) = self.series.get(id) {
            return Arc::clone(series.value()) as Arc<dyn SeriesHandle>;
        }
        let series = self
            .series
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(MemorySeries::default()));
        Arc::clone(series.value()) as Arc<dyn SeriesHandle>
    }
}

// =============================================================================
// MemoryUsage
// =============================================================================

/// In-memory usage accounting: observation counts per (org, series)
#[derive(Default)]
pub struct MemoryUsage {
    counts: DashMap<(i32, String), u64>,
}

impl MemoryUsage {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Observations recorded for `(org_id, id)`
    pub fn count(&self, org_id: i32, id: &str) -> u64 {
        self.counts
            .get(&(org_id, id.to_string()))
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// Number of distinct series seen for `org_id`
    pub fn series_for_org(&self, org_id: i32) -> usize {
        self.counts.iter().filter(|e| e.key().0 == org_id).count()
    }
}

impl UsageTracker for MemoryUsage {
    fn add(&self, org_id: i32, id: &str) {
        *self.counts.entry((org_id, id.to_string())).or_insert(0) += 1;
    }
}
