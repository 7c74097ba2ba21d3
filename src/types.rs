//! Core data types used throughout the ingestion path
//!
//! # Key Types
//!
//! - **`MetricData`**: A single ingested sample plus the metadata of its series
//! - **`MetricDefinition`**: The durable, indexed description of a series
//! - **`Point`**: A (timestamp, value) pair
//! - **`Series`**: A named, fixed-interval sequence of points used by the normalizer
//!
//! # Example
//!
//! ```rust
//! use metric_ingest::types::{MetricData, MetricDefinition};
//!
//! let data = MetricData {
//!     id: "1.abc".to_string(),
//!     org_id: 1,
//!     name: "servers.web1.cpu".to_string(),
//!     interval: 10,
//!     time: 1_700_000_000,
//!     value: 42.5,
//!     ..Default::default()
//! };
//!
//! let def = MetricDefinition::from(&data);
//! assert_eq!(def.node_count, 3);
//! assert!(def.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::query::consolidation::Consolidator;

/// A single metric sample as it arrives on the wire
///
/// Metadata fields are optional on the wire and default to empty values,
/// but a definition can only be indexed once they are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricData {
    /// Series id, unique per organisation and metric
    pub id: String,
    /// Tenant identifier
    pub org_id: i32,
    /// Metric name (dotted path)
    pub name: String,
    /// Metric key
    pub metric: String,
    /// Seconds between expected samples
    pub interval: i32,
    /// Unit of the value
    pub unit: String,
    /// Unix timestamp in seconds (0 means unknown)
    pub time: i64,
    /// Sample value
    pub value: f64,
    /// Target type (gauge, counter, ...)
    pub target_type: String,
    /// Tags in `key:value` form
    pub tags: Vec<String>,
}

/// Durable description of a series, stored as one search engine document per `id`
///
/// Field names match the index mapping: snake case except `lastUpdate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Series id (document id)
    pub id: String,
    /// Tenant identifier
    pub org_id: i32,
    /// Metric name (dotted path)
    pub name: String,
    /// Metric key
    #[serde(default)]
    pub metric: String,
    /// Seconds between expected samples
    pub interval: i32,
    /// Unit of the value
    #[serde(default)]
    pub unit: String,
    /// Target type (gauge, counter, ...)
    #[serde(default)]
    pub target_type: String,
    /// Tags in `key:value` form
    #[serde(default)]
    pub tags: Vec<String>,
    /// Unix timestamp of the most recent observation
    #[serde(rename = "lastUpdate", default)]
    pub last_update: i64,
    /// Number of nodes in the dotted name
    #[serde(default)]
    pub node_count: i32,
}

impl MetricDefinition {
    /// Check the definition is complete enough to be indexed
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("id cannot be empty".to_string());
        }
        if self.name.is_empty() {
            return Err(format!("{}: name cannot be empty", self.id));
        }
        if self.org_id == 0 {
            return Err(format!("{}: org_id cannot be 0", self.id));
        }
        if self.interval <= 0 {
            return Err(format!(
                "{}: interval must be > 0, got {}",
                self.id, self.interval
            ));
        }
        Ok(())
    }

    /// Decode a definition from a stored JSON document
    pub fn from_json(source: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(source)
    }
}

impl From<&MetricData> for MetricDefinition {
    fn from(m: &MetricData) -> Self {
        Self {
            id: m.id.clone(),
            org_id: m.org_id,
            name: m.name.clone(),
            metric: m.metric.clone(),
            interval: m.interval,
            unit: m.unit.clone(),
            target_type: m.target_type.clone(),
            tags: m.tags.clone(),
            last_update: m.time,
            node_count: m.name.split('.').count() as i32,
        }
    }
}

/// A single timestamped value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Unix timestamp in seconds
    pub ts: u32,
    /// Value (may be NaN for a missing sample)
    pub val: f64,
}

impl Point {
    /// Create a new point
    pub fn new(ts: u32, val: f64) -> Self {
        Self { ts, val }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.ts, self.val)
    }
}

/// A fixed-interval series as handed to the normalizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Series name
    pub target: String,
    /// Seconds between points
    pub interval: u32,
    /// Points in increasing timestamp order, spaced by `interval`
    pub datapoints: Vec<Point>,
    /// How several raw points collapse into one
    pub consolidator: Consolidator,
}

impl Series {
    /// Create a new series
    pub fn new(
        target: impl Into<String>,
        interval: u32,
        datapoints: Vec<Point>,
        consolidator: Consolidator,
    ) -> Self {
        Self {
            target: target.into(),
            interval,
            datapoints,
            consolidator,
        }
    }
}
