//! Metric ingest - real-time ingestion path of a time-series metrics platform
//!
//! This library provides:
//! - A Kafka consumer group member with at-least-once delivery
//! - Decoding and dispatch of metric messages into a series store
//! - A searchable definition index over Elasticsearch with warmup load
//!   shedding and bulk-batched writes
//! - LCM interval normalization of series before cross-series math

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod index;
pub mod input;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Series normalization before cross-series math
pub mod query;

// Re-export main types
pub use error::{Error, Result};
pub use index::{Admission, DefCache, DefinitionIndex, IndexConfig};
pub use input::{Consumer, ConsumerState, Input, KafkaConfig, KafkaTransport};
pub use types::{MetricData, MetricDefinition, Point, Series};
