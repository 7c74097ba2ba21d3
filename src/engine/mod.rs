//! Collaborator seams of the ingestion path
//!
//! - [`traits`]: the contracts the dispatch stage writes through
//! - [`stubs`]: in-memory implementations for tests and local runs

pub mod stubs;
pub mod traits;

pub use stubs::{MemorySeries, MemorySeriesStore, MemoryUsage};
pub use traits::{DefinitionSink, SeriesHandle, SeriesStore, UsageTracker};
