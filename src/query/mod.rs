//! Query-time helpers for series read back from storage
//!
//! - **Consolidation**: reduce groups of raw points with avg/sum/min/max/last
//! - **Normalization**: bring series of different resolutions to a common
//!   LCM interval before cross-series arithmetic

pub mod consolidation;
pub mod normalize;

pub use consolidation::{consolidate, Consolidator};
pub use normalize::{gcd, lcm, normalize};
