//! Consolidation of raw points into coarser points
//!
//! A consolidator reduces a group of consecutive points to a single point.
//! The aggregation function is resolved once per call to [`consolidate`],
//! not per group.
//!
//! # Boundary policy
//!
//! When the number of input points is not a multiple of the group size, the
//! trailing points form a shorter final group. That group is aggregated over
//! the points it has (e.g. average of the remaining points) and emitted with
//! the timestamp a complete group would have had, so the output stays evenly
//! spaced.
//!
//! # NaN handling
//!
//! NaN marks a missing sample. All aggregates skip NaN values; a group made
//! only of NaN values aggregates to NaN.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::Point;

/// Aggregation used to collapse several raw points into one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consolidator {
    /// Arithmetic mean
    #[default]
    #[serde(alias = "average")]
    Avg,
    /// Sum of values
    Sum,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Last value of the group
    Last,
}

/// Aggregation function over a group of points
pub type AggFn = fn(&[Point]) -> f64;

impl Consolidator {
    /// Resolve the aggregation function for this consolidator
    pub fn agg_fn(self) -> AggFn {
        match self {
            Consolidator::Avg => avg,
            Consolidator::Sum => sum,
            Consolidator::Min => min,
            Consolidator::Max => max,
            Consolidator::Last => last,
        }
    }

    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Consolidator::Avg => "avg",
            Consolidator::Sum => "sum",
            Consolidator::Min => "min",
            Consolidator::Max => "max",
            Consolidator::Last => "last",
        }
    }
}

impl fmt::Display for Consolidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Consolidator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "avg" | "average" => Ok(Consolidator::Avg),
            "sum" => Ok(Consolidator::Sum),
            "min" => Ok(Consolidator::Min),
            "max" => Ok(Consolidator::Max),
            "last" => Ok(Consolidator::Last),
            other => Err(format!("unknown consolidator {:?}", other)),
        }
    }
}

fn values(points: &[Point]) -> impl Iterator<Item = f64> + '_ {
    points.iter().map(|p| p.val).filter(|v| !v.is_nan())
}

fn avg(points: &[Point]) -> f64 {
    let (total, count) = values(points).fold((0.0, 0u32), |(t, c), v| (t + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        total / count as f64
    }
}

fn sum(points: &[Point]) -> f64 {
    values(points).fold(f64::NAN, |acc, v| if acc.is_nan() { v } else { acc + v })
}

fn min(points: &[Point]) -> f64 {
    values(points).fold(f64::NAN, |acc, v| if acc.is_nan() || v < acc { v } else { acc })
}

fn max(points: &[Point]) -> f64 {
    values(points).fold(f64::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
}

fn last(points: &[Point]) -> f64 {
    values(points).last().unwrap_or(f64::NAN)
}

/// Consolidate every `agg_num` consecutive points into one
///
/// Each output point carries the aggregate of its group and the timestamp
/// of the group's last point. See the module docs for the trailing-group
/// policy. Returns a new vector; `points` is never modified.
pub fn consolidate(points: &[Point], agg_num: u32, consolidator: Consolidator) -> Vec<Point> {
    let num = agg_num as usize;
    if num <= 1 || points.is_empty() {
        return points.to_vec();
    }

    let agg = consolidator.agg_fn();
    let clean_len = points.len() - points.len() % num;
    let mut out = Vec::with_capacity(points.len().div_ceil(num));

    for group in points[..clean_len].chunks_exact(num) {
        out.push(Point::new(group[group.len() - 1].ts, agg(group)));
    }

    if clean_len < points.len() {
        let rest = &points[clean_len..];
        let ts = if points.len() == 1 {
            points[0].ts
        } else {
            let step = points[points.len() - 1]
                .ts
                .saturating_sub(points[points.len() - 2].ts);
            rest[0].ts + (agg_num - 1) * step
        };
        out.push(Point::new(ts, agg(rest)));
    }

    out
}
