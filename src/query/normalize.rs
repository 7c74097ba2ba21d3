//! LCM interval normalization
//!
//! Point-wise arithmetic across series (sum, divide, ...) needs every input
//! at the same resolution. [`normalize`] brings a batch of series to the
//! least common multiple of their intervals by consolidating the finer ones.
//!
//! ```rust
//! use metric_ingest::query::{normalize, Consolidator};
//! use metric_ingest::types::{Point, Series};
//!
//! let a = Series::new("a", 10, (1..=6).map(|i| Point::new(i * 10, i as f64)).collect(), Consolidator::Sum);
//! let b = Series::new("b", 15, (1..=4).map(|i| Point::new(i * 15, i as f64 * 10.0)).collect(), Consolidator::Sum);
//!
//! let out = normalize(vec![a, b]);
//! assert!(out.iter().all(|s| s.interval == 30));
//! assert_eq!(out[0].datapoints.iter().map(|p| p.val).collect::<Vec<_>>(), vec![6.0, 15.0]);
//! assert_eq!(out[1].datapoints.iter().map(|p| p.val).collect::<Vec<_>>(), vec![30.0, 70.0]);
//! ```

use tracing::trace;

use super::consolidation::consolidate;
use crate::types::Series;

/// Greatest common divisor
pub fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Least common multiple of all values
///
/// Returns 0 for an empty slice.
///
/// # Panics
///
/// Panics if any value is zero, or if the least common multiple does not
/// fit in a `u32` interval.
pub fn lcm(values: &[u32]) -> u32 {
    let mut iter = values.iter().copied();
    let Some(first) = iter.next() else {
        return 0;
    };
    assert!(first > 0, "interval must be > 0");
    let lcm = iter.fold(u64::from(first), |acc, v| {
        assert!(v > 0, "interval must be > 0");
        let v = u64::from(v);
        let step = acc / gcd64(acc, v);
        match step.checked_mul(v) {
            Some(next) if next <= u64::from(u32::MAX) => next,
            _ => panic!("lcm of intervals {:?} exceeds u32::MAX", values),
        }
    });
    lcm as u32
}

fn gcd64(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Bring every series to the LCM of the batch's intervals
///
/// Series already at the LCM are returned untouched. Every other series is
/// consolidated by `lcm / interval` using its own consolidator, into a fresh
/// point vector. Output order matches input order.
///
/// # Panics
///
/// Panics if a series has a zero interval, or if the batch's least common
/// multiple does not fit in a `u32`. Both are caller bugs, not data
/// conditions.
pub fn normalize(series: Vec<Series>) -> Vec<Series> {
    if series.len() < 2 {
        if let Some(s) = series.first() {
            assert!(s.interval > 0, "interval must be > 0 ({})", s.target);
        }
        return series;
    }

    let intervals: Vec<u32> = series.iter().map(|s| s.interval).collect();
    let lcm = lcm(&intervals);

    series
        .into_iter()
        .map(|mut s| {
            if s.interval != lcm {
                let agg_num = lcm / s.interval;
                trace!(
                    target_name = %s.target,
                    interval = s.interval,
                    lcm,
                    agg_num,
                    "consolidating series"
                );
                s.datapoints = consolidate(&s.datapoints, agg_num, s.consolidator);
                s.interval = lcm;
            }
            s
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::consolidation::Consolidator;
    use crate::types::Point;

    fn series(name: &str, interval: u32, vals: &[f64], c: Consolidator) -> Series {
        let points = vals
            .iter()
            .enumerate()
            .map(|(i, v)| Point::new(interval * (i as u32 + 1), *v))
            .collect();
        Series::new(name, interval, points, c)
    }

    #[test]
    fn test_gcd_lcm() {
        assert_eq!(gcd(10, 15), 5);
        assert_eq!(gcd(7, 0), 7);
        assert_eq!(lcm(&[10, 15]), 30);
        assert_eq!(lcm(&[10, 15, 60]), 60);
        assert_eq!(lcm(&[7]), 7);
        assert_eq!(lcm(&[]), 0);
    }

    #[test]
    fn test_lcm_near_u32_limit() {
        assert_eq!(lcm(&[65_536, 65_535]), 65_536 * 65_535);
        assert_eq!(lcm(&[u32::MAX, 1, u32::MAX]), u32::MAX);
    }

    #[test]
    #[should_panic(expected = "exceeds u32::MAX")]
    fn test_lcm_overflow_panics() {
        lcm(&[65_537, 65_539]);
    }

    #[test]
    #[should_panic(expected = "exceeds u32::MAX")]
    fn test_normalize_rejects_unrepresentable_lcm() {
        let a = series("a", 65_537, &[1.0], Consolidator::Avg);
        let b = series("b", 65_539, &[1.0], Consolidator::Avg);
        normalize(vec![a, b]);
    }

    #[test]
    fn test_mixed_intervals() {
        let a = series("a", 10, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Consolidator::Sum);
        let b = series("b", 15, &[10.0, 20.0, 30.0, 40.0], Consolidator::Sum);

        let out = normalize(vec![a, b]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].target, "a");
        assert_eq!(out[0].interval, 30);
        assert_eq!(
            out[0].datapoints,
            vec![Point::new(30, 6.0), Point::new(60, 15.0)]
        );
        assert_eq!(out[1].interval, 30);
        assert_eq!(
            out[1].datapoints,
            vec![Point::new(30, 30.0), Point::new(60, 70.0)]
        );
    }

    #[test]
    fn test_series_at_lcm_untouched() {
        let a = series("a", 10, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Consolidator::Avg);
        let b = series("b", 30, &[1.0, 2.0], Consolidator::Avg);
        let expected_b = b.clone();

        let out = normalize(vec![a, b]);
        assert_eq!(out[1], expected_b);
        assert_eq!(out[0].datapoints.len(), 2);
    }

    #[test]
    fn test_single_series_noop() {
        let a = series("a", 10, &[1.0, 2.0, 3.0], Consolidator::Max);
        let out = normalize(vec![a.clone()]);
        assert_eq!(out, vec![a]);
    }

    #[test]
    fn test_empty_batch() {
        assert!(normalize(Vec::new()).is_empty());
    }

    #[test]
    fn test_same_interval_batch_noop() {
        let a = series("a", 60, &[1.0, 2.0], Consolidator::Avg);
        let b = series("b", 60, &[3.0], Consolidator::Last);
        let out = normalize(vec![a.clone(), b.clone()]);
        assert_eq!(out, vec![a, b]);
    }

    #[test]
    #[should_panic(expected = "interval must be > 0")]
    fn test_zero_interval_panics() {
        let a = series("a", 10, &[1.0], Consolidator::Avg);
        let b = Series::new("b", 0, Vec::new(), Consolidator::Avg);
        normalize(vec![a, b]);
    }
}
