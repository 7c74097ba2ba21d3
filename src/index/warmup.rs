//! Warmup load shedding for definition writes
//!
//! For a fixed window after startup only a percentage of definition writes
//! reach the search engine. A restart otherwise re-offers every live series
//! at once and can saturate a cold or recovering index. Skipped definitions
//! are offered again by the next point of the same series.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

/// Default warmup window
pub const DEFAULT_WARMUP_WINDOW: Duration = Duration::from_secs(1800);

/// Admission gate applied to every valid definition write
pub struct WarmupGate {
    started: Instant,
    window: Duration,
    percent: u32,
    rng: Mutex<StdRng>,
}

impl WarmupGate {
    /// Start a warmup window now
    ///
    /// # Arguments
    ///
    /// * `window` - How long writes are sampled
    /// * `percent` - Share of writes admitted during the window (clamped to 100)
    pub fn new(window: Duration, percent: u32) -> Self {
        Self::with_rng(window, percent, StdRng::from_os_rng())
    }

    /// Start a warmup window with a given random source
    pub fn with_rng(window: Duration, percent: u32, rng: StdRng) -> Self {
        Self {
            started: Instant::now(),
            window,
            percent: percent.min(100),
            rng: Mutex::new(rng),
        }
    }

    /// Whether the warmup window is still open
    pub fn in_warmup(&self) -> bool {
        self.started.elapsed() < self.window
    }

    /// Decide whether one write goes through
    ///
    /// Inside the window each call is admitted independently with
    /// probability `percent / 100`. After it every call is admitted.
    pub fn admit(&self) -> bool {
        if !self.in_warmup() {
            return true;
        }
        self.rng.lock().random_range(0..100) < self.percent
    }

    /// Configured admission percentage
    pub fn percent(&self) -> u32 {
        self.percent
    }

    /// Time left in the window
    pub fn remaining(&self) -> Duration {
        self.window.saturating_sub(self.started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admitted(gate: &WarmupGate, trials: usize) -> usize {
        (0..trials).filter(|_| gate.admit()).count()
    }

    #[test]
    fn test_admission_rate_converges_to_percent() {
        let gate = WarmupGate::with_rng(Duration::from_secs(3600), 1, StdRng::seed_from_u64(7));
        let n = admitted(&gate, 100_000);
        // expected 1000, generous bounds for a seeded run
        assert!((700..1300).contains(&n), "admitted {}", n);
    }

    #[test]
    fn test_admission_rate_at_fifty_percent() {
        let gate = WarmupGate::with_rng(Duration::from_secs(3600), 50, StdRng::seed_from_u64(11));
        let n = admitted(&gate, 20_000);
        assert!((9_000..11_000).contains(&n), "admitted {}", n);
    }

    #[test]
    fn test_everything_admitted_after_window() {
        let gate = WarmupGate::with_rng(Duration::ZERO, 1, StdRng::seed_from_u64(1));
        assert!(!gate.in_warmup());
        assert_eq!(admitted(&gate, 1_000), 1_000);
        assert_eq!(gate.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_zero_and_full_percent() {
        let none = WarmupGate::new(Duration::from_secs(3600), 0);
        assert_eq!(admitted(&none, 1_000), 0);

        let all = WarmupGate::new(Duration::from_secs(3600), 250);
        assert_eq!(all.percent(), 100);
        assert_eq!(admitted(&all, 1_000), 1_000);
    }
}
