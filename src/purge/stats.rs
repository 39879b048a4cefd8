//! Run statistics and the progress/ETA estimator.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::constants::SEARCH_PAGE_SIZE;

/// Observability counters for one engine instance.
///
/// Unlike [`super::RunState`], stats accumulate across a whole
/// multi-container batch and are never reset between targets.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub started_at: DateTime<Utc>,
    pub throttled_count: u64,
    pub throttled_total: Duration,
    pub last_ping: Option<Duration>,
    pub avg_ping: Option<Duration>,
    pub eta: Duration,
}

impl Default for RunStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            throttled_count: 0,
            throttled_total: Duration::ZERO,
            last_ping: None,
            avg_ping: None,
            eta: Duration::ZERO,
        }
    }
}

impl RunStats {
    /// Record one request round-trip time.
    ///
    /// The average is an exponential moving average, 0.9 on the old value and
    /// 0.1 on the new sample, seeded with the first observation.
    pub fn record_ping(&mut self, sample: Duration) {
        self.last_ping = Some(sample);
        let sample_ms = sample.as_millis() as f64;
        let avg_ms = self.avg_ping.map_or(sample_ms, |avg| {
            avg.as_millis() as f64 * 0.9 + sample_ms * 0.1
        });
        self.avg_ping = Some(Duration::from_millis(avg_ms as u64));
    }

    /// Account one throttling event of the given wait.
    pub fn record_throttle(&mut self, wait: Duration) {
        self.throttled_count += 1;
        self.throttled_total = self.throttled_total.saturating_add(wait);
    }

    /// Recompute the estimated time remaining.
    ///
    /// Models one search page per ~25 results plus a delete-and-latency cost
    /// per message. `grand_total` is the server's (fluctuating) estimate, so
    /// the result is a heuristic; it is always finite and non-negative.
    pub fn update_eta(&mut self, grand_total: u64, search_delay: Duration, delete_delay: Duration) {
        let pages = (grand_total as f64 / SEARCH_PAGE_SIZE as f64).round();
        let per_message =
            delete_delay.as_millis() as f64 + self.avg_ping.unwrap_or_default().as_millis() as f64;
        let eta_ms = search_delay.as_millis() as f64 * pages + per_message * grand_total as f64;
        self.eta = if eta_ms.is_finite() && eta_ms > 0.0 {
            Duration::from_millis(eta_ms.min(u64::MAX as f64) as u64)
        } else {
            Duration::ZERO
        };
    }
}

/// Format a duration as `1h 2m 3s`.
#[must_use]
pub fn format_hms(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{}h {}m {}s", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_seeds_average_with_first_sample() {
        let mut stats = RunStats::default();
        stats.record_ping(Duration::from_millis(100));
        assert_eq!(stats.avg_ping, Some(Duration::from_millis(100)));
        assert_eq!(stats.last_ping, Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_ping_moving_average() {
        let mut stats = RunStats::default();
        stats.record_ping(Duration::from_millis(100));
        stats.record_ping(Duration::from_millis(200));
        // 100 * 0.9 + 200 * 0.1 = 110
        assert_eq!(stats.avg_ping, Some(Duration::from_millis(110)));
    }

    #[test]
    fn test_eta_formula() {
        let mut stats = RunStats::default();
        stats.record_ping(Duration::from_millis(100));
        stats.update_eta(50, Duration::from_millis(1000), Duration::from_millis(200));
        // pages = round(50/25) = 2; 1000*2 + (200+100)*50 = 17000
        assert_eq!(stats.eta, Duration::from_millis(17_000));
    }

    #[test]
    fn test_eta_never_negative_or_nan() {
        let mut stats = RunStats::default();
        for total in [0, 1, 24, 25, 10_000_000] {
            stats.update_eta(total, Duration::ZERO, Duration::ZERO);
            assert!(stats.eta >= Duration::ZERO);
            stats.update_eta(total, Duration::from_millis(50), Duration::from_millis(50));
            assert!(stats.eta >= Duration::ZERO);
        }
    }

    #[test]
    fn test_eta_tolerates_shrinking_total() {
        let mut stats = RunStats::default();
        stats.update_eta(100, Duration::from_millis(50), Duration::from_millis(50));
        let first = stats.eta;
        stats.update_eta(10, Duration::from_millis(50), Duration::from_millis(50));
        assert!(stats.eta <= first);
    }

    #[test]
    fn test_throttle_accumulates() {
        let mut stats = RunStats::default();
        stats.record_throttle(Duration::from_millis(500));
        stats.record_throttle(Duration::from_millis(700));
        assert_eq!(stats.throttled_count, 2);
        assert_eq!(stats.throttled_total, Duration::from_millis(1200));
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(Duration::from_secs(3723)), "1h 2m 3s");
        assert_eq!(format_hms(Duration::ZERO), "0h 0m 0s");
    }
}
