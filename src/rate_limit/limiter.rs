use super::types::{
    secs_until, RateLimitAlgorithm, RateLimitConfig, RateLimitDecision, UNKNOWN_CLIENT,
};
use crate::clock::SharedClock;
use crate::metrics::{
    record_rate_limit_admitted, record_rate_limit_exceeded, record_tracked_clients,
};
use crate::store::KeyedStore;
use tracing::{debug, warn};

/// Per-client counter state
#[derive(Debug, Clone, Copy)]
pub(crate) struct RateWindow {
    /// Requests charged to the current window
    count: u32,
    /// Last millisecond (inclusive) of the current window
    reset_at: u64,
    /// Requests charged to the window before this one (sliding window only)
    previous_count: u32,
}

impl RateWindow {
    fn starting_at(now: u64, window_ms: u64) -> Self {
        Self {
            count: 0,
            reset_at: now.saturating_add(window_ms),
            previous_count: 0,
        }
    }
}

/// In-memory per-client rate limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: KeyedStore<RateWindow>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimitConfig, clock: SharedClock) -> Self {
        let windows =
            KeyedStore::with_capacity("rate_limit", clock, config.max_tracked_clients);
        Self { config, windows }
    }

    /// Charge one request to `client_key` and decide whether it may proceed.
    ///
    /// The attempt is counted even when it is rejected. An empty key is
    /// folded into the shared [`UNKNOWN_CLIENT`] bucket.
    pub fn admit(&self, client_key: &str) -> RateLimitDecision {
        let client_key = if client_key.is_empty() {
            UNKNOWN_CLIENT
        } else {
            client_key
        };

        let decision = match self.config.algorithm {
            RateLimitAlgorithm::FixedWindow => self.admit_fixed_window(client_key),
            RateLimitAlgorithm::SlidingWindow => self.admit_sliding_window(client_key),
        };

        if decision.allowed {
            debug!(
                client = %client_key,
                remaining = decision.remaining,
                "Rate limit check passed"
            );
            record_rate_limit_admitted();
        } else {
            warn!(
                client = %client_key,
                retry_after_secs = ?decision.retry_after_secs,
                "Rate limit exceeded"
            );
            record_rate_limit_exceeded();
        }
        record_tracked_clients(self.windows.len());

        decision
    }

    fn admit_fixed_window(&self, client_key: &str) -> RateLimitDecision {
        let limit = self.config.max_requests;
        let window_ms = self.config.window_ms;

        self.windows.upsert_with(client_key, |current, now| {
            let mut window = current.unwrap_or_else(|| RateWindow::starting_at(now, window_ms));
            window.count = window.count.saturating_add(1);

            let decision = if window.count <= limit {
                RateLimitDecision::allowed(limit, limit - window.count)
            } else {
                RateLimitDecision::denied(limit, secs_until(now, window.reset_at))
            };

            // The window end is inclusive, so the entry expires one millisecond later
            (window, Some(window.reset_at.saturating_add(1)), decision)
        })
    }

    fn admit_sliding_window(&self, client_key: &str) -> RateLimitDecision {
        let limit = self.config.max_requests;
        let window_ms = self.config.window_ms.max(1);

        self.windows.upsert_with(client_key, |current, now| {
            let mut window = current.unwrap_or_else(|| RateWindow::starting_at(now, window_ms));

            if now > window.reset_at {
                let elapsed_windows = (now - window.reset_at).div_ceil(window_ms);
                window.previous_count = if elapsed_windows == 1 { window.count } else { 0 };
                window.count = 0;
                window.reset_at = window
                    .reset_at
                    .saturating_add(elapsed_windows.saturating_mul(window_ms));
            }
            window.count = window.count.saturating_add(1);

            // Share of the previous window still covered by the sliding window
            let overlap_ms = window.reset_at.saturating_sub(now).min(window_ms);
            let carried = (u128::from(window.previous_count) * u128::from(overlap_ms)
                / u128::from(window_ms)) as u32;
            let estimate = window.count.saturating_add(carried);

            let decision = if estimate <= limit {
                RateLimitDecision::allowed(limit, limit - estimate)
            } else {
                RateLimitDecision::denied(limit, secs_until(now, window.reset_at).max(1))
            };

            // Counts stay relevant for one more window as the previous window
            let deadline = window.reset_at.saturating_add(window_ms).saturating_add(1);
            (window, Some(deadline), decision)
        })
    }

    /// Get the limiter configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of tracked client identities (for testing/monitoring)
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Forget every client window
    pub fn reset(&self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn limiter(max_requests: u32, window_ms: u64) -> (RateLimiter, std::sync::Arc<ManualClock>) {
        let clock = ManualClock::new(1_000);
        let limiter = RateLimiter::new(
            RateLimitConfig::fixed_window(max_requests, window_ms),
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_three_requests_against_limit_of_two() {
        let (limiter, _clock) = limiter(2, 60_000);

        let decisions: Vec<_> = (0..3).map(|_| limiter.admit("ip-A")).collect();

        let allowed: Vec<_> = decisions.iter().map(|d| d.allowed).collect();
        let remaining: Vec<_> = decisions.iter().map(|d| d.remaining).collect();
        assert_eq!(allowed, vec![true, true, false]);
        assert_eq!(remaining, vec![1, 0, 0]);

        let retry_after = decisions[2].retry_after_secs.unwrap();
        assert!(retry_after <= 60);
        assert!(retry_after > 0);
        assert_eq!(decisions[2].limit, 2);
    }

    #[test]
    fn test_remaining_strictly_decreases_within_window() {
        let (limiter, clock) = limiter(10, 1_000);

        let mut last_remaining = u32::MAX;
        for _ in 0..10 {
            let decision = limiter.admit("client");
            assert!(decision.allowed);
            assert!(decision.remaining < last_remaining);
            last_remaining = decision.remaining;
            clock.advance(Duration::from_millis(10));
        }

        assert!(!limiter.admit("client").allowed);
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let (limiter, clock) = limiter(2, 60_000);

        limiter.admit("ip-B");
        limiter.admit("ip-B");
        assert!(!limiter.admit("ip-B").allowed);

        // Window end is inclusive
        clock.advance(Duration::from_millis(60_000));
        assert!(!limiter.admit("ip-B").allowed);

        clock.advance(Duration::from_millis(1));
        let decision = limiter.admit("ip-B");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn test_rejected_attempts_are_charged() {
        let (limiter, clock) = limiter(1, 1_000);

        assert!(limiter.admit("c").allowed);
        clock.advance(Duration::from_millis(400));
        let denied = limiter.admit("c");
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, Some(1));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let (limiter, clock) = limiter(1, 60_000);

        limiter.admit("c");
        clock.advance(Duration::from_millis(30_500));
        let denied = limiter.admit("c");
        assert_eq!(denied.retry_after_secs, Some(30));

        clock.advance(Duration::from_millis(29_001));
        let denied = limiter.admit("c");
        assert_eq!(denied.retry_after_secs, Some(1));
    }

    #[test]
    fn test_clients_are_isolated() {
        let (limiter, _clock) = limiter(1, 60_000);

        assert!(limiter.admit("192.168.1.1").allowed);
        assert!(!limiter.admit("192.168.1.1").allowed);
        assert!(limiter.admit("192.168.1.2").allowed);

        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_empty_key_uses_shared_bucket() {
        let (limiter, _clock) = limiter(1, 60_000);

        assert!(limiter.admit("").allowed);
        assert!(!limiter.admit(UNKNOWN_CLIENT).allowed);
    }

    #[test]
    fn test_fixed_window_boundary_burst_is_accepted() {
        let (limiter, clock) = limiter(3, 1_000);

        for _ in 0..3 {
            assert!(limiter.admit("burst").allowed);
        }
        clock.advance(Duration::from_millis(1_001));
        for _ in 0..3 {
            assert!(limiter.admit("burst").allowed);
        }
    }

    #[test]
    fn test_tracked_clients_are_capped() {
        let clock = ManualClock::new(0);
        let config = RateLimitConfig {
            max_tracked_clients: 3,
            ..RateLimitConfig::fixed_window(10, 60_000)
        };
        let limiter = RateLimiter::new(config, clock.clone());

        for i in 0..10 {
            limiter.admit(&format!("10.0.0.{}", i));
            clock.advance(Duration::from_millis(1));
        }

        assert!(limiter.tracked_clients() <= 3);
    }

    #[test]
    fn test_sliding_window_smooths_boundary_burst() {
        let clock = ManualClock::new(0);
        let config = RateLimitConfig {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            ..RateLimitConfig::fixed_window(4, 1_000)
        };
        let limiter = RateLimiter::new(config, clock.clone());

        for _ in 0..4 {
            assert!(limiter.admit("s").allowed);
        }
        assert!(!limiter.admit("s").allowed);

        // Just into the next window most of the previous count still applies
        clock.advance(Duration::from_millis(1_100));
        assert!(!limiter.admit("s").allowed);

        // Two full windows later the history is gone
        clock.advance(Duration::from_millis(2_000));
        let decision = limiter.admit("s");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 3);
    }

    #[test]
    fn test_reset_clears_windows() {
        let (limiter, _clock) = limiter(1, 60_000);

        limiter.admit("c");
        assert!(!limiter.admit("c").allowed);

        limiter.reset();
        assert_eq!(limiter.tracked_clients(), 0);
        assert!(limiter.admit("c").allowed);
    }

    #[test]
    fn test_huge_window_saturates_instead_of_overflowing() {
        for algorithm in [RateLimitAlgorithm::FixedWindow, RateLimitAlgorithm::SlidingWindow] {
            let clock = ManualClock::new(5);
            let config = RateLimitConfig {
                algorithm,
                ..RateLimitConfig::fixed_window(1, u64::MAX)
            };
            let limiter = RateLimiter::new(config, clock.clone());

            assert!(limiter.admit("a").allowed);

            // The window never closes, so the client stays limited
            clock.advance(Duration::from_secs(365 * 24 * 60 * 60));
            let denied = limiter.admit("a");
            assert!(!denied.allowed);
            assert!(denied.retry_after_secs.unwrap() > 0);
            assert_eq!(limiter.tracked_clients(), 1);
        }
    }
}
