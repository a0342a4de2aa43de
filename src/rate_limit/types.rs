use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identity used for clients whose address cannot be resolved
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Rate limiting algorithm
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    /// Counter reset at fixed window boundaries (simple, allows boundary bursts)
    #[default]
    FixedWindow,
    /// Weighted counter over the current and previous window (smoother)
    SlidingWindow,
}

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum number of requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Maximum number of client identities tracked at once
    #[serde(default = "default_max_tracked_clients")]
    pub max_tracked_clients: usize,
    /// Counting algorithm
    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,
}

fn default_enabled() -> bool {
    true
}

fn default_max_requests() -> u32 {
    100
}

fn default_window_ms() -> u64 {
    60_000 // 1 minute
}

fn default_max_tracked_clients() -> usize {
    10_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            max_tracked_clients: default_max_tracked_clients(),
            algorithm: RateLimitAlgorithm::default(),
        }
    }
}

impl RateLimitConfig {
    /// Shorthand for a fixed-window limit
    pub fn fixed_window(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
            ..Default::default()
        }
    }

    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Outcome of a single admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Total limit per window
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Seconds until the window resets (set on denial)
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    /// Create an allowed decision
    pub fn allowed(limit: u32, remaining: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            retry_after_secs: None,
        }
    }

    /// Create a denied decision
    pub fn denied(limit: u32, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// Whole seconds until `deadline`, rounded up
pub(crate) fn secs_until(now: u64, deadline: u64) -> u64 {
    deadline.saturating_sub(now).div_ceil(1000)
}
