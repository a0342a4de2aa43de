//! Rate limiting module
//!
//! Per-client request limits held in process memory. Each client identity
//! (the connection's IP address, or a shared `"unknown"` bucket when it cannot
//! be resolved) gets a window of `max_requests` requests per `window_ms`:
//!
//! - **Fixed Window**: counter resets once the window has passed (default)
//! - **Sliding Window**: weighted count over the current and previous window
//!
//! Every attempt is charged, including rejected ones. Responses carry
//! `X-RateLimit-Limit` / `X-RateLimit-Remaining`, and rejections are answered
//! with `429 Too Many Requests`.
//!
//! # Example
//!
//! ```rust
//! use ledger_api::clock::SystemClock;
//! use ledger_api::rate_limit::{RateLimitConfig, RateLimiter};
//!
//! let limiter = RateLimiter::new(RateLimitConfig::fixed_window(2, 60_000), SystemClock::shared());
//!
//! assert!(limiter.admit("10.0.0.1").allowed);
//! assert!(limiter.admit("10.0.0.1").allowed);
//! assert!(!limiter.admit("10.0.0.1").allowed);
//! ```

pub mod limiter;
pub mod middleware;
pub mod types;

// Re-export commonly used types
pub use limiter::RateLimiter;
pub use middleware::{add_rate_limit_headers, rate_limit_exceeded_response, rate_limit_middleware};
pub use types::{RateLimitAlgorithm, RateLimitConfig, RateLimitDecision, UNKNOWN_CLIENT};
