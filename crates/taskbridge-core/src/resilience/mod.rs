//! Resilience primitives shared by adapters and outbound service clients.
//!
//! Every outbound client composes these in a fixed order on each call:
//! retry → circuit breaker → rate limiter → underlying HTTP. Cache lookups
//! short-circuit the entire chain when they hit.

pub mod cache;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use cache::TtlCache;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState};
pub use rate_limiter::RateLimiter;
pub use retry::{backoff_delay, retry_with_backoff};
