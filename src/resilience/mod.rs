//! Resilience primitives for outbound API traffic.
//!
//! Two independent concerns live here:
//! - [`RateLimitGuard`]: advisory self-throttling against the provider's
//!   hourly quota, applied before every outbound request
//! - [`Resilience`]: retry with exponential backoff plus a per-operation
//!   circuit breaker, applied around whole fetch operations

mod rate_limit;
mod retry;

pub use rate_limit::RateLimitGuard;
pub use retry::Resilience;
