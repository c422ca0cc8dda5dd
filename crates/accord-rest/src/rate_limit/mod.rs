//! Rate limiting for the REST pipeline
//!
//! Global and per-bucket quotas driven by response headers, plus optional
//! client-side sliding-window policies. All deadlines use the monotonic
//! clock.

mod headers;
mod limiter;

pub use headers::RateLimitUpdate;
pub use limiter::RateLimiter;
