//! # accord-rest
//!
//! HTTP request pipeline for the Discord REST API: a single connection
//! worker serializes submissions, applies global and per-bucket rate limits
//! reported by response headers, and surfaces typed failures.

pub mod client;
pub mod pipeline;
pub mod rate_limit;
pub mod route;

pub use client::{GatewayBotInfo, RestClient, RestConfig, SessionStartLimit};
pub use rate_limit::{RateLimitUpdate, RateLimiter};
pub use route::Route;
