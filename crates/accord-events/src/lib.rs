//! # accord-events
//!
//! Priority-ordered, filtered event subscription with one-shot and collector
//! semantics, and a middleware chain executed before handler dispatch.

pub mod collector;
pub mod dispatcher;
pub mod filters;
pub mod middleware;

pub use collector::{Collector, CollectorConfig};
pub use dispatcher::{DispatcherStats, EventCallback, EventDispatcher, SubscribeOptions};
pub use filters::EventFilter;
pub use middleware::{Middleware, Verdict};
