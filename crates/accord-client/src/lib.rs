//! # accord-client
//!
//! Thin assembly over the core: wires the shard manager, REST pipeline,
//! event dispatcher, and TTL cache into one client handle.

mod client;

pub use client::Client;

// Re-export the surface users touch through the client
pub use accord_cache::MemoryCache;
pub use accord_common::{ClientConfig, ReconnectPolicy, TracingConfig};
pub use accord_core::{AccordError, AccordResult, Intents, Snowflake};
pub use accord_events::{Collector, CollectorConfig, EventDispatcher, SubscribeOptions};
pub use accord_gateway::{GatewayPayload, ShardManager};
pub use accord_rest::RestClient;
