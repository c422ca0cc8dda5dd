//! Shard manager configuration

use accord_common::{ClientConfig, ReconnectPolicy};
use accord_core::{validate, AccordResult, Intents};
use std::time::Duration;

/// Configuration for the shard manager
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Bot token
    pub token: String,
    /// Intents sent with every IDENTIFY
    pub intents: Intents,
    /// Fixed shard count; None defers to /gateway/bot when auto-sharding
    pub shard_count: Option<u16>,
    /// Use the recommended shard count from /gateway/bot
    pub auto_shard: bool,
    /// Enable zlib-stream compression on every connection
    pub compress: bool,
    /// Minimum delay between identify batches
    pub identify_delay: Duration,
    /// Gateway URL override; skips the /gateway/bot lookup
    pub gateway_url: Option<String>,
    /// Reconnection policy applied to every shard
    pub reconnect: ReconnectPolicy,
}

impl ShardConfig {
    /// Build from a client configuration
    ///
    /// # Errors
    /// Returns a validation error for an empty token or an explicit shard
    /// count of zero.
    pub fn from_client_config(config: &ClientConfig) -> AccordResult<Self> {
        validate::token(&config.token)?;
        if let Some(count) = config.shard_count {
            validate::shard_count(count)?;
        }

        Ok(Self {
            token: config.token.clone(),
            intents: config.intents,
            shard_count: config.shard_count,
            auto_shard: config.auto_shard,
            compress: config.compress,
            identify_delay: config.identify_delay,
            gateway_url: config.gateway_url.clone(),
            reconnect: config.reconnect.clone(),
        })
    }
}
