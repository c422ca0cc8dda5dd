//! Client configuration
//!
//! Loads configuration from environment variables with typed defaults.

use accord_core::{validate, AccordError, Intents};
use std::env;
use std::time::Duration;

/// Default REST API base URL
pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

/// Default gateway URL used when /gateway/bot is unavailable
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Reconnection policy for gateway connections
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Give up after this many consecutive failed attempts
    pub max_retries: u32,
    /// Base delay for the first attempt
    pub base_delay: Duration,
    /// Ceiling applied after exponential growth
    pub max_delay: Duration,
    /// Whether dropped connections reconnect at all
    pub auto_reconnect: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            auto_reconnect: true,
        }
    }
}

/// Main client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bot token (without the "Bot " prefix)
    pub token: String,
    /// Gateway intents requested at IDENTIFY
    pub intents: Intents,
    /// Fixed shard count; None lets /gateway/bot decide
    pub shard_count: Option<u16>,
    /// Use the recommended shard count from /gateway/bot
    pub auto_shard: bool,
    /// Enable zlib-stream transport compression
    pub compress: bool,
    /// Override for the REST base URL (tests point this at a mock server)
    pub api_url: String,
    /// Override for the gateway URL
    pub gateway_url: Option<String>,
    /// Fixed timeout for each REST transport call
    pub request_timeout: Duration,
    /// Minimum delay between shard identifies
    pub identify_delay: Duration,
    /// Gateway reconnection policy
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    /// Create a configuration with defaults for the given token
    ///
    /// # Errors
    /// Returns a validation error if the token is empty.
    pub fn new(token: impl Into<String>) -> Result<Self, AccordError> {
        let token = token.into();
        validate::token(&token)?;

        Ok(Self {
            token,
            intents: Intents::default(),
            shard_count: None,
            auto_shard: true,
            compress: false,
            api_url: DEFAULT_API_URL.to_string(),
            gateway_url: None,
            request_timeout: Duration::from_secs(30),
            identify_delay: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        })
    }

    /// Load configuration from environment variables
    ///
    /// Reads `DISCORD_BOT_TOKEN` plus optional `ACCORD_*` overrides.
    /// A `.env` file is honored when present.
    ///
    /// # Errors
    /// Returns an error if `DISCORD_BOT_TOKEN` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let token = env::var("DISCORD_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingVar("DISCORD_BOT_TOKEN"))?;

        let mut config = Self::new(token).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if let Ok(raw) = env::var("ACCORD_INTENTS") {
            let bits = raw
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidValue("ACCORD_INTENTS", raw))?;
            config.intents = Intents::from_bits_truncate(bits);
        }

        if let Ok(raw) = env::var("ACCORD_SHARD_COUNT") {
            let count = raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue("ACCORD_SHARD_COUNT", raw))?;
            config.shard_count = Some(count);
            config.auto_shard = false;
        }

        if let Ok(raw) = env::var("ACCORD_COMPRESS") {
            config.compress = matches!(raw.as_str(), "1" | "true" | "yes");
        }

        if let Ok(url) = env::var("ACCORD_API_URL") {
            config.api_url = url;
        }

        if let Ok(url) = env::var("ACCORD_GATEWAY_URL") {
            config.gateway_url = Some(url);
        }

        Ok(config)
    }

    /// Set the gateway intents
    #[must_use]
    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    /// Fix the shard count, disabling auto-sharding
    #[must_use]
    pub fn with_shard_count(mut self, count: u16) -> Self {
        self.shard_count = Some(count);
        self.auto_shard = false;
        self
    }

    /// Enable or disable transport compression
    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    /// Override the reconnection policy
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Authorization header value for REST requests
    #[must_use]
    pub fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
