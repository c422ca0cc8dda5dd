//! Client assembly

use accord_cache::MemoryCache;
use accord_common::ClientConfig;
use accord_core::{AccordError, AccordResult, Snowflake};
use accord_events::{EventCallback, EventDispatcher, SubscribeOptions};
use accord_gateway::{GatewayPayload, ShardConfig, ShardEvent, ShardManager};
use accord_rest::{RestClient, RestConfig};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A Discord bot client
///
/// Owns the shard manager, REST pipeline, event dispatcher, and cache.
/// Gateway dispatches are annotated with their shard id and emitted on the
/// dispatcher under their gateway event name.
pub struct Client {
    config: ClientConfig,
    rest: Arc<RestClient>,
    dispatcher: Arc<EventDispatcher>,
    cache: Arc<MemoryCache>,
    shards: Arc<ShardManager>,
    events_rx: Mutex<Option<mpsc::Receiver<ShardEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Assemble a client from configuration
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: ClientConfig) -> AccordResult<Self> {
        let rest = Arc::new(RestClient::new(
            &config.token,
            RestConfig {
                base_url: config.api_url.clone(),
                timeout: config.request_timeout,
            },
        )?);

        let shard_config = ShardConfig::from_client_config(&config)?;
        let (shards, events_rx) = ShardManager::new(shard_config, rest.clone());

        Ok(Self {
            config,
            rest,
            dispatcher: EventDispatcher::new_shared(),
            cache: Arc::new(MemoryCache::new()),
            shards,
            events_rx: Mutex::new(Some(events_rx)),
            pump: Mutex::new(None),
        })
    }

    /// Assemble a client from the environment (`DISCORD_BOT_TOKEN`)
    pub fn from_env() -> AccordResult<Self> {
        let config = ClientConfig::from_env()
            .map_err(|e| AccordError::Validation(e.to_string()))?;
        Self::new(config)
    }

    /// The REST client
    #[must_use]
    pub fn rest(&self) -> &Arc<RestClient> {
        &self.rest
    }

    /// The event dispatcher
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// The TTL cache
    #[must_use]
    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    /// The shard manager
    #[must_use]
    pub fn shards(&self) -> &Arc<ShardManager> {
        &self.shards
    }

    /// Register an event handler; see [`EventDispatcher::on`]
    pub fn on(&self, event: &str, callback: EventCallback) -> String {
        self.dispatcher.on(event, callback)
    }

    /// Register an event handler with options
    pub fn on_with(&self, event: &str, callback: EventCallback, options: SubscribeOptions) -> String {
        self.dispatcher.on_with(event, callback, options)
    }

    /// Remove an event handler
    pub fn off(&self, event: &str, id: &str) -> bool {
        self.dispatcher.off(event, id)
    }

    /// Start the shards and pump gateway events into the dispatcher
    ///
    /// Dispatch payloads that are JSON objects gain a `shard_id` field
    /// before emission.
    pub async fn start(&self) -> AccordResult<()> {
        let Some(mut events_rx) = self.events_rx.lock().take() else {
            return Err(AccordError::Validation("client already started".into()));
        };

        self.shards.start().await?;

        let dispatcher = self.dispatcher.clone();
        let pump = tokio::spawn(async move {
            while let Some(ShardEvent { shard_id, event, data }) = events_rx.recv().await {
                let data = annotate_shard(data, shard_id);
                dispatcher.emit(&event, data);
            }
            tracing::debug!("Event pump stopped");
        });
        *self.pump.lock() = Some(pump);

        tracing::info!(shards = self.shards.shard_count(), "Client started");
        Ok(())
    }

    /// Update the bot's presence on every shard
    pub async fn update_presence(&self, presence: Value) -> usize {
        self.shards
            .broadcast(GatewayPayload::presence_update(presence))
            .await
    }

    /// Join, move, or leave a voice channel in a guild
    ///
    /// Routed to the shard that owns the guild.
    pub async fn update_voice_state(
        &self,
        guild_id: Snowflake,
        channel_id: Option<Snowflake>,
        self_mute: bool,
        self_deaf: bool,
    ) -> AccordResult<()> {
        let payload = GatewayPayload::voice_state_update(serde_json::json!({
            "guild_id": guild_id.to_string(),
            "channel_id": channel_id.map(|id| id.to_string()),
            "self_mute": self_mute,
            "self_deaf": self_deaf,
        }));
        self.shards.send_to_guild(guild_id, payload).await
    }

    /// Request guild member chunks for a guild
    pub async fn request_guild_members(&self, guild_id: Snowflake, query: Value) -> AccordResult<()> {
        let mut data = query;
        if let Value::Object(map) = &mut data {
            map.entry("guild_id".to_string())
                .or_insert_with(|| Value::String(guild_id.to_string()));
        }
        self.shards
            .send_to_guild(guild_id, GatewayPayload::request_guild_members(data))
            .await
    }

    /// Stop everything: shards first, then the REST pipeline, then handlers
    pub async fn shutdown(&self) {
        self.shards.shutdown().await;
        self.rest.shutdown();

        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.dispatcher.clear();

        tracing::info!("Client shut down");
    }

    /// The configuration this client was assembled from
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("shards", &self.shards.shard_count())
            .finish()
    }
}

/// Attach the shard id to object payloads
fn annotate_shard(data: Value, shard_id: u16) -> Value {
    match data {
        Value::Object(mut map) => {
            map.insert("shard_id".to_string(), Value::Number(shard_id.into()));
            Value::Object(map)
        }
        other => other,
    }
}
