//! Payload structures for the handshake opcodes

use accord_core::Intents;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client properties sent with IDENTIFY
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "accord".to_string(),
            device: "accord".to_string(),
        }
    }
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub intents: Intents,
    pub properties: ConnectionProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
}

impl IdentifyPayload {
    #[must_use]
    pub fn new(token: impl Into<String>, intents: Intents, shard: Option<[u32; 2]>) -> Self {
        Self {
            token: token.into(),
            intents,
            properties: ConnectionProperties::default(),
            shard,
        }
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Payload of the READY dispatch
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    /// API version the gateway settled on
    pub v: Option<u8>,
    pub session_id: String,
    pub resume_gateway_url: Option<String>,
    /// Bot user object, passed through opaque
    #[serde(default)]
    pub user: Value,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}
