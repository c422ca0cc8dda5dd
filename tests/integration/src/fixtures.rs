//! Payload fixtures
//!
//! Builders for the opaque JSON payloads flowing through the pipeline.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

static ID_COUNTER: AtomicU64 = AtomicU64::new(100_000);

/// A unique snowflake-shaped id string
pub fn unique_id() -> String {
    ID_COUNTER.fetch_add(1, Ordering::SeqCst).to_string()
}

/// A MESSAGE_CREATE payload
pub fn message_create(author_id: &str, channel_id: &str, content: &str) -> Value {
    json!({
        "id": unique_id(),
        "channel_id": channel_id,
        "guild_id": "613425648685547541",
        "author": {"id": author_id, "username": "tester", "bot": false},
        "content": content,
    })
}

/// A MESSAGE_CREATE payload authored by a bot
pub fn bot_message_create(author_id: &str, channel_id: &str, content: &str) -> Value {
    let mut payload = message_create(author_id, channel_id, content);
    payload["author"]["bot"] = json!(true);
    payload
}

/// A GUILD_CREATE payload
pub fn guild_create(guild_id: &str, name: &str) -> Value {
    json!({
        "id": guild_id,
        "name": name,
        "owner_id": "42",
        "channels": [],
    })
}

/// A malformed MESSAGE_CREATE missing its id, for validator tests
pub fn malformed_message_create() -> Value {
    json!({
        "channel_id": "1",
        "content": "no id field",
    })
}
