//! Event filter combinators
//!
//! Filters are predicates over opaque JSON payloads. A filter that cannot
//! find the field it inspects rejects the payload.

use accord_core::pattern::compile_glob;
use serde_json::Value;
use std::sync::Arc;

/// A predicate over an event payload
pub type EventFilter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Match events authored by the given user id
pub fn by_user_id(user_id: impl Into<String>) -> EventFilter {
    let user_id = user_id.into();
    Arc::new(move |event| {
        event
            .pointer("/author/id")
            .and_then(Value::as_str)
            .is_some_and(|id| id == user_id)
    })
}

/// Match events in the given channel
pub fn by_channel_id(channel_id: impl Into<String>) -> EventFilter {
    let channel_id = channel_id.into();
    Arc::new(move |event| {
        event
            .get("channel_id")
            .and_then(Value::as_str)
            .is_some_and(|id| id == channel_id)
    })
}

/// Match events in the given guild
pub fn by_guild_id(guild_id: impl Into<String>) -> EventFilter {
    let guild_id = guild_id.into();
    Arc::new(move |event| {
        event
            .get("guild_id")
            .and_then(Value::as_str)
            .is_some_and(|id| id == guild_id)
    })
}

/// Match events whose `content` equals the pattern
///
/// A pattern containing `*` is treated as an anchored glob. An invalid
/// pattern falls back to literal comparison.
pub fn by_content(pattern: impl Into<String>) -> EventFilter {
    let pattern = pattern.into();
    let compiled = if pattern.contains('*') || pattern.contains('?') {
        compile_glob(&pattern).ok()
    } else {
        None
    };

    Arc::new(move |event| {
        let Some(content) = event.get("content").and_then(Value::as_str) else {
            return false;
        };
        match &compiled {
            Some(re) => re.is_match(content),
            None => content == pattern,
        }
    })
}

/// Match events by the author's bot flag
pub fn by_bot(is_bot: bool) -> EventFilter {
    Arc::new(move |event| {
        event
            .pointer("/author/bot")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            == is_bot
    })
}

/// Accept only when every filter accepts
pub fn all_of(filters: Vec<EventFilter>) -> EventFilter {
    Arc::new(move |event| filters.iter().all(|f| f(event)))
}

/// Accept when any filter accepts
pub fn any_of(filters: Vec<EventFilter>) -> EventFilter {
    Arc::new(move |event| filters.iter().any(|f| f(event)))
}

/// Invert a filter
pub fn not(filter: EventFilter) -> EventFilter {
    Arc::new(move |event| !filter(event))
}
