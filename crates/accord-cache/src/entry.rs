//! Cache entry representation

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::time::Duration;

/// A single cache entry
///
/// Wall-clock time is used for expiry so entries survive export/import
/// across processes.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Stored JSON value
    pub value: Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry time; None means the entry never expires
    pub expires_at: Option<DateTime<Utc>>,
    /// Persistent entries are exempt from expiry and capacity eviction
    pub persistent: bool,
    /// Monotonic access counter used for least-recently-used eviction
    pub(crate) access_seq: u64,
}

impl CacheEntry {
    /// Create an entry expiring after `ttl`
    ///
    /// A TTL too large to represent makes the entry never expire.
    #[must_use]
    pub fn new(value: Value, ttl: Duration, access_seq: u64) -> Self {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d));
        Self {
            value,
            created_at: now,
            expires_at,
            persistent: false,
            access_seq,
        }
    }

    /// Create a persistent entry that never expires
    #[must_use]
    pub fn persistent(value: Value, access_seq: u64) -> Self {
        Self {
            value,
            created_at: Utc::now(),
            expires_at: None,
            persistent: true,
            access_seq,
        }
    }

    /// Whether the entry has passed its expiry time
    #[must_use]
    pub fn is_expired(&self) -> bool {
        if self.persistent {
            return false;
        }
        match self.expires_at {
            Some(at) => Utc::now() >= at,
            None => false,
        }
    }

    /// Time remaining before expiry; None for entries that never expire
    #[must_use]
    pub fn remaining_ttl(&self) -> Option<Duration> {
        if self.persistent {
            return None;
        }
        let at = self.expires_at?;
        (at - Utc::now()).to_std().ok().or(Some(Duration::ZERO))
    }

    /// Serialize for export: epoch-second timestamps, null expiry = never
    #[must_use]
    pub fn to_export(&self) -> Value {
        serde_json::json!({
            "value": self.value,
            "created_at": self.created_at.timestamp(),
            "expires_at": self.expires_at.map(|t| t.timestamp()),
            "is_persistent": self.persistent,
        })
    }

    /// Rebuild an entry from its export representation
    pub fn from_export(data: &Value, access_seq: u64) -> Option<Self> {
        let value = data.get("value")?.clone();
        let created_at = Utc
            .timestamp_opt(data.get("created_at")?.as_i64()?, 0)
            .single()?;
        let expires_at = match data.get("expires_at") {
            Some(Value::Number(n)) => Some(Utc.timestamp_opt(n.as_i64()?, 0).single()?),
            _ => None,
        };
        let persistent = data
            .get("is_persistent")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Some(Self {
            value,
            created_at,
            expires_at,
            persistent,
            access_seq,
        })
    }
}
