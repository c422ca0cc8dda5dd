//! Duplicate-event suppression keyed by payload id

use super::{Middleware, Verdict};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

struct SeenIds {
    // (id, first-seen) in arrival order so eviction drops the oldest
    order: VecDeque<(String, Instant)>,
    index: HashMap<String, Instant>,
}

/// Drops payloads whose `id` was already seen within the TTL
///
/// Payloads without an `id` field always pass. Bounded capacity per event
/// type; the oldest remembered id is evicted first.
pub struct DedupeMiddleware {
    max_ids: usize,
    ttl: Duration,
    seen: Mutex<HashMap<String, SeenIds>>,
}

impl DedupeMiddleware {
    /// Remember up to `max_ids` ids per event type for `ttl`
    #[must_use]
    pub fn new(max_ids: usize, ttl: Duration) -> Self {
        Self {
            max_ids,
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }
}

impl Middleware for DedupeMiddleware {
    fn name(&self) -> &str {
        "dedupe"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn process(&self, event: &str, data: &Value) -> Verdict {
        let Some(id) = data.get("id").and_then(Value::as_str) else {
            return Verdict::Continue;
        };

        let now = Instant::now();
        let mut seen = self.seen.lock();
        let ids = seen.entry(event.to_string()).or_insert_with(|| SeenIds {
            order: VecDeque::new(),
            index: HashMap::new(),
        });

        // Expire old ids from the front
        while let Some((front_id, at)) = ids.order.front() {
            if now.duration_since(*at) > self.ttl {
                let front_id = front_id.clone();
                ids.order.pop_front();
                ids.index.remove(&front_id);
            } else {
                break;
            }
        }

        if let Some(first_seen) = ids.index.get(id) {
            if now.duration_since(*first_seen) <= self.ttl {
                tracing::debug!(event = %event, id = %id, "Dropped duplicate event");
                return Verdict::Block;
            }
        }

        if ids.order.len() >= self.max_ids {
            if let Some((evicted, _)) = ids.order.pop_front() {
                ids.index.remove(&evicted);
            }
        }

        ids.order.push_back((id.to_string(), now));
        ids.index.insert(id.to_string(), now);
        Verdict::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duplicate_blocked() {
        let mw = DedupeMiddleware::new(100, Duration::from_secs(60));
        let payload = json!({"id": "123", "content": "hi"});

        assert!(matches!(mw.process("MESSAGE_CREATE", &payload), Verdict::Continue));
        assert!(matches!(mw.process("MESSAGE_CREATE", &payload), Verdict::Block));
    }

    #[test]
    fn test_no_id_always_passes() {
        let mw = DedupeMiddleware::new(100, Duration::from_secs(60));
        let payload = json!({"content": "anonymous"});

        assert!(matches!(mw.process("E", &payload), Verdict::Continue));
        assert!(matches!(mw.process("E", &payload), Verdict::Continue));
    }

    #[test]
    fn test_event_types_are_independent() {
        let mw = DedupeMiddleware::new(100, Duration::from_secs(60));
        let payload = json!({"id": "1"});

        assert!(matches!(mw.process("A", &payload), Verdict::Continue));
        assert!(matches!(mw.process("B", &payload), Verdict::Continue));
    }

    #[test]
    fn test_ttl_expiry_allows_replay() {
        let mw = DedupeMiddleware::new(100, Duration::from_millis(10));
        let payload = json!({"id": "1"});

        assert!(matches!(mw.process("A", &payload), Verdict::Continue));
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(mw.process("A", &payload), Verdict::Continue));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mw = DedupeMiddleware::new(2, Duration::from_secs(60));

        assert!(matches!(mw.process("A", &json!({"id": "1"})), Verdict::Continue));
        assert!(matches!(mw.process("A", &json!({"id": "2"})), Verdict::Continue));
        // "3" evicts "1" from memory
        assert!(matches!(mw.process("A", &json!({"id": "3"})), Verdict::Continue));
        assert!(matches!(mw.process("A", &json!({"id": "1"})), Verdict::Continue));
        // "3" is still remembered
        assert!(matches!(mw.process("A", &json!({"id": "3"})), Verdict::Block));
    }
}
