//! Event dispatcher
//!
//! Delivers opaque JSON payloads to registered handlers in
//! (priority desc, insertion asc) order, running the middleware chain first.
//! Handlers are invoked with no dispatcher lock held.

use crate::filters::EventFilter;
use crate::middleware::{Middleware, Verdict};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Handler callback over an event payload
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Options for handler registration
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Higher priority handlers run earlier; ties break by insertion order
    pub priority: i32,
    /// Explicit handler id; a unique one is synthesized when omitted
    pub id: Option<String>,
    /// Remove the handler atomically with its first firing
    pub once: bool,
}

struct HandlerEntry {
    id: String,
    priority: i32,
    once: bool,
    seq: u64,
    callback: EventCallback,
}

/// Statistics snapshot for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherStats {
    pub events_emitted: u64,
    pub handlers_invoked: u64,
    pub total_handlers: usize,
    pub active_collectors: usize,
    pub per_event_counts: HashMap<String, u64>,
    pub uptime: Duration,
}

/// Priority-ordered, filtered event dispatcher with middleware
pub struct EventDispatcher {
    handlers: RwLock<HashMap<String, Vec<HandlerEntry>>>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    pub(crate) collectors: RwLock<HashMap<String, Weak<crate::collector::CollectorCore>>>,
    registration_seq: AtomicU64,
    events_emitted: AtomicU64,
    handlers_invoked: AtomicU64,
    per_event: Mutex<HashMap<String, u64>>,
    started_at: Instant,
}

impl EventDispatcher {
    /// Create a new dispatcher
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            middleware: RwLock::new(Vec::new()),
            collectors: RwLock::new(HashMap::new()),
            registration_seq: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            handlers_invoked: AtomicU64::new(0),
            per_event: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    /// Create a new dispatcher wrapped in Arc
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Register a handler with default options, returning its id
    pub fn on(&self, event: &str, callback: EventCallback) -> String {
        self.on_with(event, callback, SubscribeOptions::default())
    }

    /// Register a handler, returning its id
    pub fn on_with(&self, event: &str, callback: EventCallback, options: SubscribeOptions) -> String {
        let id = options
            .id
            .unwrap_or_else(|| format!("handler-{}", uuid::Uuid::new_v4()));
        let seq = self.registration_seq.fetch_add(1, Ordering::SeqCst);

        let entry = HandlerEntry {
            id: id.clone(),
            priority: options.priority,
            once: options.once,
            seq,
            callback,
        };

        let mut handlers = self.handlers.write();
        let list = handlers.entry(event.to_string()).or_default();
        list.push(entry);
        // Stable order: priority desc, then registration order
        list.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));

        tracing::debug!(event = %event, handler_id = %id, "Registered event handler");
        id
    }

    /// Remove a handler by id, returning whether it existed
    pub fn off(&self, event: &str, id: &str) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(event) else {
            return false;
        };

        let before = list.len();
        list.retain(|h| h.id != id);
        let removed = list.len() != before;

        if list.is_empty() {
            handlers.remove(event);
        }
        if removed {
            tracing::debug!(event = %event, handler_id = %id, "Removed event handler");
        }
        removed
    }

    /// Remove every handler for an event, returning how many were removed
    pub fn off_all(&self, event: &str) -> usize {
        let mut handlers = self.handlers.write();
        let count = handlers.remove(event).map_or(0, |list| list.len());
        if count > 0 {
            tracing::debug!(event = %event, count = count, "Removed all handlers for event");
        }
        count
    }

    /// Remove a handler id from every event table
    ///
    /// Bulk teardown helper; returns how many entries were removed.
    pub fn remove_everywhere(&self, id: &str) -> usize {
        let mut handlers = self.handlers.write();
        let mut removed = 0;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|h| h.id != id);
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    /// Remove all handlers and stop all collectors
    pub fn clear(&self) {
        self.handlers.write().clear();

        let collectors: Vec<_> = self.collectors.write().drain().collect();
        for (_, weak) in collectors {
            if let Some(core) = weak.upgrade() {
                core.deactivate();
            }
        }

        tracing::debug!("Dispatcher cleared all handlers and collectors");
    }

    /// Number of handlers registered for an event
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }

    /// Number of handlers registered across all events
    pub fn total_handlers(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    // =========================================================================
    // Middleware
    // =========================================================================

    /// Add a middleware; the chain stays sorted by descending priority
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        let mut chain = self.middleware.write();
        tracing::debug!(name = %middleware.name(), "Added middleware");
        chain.push(middleware);
        chain.sort_by_key(|m| std::cmp::Reverse(m.priority()));
    }

    /// Remove a middleware by name, returning whether it existed
    pub fn remove_middleware(&self, name: &str) -> bool {
        let mut chain = self.middleware.write();
        let before = chain.len();
        chain.retain(|m| m.name() != name);
        chain.len() != before
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Run the middleware chain and deliver to handlers in priority order
    pub fn emit(&self, event: &str, data: Value) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        *self.per_event.lock().entry(event.to_string()).or_insert(0) += 1;

        let chain = self.middleware.read().clone();
        let mut data = data;
        for middleware in &chain {
            match middleware.process(event, &data) {
                Verdict::Continue => {}
                Verdict::ContinueWith(rewritten) => data = rewritten,
                Verdict::Block => {
                    tracing::debug!(
                        event = %event,
                        middleware = %middleware.name(),
                        "Middleware blocked event"
                    );
                    return;
                }
            }
        }

        // Snapshot under the read lock; handlers run with no lock held
        let snapshot: Vec<(String, bool, EventCallback)> = {
            let handlers = self.handlers.read();
            match handlers.get(event) {
                Some(list) => list
                    .iter()
                    .map(|h| (h.id.clone(), h.once, h.callback.clone()))
                    .collect(),
                None => return,
            }
        };

        for (id, once, callback) in snapshot {
            if once {
                // Claim the one-shot under the write lock; a concurrent
                // emitter that claimed it first wins and we skip.
                if !self.off(event, &id) {
                    continue;
                }
            }

            self.handlers_invoked.fetch_add(1, Ordering::Relaxed);
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(&data))).is_err() {
                tracing::error!(event = %event, handler_id = %id, "Event handler panicked");
            }
        }
    }

    /// Emit only if every filter accepts the payload
    pub fn emit_filtered(&self, event: &str, data: Value, filters: &[EventFilter]) {
        if filters.iter().all(|f| f(&data)) {
            self.emit(event, data);
        }
    }

    // =========================================================================
    // Waiting
    // =========================================================================

    /// Block the caller (cooperatively) for the first matching payload
    ///
    /// Registers a hidden handler removed on match or timeout.
    pub async fn wait_for(
        &self,
        event: &str,
        filter: Option<EventFilter>,
        timeout: Duration,
    ) -> Option<Value> {
        let (tx, rx) = oneshot::channel::<Value>();
        let slot = Arc::new(Mutex::new(Some(tx)));

        let slot_cb = slot.clone();
        let callback: EventCallback = Arc::new(move |data: &Value| {
            if let Some(f) = &filter {
                if !f(data) {
                    return;
                }
            }
            if let Some(sender) = slot_cb.lock().take() {
                let _ = sender.send(data.clone());
            }
        });

        let id = self.on_with(
            event,
            callback,
            SubscribeOptions {
                id: Some(format!("wait-{}", uuid::Uuid::new_v4())),
                ..Default::default()
            },
        );

        let result = tokio::time::timeout(timeout, rx).await.ok().and_then(Result::ok);
        self.off(event, &id);
        result
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Snapshot the running totals
    pub fn stats(&self) -> DispatcherStats {
        let active_collectors = self
            .collectors
            .read()
            .values()
            .filter(|weak| weak.upgrade().is_some_and(|c| c.is_active()))
            .count();

        DispatcherStats {
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            handlers_invoked: self.handlers_invoked.load(Ordering::Relaxed),
            total_handlers: self.total_handlers(),
            active_collectors,
            per_event_counts: self.per_event.lock().clone(),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Zero the counters
    pub fn reset_stats(&self) {
        self.events_emitted.store(0, Ordering::Relaxed);
        self.handlers_invoked.store(0, Ordering::Relaxed);
        self.per_event.lock().clear();
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.total_handlers())
            .field("events_emitted", &self.events_emitted.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters;
    use serde_json::json;

    fn recording_handler(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> EventCallback {
        let log = log.clone();
        let tag = tag.to_string();
        Arc::new(move |_| log.lock().push(tag.clone()))
    }

    #[test]
    fn test_on_emit_off() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let id = dispatcher.on("MESSAGE_CREATE", recording_handler(&log, "a"));
        dispatcher.emit("MESSAGE_CREATE", json!({"id": "1"}));
        assert_eq!(log.lock().len(), 1);

        assert!(dispatcher.off("MESSAGE_CREATE", &id));
        dispatcher.emit("MESSAGE_CREATE", json!({"id": "2"}));
        assert_eq!(log.lock().len(), 1);

        assert!(!dispatcher.off("MESSAGE_CREATE", &id));
    }

    #[test]
    fn test_priority_ordering() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.on_with(
            "E",
            recording_handler(&log, "low"),
            SubscribeOptions { priority: -5, ..Default::default() },
        );
        dispatcher.on_with(
            "E",
            recording_handler(&log, "high"),
            SubscribeOptions { priority: 10, ..Default::default() },
        );
        dispatcher.on_with(
            "E",
            recording_handler(&log, "mid-first"),
            SubscribeOptions { priority: 0, ..Default::default() },
        );
        dispatcher.on_with(
            "E",
            recording_handler(&log, "mid-second"),
            SubscribeOptions { priority: 0, ..Default::default() },
        );

        dispatcher.emit("E", json!({}));
        assert_eq!(*log.lock(), vec!["high", "mid-first", "mid-second", "low"]);
    }

    #[test]
    fn test_once_fires_exactly_once() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.on_with(
            "E",
            recording_handler(&log, "once"),
            SubscribeOptions { once: true, ..Default::default() },
        );

        dispatcher.emit("E", json!({}));
        dispatcher.emit("E", json!({}));
        dispatcher.emit("E", json!({}));

        assert_eq!(log.lock().len(), 1);
        assert_eq!(dispatcher.handler_count("E"), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_abort_delivery() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.on_with(
            "E",
            Arc::new(|_| panic!("handler bug")),
            SubscribeOptions { priority: 10, ..Default::default() },
        );
        dispatcher.on("E", recording_handler(&log, "survivor"));

        dispatcher.emit("E", json!({}));
        assert_eq!(*log.lock(), vec!["survivor"]);
    }

    #[test]
    fn test_emit_filtered() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        dispatcher.on("E", recording_handler(&log, "x"));

        let from_42 = json!({"author": {"id": "42"}});
        let from_43 = json!({"author": {"id": "43"}});

        dispatcher.emit_filtered("E", from_42, &[filters::by_user_id("42")]);
        dispatcher.emit_filtered("E", from_43, &[filters::by_user_id("42")]);

        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_off_all_and_remove_everywhere() {
        let dispatcher = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.on("A", recording_handler(&log, "1"));
        dispatcher.on("A", recording_handler(&log, "2"));
        dispatcher.on_with(
            "B",
            recording_handler(&log, "3"),
            SubscribeOptions { id: Some("shared".into()), ..Default::default() },
        );
        dispatcher.on_with(
            "C",
            recording_handler(&log, "4"),
            SubscribeOptions { id: Some("shared".into()), ..Default::default() },
        );

        assert_eq!(dispatcher.off_all("A"), 2);
        assert_eq!(dispatcher.remove_everywhere("shared"), 2);
        assert_eq!(dispatcher.total_handlers(), 0);
    }

    #[test]
    fn test_middleware_block_and_rewrite() {
        use crate::middleware::Verdict;

        struct Upper;
        impl Middleware for Upper {
            fn name(&self) -> &str {
                "upper"
            }
            fn priority(&self) -> i32 {
                10
            }
            fn process(&self, _event: &str, data: &Value) -> Verdict {
                let mut rewritten = data.clone();
                rewritten["touched"] = json!(true);
                Verdict::ContinueWith(rewritten)
            }
        }

        struct DropAll;
        impl Middleware for DropAll {
            fn name(&self) -> &str {
                "drop"
            }
            fn process(&self, _event: &str, _data: &Value) -> Verdict {
                Verdict::Block
            }
        }

        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
        let sink = seen.clone();
        dispatcher.on("E", Arc::new(move |v| sink.lock().push(v.clone())));

        dispatcher.add_middleware(Arc::new(Upper));
        dispatcher.emit("E", json!({"id": "1"}));
        assert_eq!(seen.lock()[0]["touched"], json!(true));

        dispatcher.add_middleware(Arc::new(DropAll));
        dispatcher.emit("E", json!({"id": "2"}));
        assert_eq!(seen.lock().len(), 1);

        assert!(dispatcher.remove_middleware("drop"));
        dispatcher.emit("E", json!({"id": "3"}));
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_wait_for_match() {
        let dispatcher = Arc::new(EventDispatcher::new());

        let waiter = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .wait_for(
                        "MESSAGE_CREATE",
                        Some(filters::by_user_id("42")),
                        Duration::from_secs(5),
                    )
                    .await
            })
        };

        // Give the waiter time to register
        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.emit("MESSAGE_CREATE", json!({"author": {"id": "17"}}));
        dispatcher.emit("MESSAGE_CREATE", json!({"author": {"id": "42"}, "content": "hit"}));

        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap()["content"], json!("hit"));
        // The hidden handler is gone
        assert_eq!(dispatcher.handler_count("MESSAGE_CREATE"), 0);
    }

    #[tokio::test]
    async fn test_wait_for_timeout_removes_handler() {
        let dispatcher = EventDispatcher::new();
        let result = dispatcher
            .wait_for("NEVER", None, Duration::from_millis(30))
            .await;
        assert!(result.is_none());
        assert_eq!(dispatcher.handler_count("NEVER"), 0);
    }

    #[test]
    fn test_stats() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on("A", Arc::new(|_| {}));
        dispatcher.emit("A", json!({}));
        dispatcher.emit("A", json!({}));
        dispatcher.emit("B", json!({}));

        let stats = dispatcher.stats();
        assert_eq!(stats.events_emitted, 3);
        assert_eq!(stats.handlers_invoked, 2);
        assert_eq!(stats.per_event_counts["A"], 2);
        assert_eq!(stats.total_handlers, 1);

        dispatcher.reset_stats();
        assert_eq!(dispatcher.stats().events_emitted, 0);
    }
}
