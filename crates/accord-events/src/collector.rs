//! Event collectors
//!
//! A collector accumulates matching payloads under a hidden subscription
//! until a match count or timeout is reached. Collectors operate on raw
//! JSON payloads; callers project into typed values afterwards.

use crate::dispatcher::{EventCallback, EventDispatcher, SubscribeOptions};
use crate::filters::EventFilter;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Collector termination conditions
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Stop collecting after this long, measured from creation
    pub timeout: Duration,
    /// Stop collecting after this many matches
    pub max_matches: usize,
    /// Whether hitting the timeout also tears down the hidden subscription
    pub dispose_on_timeout: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_matches: 1,
            dispose_on_timeout: true,
        }
    }
}

pub(crate) struct CollectorCore {
    config: CollectorConfig,
    items: Mutex<Vec<Value>>,
    active: AtomicBool,
    started_at: Instant,
    notify: Notify,
}

impl CollectorCore {
    fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            items: Mutex::new(Vec::new()),
            active: AtomicBool::new(true),
            started_at: Instant::now(),
            notify: Notify::new(),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && self.started_at.elapsed() < self.config.timeout
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_done(&self) -> bool {
        !self.active.load(Ordering::SeqCst)
            || self.started_at.elapsed() >= self.config.timeout
            || self.items.lock().len() >= self.config.max_matches
    }

    fn remaining_time(&self) -> Duration {
        self.config.timeout.saturating_sub(self.started_at.elapsed())
    }

    fn observe(&self, data: &Value, filter: Option<&EventFilter>) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        if self.started_at.elapsed() >= self.config.timeout {
            if self.config.dispose_on_timeout {
                self.deactivate();
            }
            return;
        }
        if let Some(filter) = filter {
            if !filter(data) {
                return;
            }
        }

        let mut items = self.items.lock();
        if items.len() >= self.config.max_matches {
            return;
        }
        items.push(data.clone());
        let full = items.len() >= self.config.max_matches;
        drop(items);

        if full {
            self.active.store(false, Ordering::SeqCst);
        }
        self.notify.notify_waiters();
    }
}

/// A scoped multi-event listener
///
/// Dropping the collector without calling [`Collector::stop`] leaves the
/// hidden subscription in place until the dispatcher is cleared; prefer the
/// wait methods, which tear it down on completion.
pub struct Collector {
    event: String,
    handler_id: String,
    core: Arc<CollectorCore>,
    dispatcher: Weak<EventDispatcher>,
}

impl EventDispatcher {
    /// Create a collector for an event, registering its hidden subscription
    pub fn collector(
        self: &Arc<Self>,
        event: &str,
        filter: Option<EventFilter>,
        config: CollectorConfig,
    ) -> Collector {
        let core = Arc::new(CollectorCore::new(config));
        let handler_id = format!("collector-{}", uuid::Uuid::new_v4());

        let core_cb = core.clone();
        let callback: EventCallback = Arc::new(move |data: &Value| {
            core_cb.observe(data, filter.as_ref());
        });

        self.on_with(
            event,
            callback,
            SubscribeOptions {
                id: Some(handler_id.clone()),
                ..Default::default()
            },
        );
        self.collectors
            .write()
            .insert(handler_id.clone(), Arc::downgrade(&core));

        Collector {
            event: event.to_string(),
            handler_id,
            core,
            dispatcher: Arc::downgrade(self),
        }
    }
}

impl Collector {
    /// Number of payloads collected so far
    pub fn count(&self) -> usize {
        self.core.items.lock().len()
    }

    /// Snapshot of the collected payloads
    pub fn collected(&self) -> Vec<Value> {
        self.core.items.lock().clone()
    }

    /// Whether the collector is still accepting payloads
    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    /// Stop collecting and remove the hidden subscription
    pub fn stop(&self) {
        self.core.deactivate();

        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.off(&self.event, &self.handler_id);
            dispatcher.collectors.write().remove(&self.handler_id);
        }
    }

    /// Wait for the first collected payload
    ///
    /// Bounded by the earlier of `timeout` and the collector's own deadline.
    /// The collector keeps running; it is not stopped by this call.
    pub async fn wait_for_first(&self, timeout: Duration) -> Option<Value> {
        let deadline = Instant::now() + timeout.min(self.core.remaining_time());

        loop {
            let notified = self.core.notify.notified();

            if let Some(first) = self.core.items.lock().first().cloned() {
                return Some(first);
            }
            if !self.core.active.load(Ordering::SeqCst) {
                return None;
            }

            let now = Instant::now();
            if now >= deadline {
                return self.core.items.lock().first().cloned();
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(deadline - now) => {
                    return self.core.items.lock().first().cloned();
                }
            }
        }
    }

    /// Wait until the match count or the collector timeout is reached,
    /// then stop the collector and return everything gathered
    ///
    /// Never returns more than `max_matches` items.
    pub async fn wait_for_all(&self) -> Vec<Value> {
        loop {
            let notified = self.core.notify.notified();

            if self.core.is_done() {
                break;
            }

            let remaining = self.core.remaining_time();
            if remaining.is_zero() {
                break;
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(remaining) => break,
            }
        }

        self.stop();
        self.collected()
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("event", &self.event)
            .field("count", &self.count())
            .field("active", &self.is_active())
            .finish()
    }
}
