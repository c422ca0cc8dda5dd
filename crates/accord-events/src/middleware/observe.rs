//! Observation middleware: metrics, logging, debugging
//!
//! These run last (negative priority) so they see only emissions that
//! survived the gating middleware, unless deliberately re-prioritized.

use super::{Middleware, Verdict};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Per-event counters recorded as emissions flow past
#[derive(Default)]
pub struct MetricsMiddleware {
    counts: RwLock<HashMap<String, u64>>,
    last_seen: RwLock<HashMap<String, Instant>>,
    error_counts: RwLock<HashMap<String, u64>>,
}

/// Snapshot of recorded metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub counts: HashMap<String, u64>,
    pub last_seen: HashMap<String, Instant>,
    pub error_counts: HashMap<String, u64>,
}

impl MetricsMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a handler failure against an event type
    pub fn record_error(&self, event: &str) {
        *self.error_counts.write().entry(event.to_string()).or_insert(0) += 1;
    }

    /// Copy out the current counters
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counts: self.counts.read().clone(),
            last_seen: self.last_seen.read().clone(),
            error_counts: self.error_counts.read().clone(),
        }
    }

    /// Zero all counters
    pub fn reset(&self) {
        self.counts.write().clear();
        self.last_seen.write().clear();
        self.error_counts.write().clear();
    }
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    fn priority(&self) -> i32 {
        -50
    }

    fn process(&self, event: &str, _data: &Value) -> Verdict {
        *self.counts.write().entry(event.to_string()).or_insert(0) += 1;
        self.last_seen.write().insert(event.to_string(), Instant::now());
        Verdict::Continue
    }
}

/// Logs emissions for a recorded set of events, or all of them
pub struct LoggerMiddleware {
    log_all: bool,
    logged_events: HashSet<String>,
}

impl LoggerMiddleware {
    /// Log every emission
    #[must_use]
    pub fn all() -> Self {
        Self {
            log_all: true,
            logged_events: HashSet::new(),
        }
    }

    /// Log only the named events
    #[must_use]
    pub fn for_events(events: impl IntoIterator<Item = String>) -> Self {
        Self {
            log_all: false,
            logged_events: events.into_iter().collect(),
        }
    }
}

impl Middleware for LoggerMiddleware {
    fn name(&self) -> &str {
        "logger"
    }

    fn priority(&self) -> i32 {
        -100
    }

    fn process(&self, event: &str, data: &Value) -> Verdict {
        if self.log_all || self.logged_events.contains(event) {
            tracing::debug!(event = %event, data = %data, "Event emitted");
        }
        Verdict::Continue
    }
}

/// Verbose payload logging for selected events
pub struct DebugMiddleware {
    debug_events: HashSet<String>,
    log_all: bool,
}

impl DebugMiddleware {
    #[must_use]
    pub fn new(events: impl IntoIterator<Item = String>, log_all: bool) -> Self {
        Self {
            debug_events: events.into_iter().collect(),
            log_all,
        }
    }
}

impl Middleware for DebugMiddleware {
    fn name(&self) -> &str {
        "debugger"
    }

    fn priority(&self) -> i32 {
        -100
    }

    fn process(&self, event: &str, data: &Value) -> Verdict {
        if self.log_all || self.debug_events.contains(event) {
            tracing::trace!(
                event = %event,
                payload = %serde_json::to_string_pretty(data).unwrap_or_default(),
                "Debug event dump"
            );
        }
        Verdict::Continue
    }
}
