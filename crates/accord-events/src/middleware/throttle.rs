//! Per-event-type emission throttle

use super::{Middleware, Verdict};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct WindowCounter {
    count: u32,
    window_start: Instant,
}

/// Caps how many events of each type pass per window; excess is dropped
pub struct ThrottleMiddleware {
    max_events: u32,
    window: Duration,
    counters: Mutex<HashMap<String, WindowCounter>>,
}

impl ThrottleMiddleware {
    /// Allow `max_events` per `window` for each event type
    #[must_use]
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events,
            window,
            counters: Mutex::new(HashMap::new()),
        }
    }
}

impl Middleware for ThrottleMiddleware {
    fn name(&self) -> &str {
        "throttle"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn process(&self, event: &str, _data: &Value) -> Verdict {
        let mut counters = self.counters.lock();
        let now = Instant::now();
        let counter = counters.entry(event.to_string()).or_insert(WindowCounter {
            count: 0,
            window_start: now,
        });

        if now.duration_since(counter.window_start) >= self.window {
            counter.count = 0;
            counter.window_start = now;
        }

        if counter.count >= self.max_events {
            tracing::debug!(event = %event, "Throttled event emission");
            return Verdict::Block;
        }

        counter.count += 1;
        Verdict::Continue
    }
}
