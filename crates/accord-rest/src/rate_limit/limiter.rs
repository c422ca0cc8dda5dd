//! Global and per-bucket rate limiter

use super::RateLimitUpdate;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct Bucket {
    remaining: i64,
    limit: i64,
    reset_at: Instant,
}

struct LocalPolicy {
    max_requests: u32,
    window: Duration,
    request_times: VecDeque<Instant>,
}

impl LocalPolicy {
    /// Drop timestamps older than the window
    fn expire(&mut self, now: Instant) {
        while let Some(front) = self.request_times.front() {
            if now.duration_since(*front) > self.window {
                self.request_times.pop_front();
            } else {
                break;
            }
        }
    }

    fn saturated(&mut self, now: Instant) -> bool {
        self.expire(now);
        self.request_times.len() >= self.max_requests as usize
    }

    /// Deadline at which a slot frees up; zero when not saturated
    fn wait(&mut self, now: Instant) -> Duration {
        if !self.saturated(now) {
            return Duration::ZERO;
        }
        match self.request_times.front() {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

/// Enforces the server-reported global and per-bucket limits plus optional
/// client-side sliding-window policies
///
/// The effective wait for a route is the maximum of the global deadline,
/// the bucket deadline, and the local-policy deadline.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    local_policies: DashMap<String, LocalPolicy>,
    global_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            local_policies: DashMap::new(),
            global_until: Mutex::new(None),
        }
    }

    /// Whether a request on the route may proceed now
    pub fn can_proceed(&self, route: &str) -> bool {
        self.wait_duration(route).is_zero()
    }

    /// How long a request on the route must wait before proceeding
    ///
    /// Zero when clear. The maximum of the global, bucket, and local-policy
    /// deadlines.
    pub fn wait_duration(&self, route: &str) -> Duration {
        let now = Instant::now();
        let mut wait = Duration::ZERO;

        if let Some(until) = *self.global_until.lock() {
            if until > now {
                wait = wait.max(until - now);
            }
        }

        if let Some(bucket) = self.buckets.get(route) {
            if bucket.remaining == 0 && bucket.reset_at > now {
                wait = wait.max(bucket.reset_at - now);
            }
        }

        if let Some(mut policy) = self.local_policies.get_mut(route) {
            wait = wait.max(policy.wait(now));
        }

        wait
    }

    /// Cooperatively wait until the route is clear
    pub async fn wait_until_clear(&self, route: &str) {
        loop {
            let wait = self.wait_duration(route);
            if wait.is_zero() {
                return;
            }
            tracing::debug!(route = %route, wait_ms = wait.as_millis() as u64, "Rate limit wait");
            tokio::time::sleep(wait).await;
        }
    }

    /// Record a request against the route's local policy window
    pub fn record_request(&self, route: &str) {
        if let Some(mut policy) = self.local_policies.get_mut(route) {
            let now = Instant::now();
            policy.expire(now);
            policy.request_times.push_back(now);
        }
    }

    /// Apply bucket state reported by a response
    pub fn update_from_response(&self, route: &str, update: &RateLimitUpdate) {
        if update.global {
            let wait = update
                .retry_after
                .unwrap_or(update.reset_after)
                .max(0.0);
            self.set_global_backoff(Duration::from_secs_f64(wait));
            return;
        }

        self.buckets.insert(
            route.to_string(),
            Bucket {
                remaining: update.remaining.max(0),
                limit: update.limit,
                reset_at: Instant::now() + Duration::from_secs_f64(update.reset_after.max(0.0)),
            },
        );
    }

    /// Hold every route until `wait` has elapsed
    pub fn set_global_backoff(&self, wait: Duration) {
        let until = Instant::now() + wait;
        let mut global = self.global_until.lock();
        // Never shorten an existing window
        if global.map_or(true, |existing| until > existing) {
            *global = Some(until);
        }
        tracing::warn!(wait_ms = wait.as_millis() as u64, "Global rate limit window set");
    }

    /// Hold one route's bucket until `wait` has elapsed
    pub fn set_route_backoff(&self, route: &str, wait: Duration) {
        let limit = self.buckets.get(route).map_or(-1, |b| b.limit);
        self.buckets.insert(
            route.to_string(),
            Bucket {
                remaining: 0,
                limit,
                reset_at: Instant::now() + wait,
            },
        );
    }

    /// Install a pre-emptive client-side throttle for a route
    pub fn set_local_policy(&self, route: &str, max_requests: u32, window: Duration) {
        self.local_policies.insert(
            route.to_string(),
            LocalPolicy {
                max_requests,
                window,
                request_times: VecDeque::with_capacity(max_requests as usize),
            },
        );
    }

    /// Bucket remaining count, if the route has reported state
    #[must_use]
    pub fn remaining(&self, route: &str) -> Option<i64> {
        self.buckets.get(route).map(|b| b.remaining)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("buckets", &self.buckets.len())
            .field("local_policies", &self.local_policies.len())
            .finish()
    }
}
