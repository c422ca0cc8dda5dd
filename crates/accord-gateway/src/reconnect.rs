//! Reconnection control
//!
//! Decides whether and when a dropped connection reconnects, and whether
//! the next attempt resumes or identifies afresh. Waits are cancellable
//! through a stop handle.

use crate::connection::SessionIdentity;
use crate::protocol::{classify_close, close_code_description, CloseAction};
use accord_common::ReconnectPolicy;
use accord_core::AccordError;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// What the owning runner should do next
#[derive(Debug)]
pub enum ReconnectDecision {
    /// Wait `delay`, then reconnect; `resume` reflects the session state
    Retry { delay: Duration, resume: bool },
    /// Reconnection is over; surface the error
    Stop(AccordError),
    /// Auto-reconnect is off or a stop was requested; exit quietly
    Abandon,
}

/// Cancellation handle shared with the shard manager
#[derive(Debug, Clone)]
pub struct ReconnectStop {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ReconnectStop {
    /// Cancel any in-flight backoff wait and forbid further retries
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Per-connection reconnection controller
pub struct ReconnectController {
    policy: ReconnectPolicy,
    attempts: u32,
    reconnecting: bool,
    last_close_code: Option<u16>,
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ReconnectController {
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            reconnecting: false,
            last_close_code: None,
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Handle for cancelling waits from outside the runner
    #[must_use]
    pub fn stop_handle(&self) -> ReconnectStop {
        ReconnectStop {
            stopped: self.stopped.clone(),
            notify: self.notify.clone(),
        }
    }

    /// Consecutive failed attempts since the last restored connection
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether a reconnect sequence is in progress
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    /// A session reached Ready: reset the retry budget
    pub fn on_connection_restored(&mut self) {
        self.attempts = 0;
        self.reconnecting = false;
        self.last_close_code = None;
    }

    /// Classify a server close and schedule the next step
    ///
    /// 4004 is fatal. Session-dropping codes invalidate the identity before
    /// the retry is scheduled, so the next attempt sends IDENTIFY.
    pub fn decide_close(
        &mut self,
        code: Option<u16>,
        session: &mut SessionIdentity,
    ) -> ReconnectDecision {
        self.last_close_code = code;

        if let Some(code) = code {
            match classify_close(code) {
                CloseAction::Fatal => {
                    session.invalidate();
                    return ReconnectDecision::Stop(AccordError::Authentication(format!(
                        "gateway close {code}: {}",
                        close_code_description(code)
                    )));
                }
                CloseAction::Reidentify => session.invalidate(),
                CloseAction::Resume => {}
            }
        }

        self.schedule_retry(session)
    }

    /// A transport drop with no close frame; the session is preserved
    pub fn decide_drop(&mut self, session: &mut SessionIdentity) -> ReconnectDecision {
        self.schedule_retry(session)
    }

    /// Handle INVALID_SESSION
    ///
    /// A non-resumable invalid session clears the identity. The gateway
    /// expects a short randomized wait before the fresh IDENTIFY.
    pub fn decide_invalid_session(
        &mut self,
        resumable: bool,
        session: &mut SessionIdentity,
    ) -> ReconnectDecision {
        if !resumable {
            session.invalidate();
        }

        if !self.policy.auto_reconnect || self.stopped.load(Ordering::SeqCst) {
            return ReconnectDecision::Abandon;
        }

        self.reconnecting = true;
        let delay = Duration::from_millis(rand::thread_rng().gen_range(1000..=5000));
        ReconnectDecision::Retry {
            delay,
            resume: session.is_resumable(),
        }
    }

    fn schedule_retry(&mut self, session: &SessionIdentity) -> ReconnectDecision {
        if !self.policy.auto_reconnect || self.stopped.load(Ordering::SeqCst) {
            return ReconnectDecision::Abandon;
        }

        if self.attempts >= self.policy.max_retries {
            let code = self.last_close_code.unwrap_or(0);
            return ReconnectDecision::Stop(AccordError::GatewayClosed {
                code,
                reason: format!(
                    "reconnect attempts exhausted after {} tries",
                    self.attempts
                ),
            });
        }

        let delay = self.backoff_delay(self.attempts);
        self.attempts += 1;
        self.reconnecting = true;

        tracing::info!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            resume = session.is_resumable(),
            "Reconnect scheduled"
        );

        ReconnectDecision::Retry {
            delay,
            resume: session.is_resumable(),
        }
    }

    /// Delay for attempt `k`: `min(max_delay, base · 2^k · U[0.8, 1.2])`
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.8..=1.2);
        let exp = self.policy.base_delay.as_secs_f64() * 2f64.powi(attempt as i32) * jitter;
        Duration::from_secs_f64(exp).min(self.policy.max_delay)
    }

    /// Wait out a backoff delay; returns false if cancelled by a stop
    pub async fn wait(&self, delay: Duration) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => !self.stopped.load(Ordering::SeqCst),
            _ = self.notify.notified() => false,
        }
    }

    /// Cancel any in-flight wait and forbid further retries
    pub fn stop(&self) {
        self.stop_handle().stop();
    }
}

impl std::fmt::Debug for ReconnectController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectController")
            .field("attempts", &self.attempts)
            .field("reconnecting", &self.reconnecting)
            .finish()
    }
}
