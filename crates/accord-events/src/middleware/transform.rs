//! Payload validation, rewriting, and filter middleware

use super::{Middleware, Verdict};
use crate::filters::EventFilter;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-event schema predicate
pub type ValidatorFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Per-event payload rewrite
pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Blocks events that fail their registered schema predicate
///
/// Events with no registered validator pass through.
#[derive(Default)]
pub struct ValidatorMiddleware {
    validators: HashMap<String, ValidatorFn>,
}

impl ValidatorMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate for an event type
    #[must_use]
    pub fn with_validator(mut self, event: impl Into<String>, validator: ValidatorFn) -> Self {
        self.validators.insert(event.into(), validator);
        self
    }
}

impl Middleware for ValidatorMiddleware {
    fn name(&self) -> &str {
        "validator"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn process(&self, event: &str, data: &Value) -> Verdict {
        match self.validators.get(event) {
            Some(validator) if !validator(data) => {
                tracing::warn!(event = %event, "Event failed validation");
                Verdict::Block
            }
            _ => Verdict::Continue,
        }
    }
}

/// Rewrites payloads for events with a registered transform
#[derive(Default)]
pub struct TransformerMiddleware {
    transformers: HashMap<String, TransformFn>,
}

impl TransformerMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rewrite for an event type
    #[must_use]
    pub fn with_transform(mut self, event: impl Into<String>, transform: TransformFn) -> Self {
        self.transformers.insert(event.into(), transform);
        self
    }
}

impl Middleware for TransformerMiddleware {
    fn name(&self) -> &str {
        "transformer"
    }

    fn priority(&self) -> i32 {
        60
    }

    fn process(&self, event: &str, data: &Value) -> Verdict {
        match self.transformers.get(event) {
            Some(transform) => Verdict::ContinueWith(transform(data.clone())),
            None => Verdict::Continue,
        }
    }
}

/// Filter combination mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Every filter must accept
    All,
    /// At least one filter must accept
    Any,
}

/// Blocks events rejected by a configured filter set
pub struct FilterMiddleware {
    filters: Vec<EventFilter>,
    mode: FilterMode,
}

impl FilterMiddleware {
    #[must_use]
    pub fn new(filters: Vec<EventFilter>, mode: FilterMode) -> Self {
        Self { filters, mode }
    }
}

impl Middleware for FilterMiddleware {
    fn name(&self) -> &str {
        "filter"
    }

    fn priority(&self) -> i32 {
        70
    }

    fn process(&self, event: &str, data: &Value) -> Verdict {
        let passes = match self.mode {
            FilterMode::All => self.filters.iter().all(|f| f(data)),
            FilterMode::Any => self.filters.iter().any(|f| f(data)),
        };

        if passes {
            Verdict::Continue
        } else {
            tracing::debug!(event = %event, "Filter middleware blocked event");
            Verdict::Block
        }
    }
}
