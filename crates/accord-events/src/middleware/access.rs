//! Authentication and permission gate middleware

use super::{Middleware, Verdict};
use serde_json::Value;
use std::collections::HashMap;

/// Drops events that lack the required identity fields
///
/// When `require_user_id` is set, the payload must carry `author.id`.
/// When a token is configured, payloads carrying a `token` field must match
/// it (interaction-style callbacks echo the verification token).
pub struct AuthenticationMiddleware {
    expected_token: Option<String>,
    require_user_id: bool,
}

impl AuthenticationMiddleware {
    #[must_use]
    pub fn new(expected_token: Option<String>, require_user_id: bool) -> Self {
        Self {
            expected_token,
            require_user_id,
        }
    }
}

impl Middleware for AuthenticationMiddleware {
    fn name(&self) -> &str {
        "authentication"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn process(&self, event: &str, data: &Value) -> Verdict {
        if self.require_user_id && data.pointer("/author/id").and_then(Value::as_str).is_none() {
            tracing::debug!(event = %event, "Dropping event without author id");
            return Verdict::Block;
        }

        if let (Some(expected), Some(found)) = (
            self.expected_token.as_deref(),
            data.get("token").and_then(Value::as_str),
        ) {
            if expected != found {
                tracing::warn!(event = %event, "Dropping event with mismatched token");
                return Verdict::Block;
            }
        }

        Verdict::Continue
    }
}

/// Drops events whose member lacks a required permission bitmask
///
/// Permissions arrive as a stringified integer in `member.permissions`.
/// Events with no configured requirement pass through.
pub struct PermissionsMiddleware {
    required: HashMap<String, u64>,
}

impl PermissionsMiddleware {
    #[must_use]
    pub fn new(required: HashMap<String, u64>) -> Self {
        Self { required }
    }
}

impl Middleware for PermissionsMiddleware {
    fn name(&self) -> &str {
        "permissions"
    }

    fn priority(&self) -> i32 {
        80
    }

    fn process(&self, event: &str, data: &Value) -> Verdict {
        let Some(&mask) = self.required.get(event) else {
            return Verdict::Continue;
        };

        let held = data
            .pointer("/member/permissions")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        if held & mask == mask {
            Verdict::Continue
        } else {
            tracing::debug!(
                event = %event,
                required = mask,
                held = held,
                "Dropping event lacking required permissions"
            );
            Verdict::Block
        }
    }
}
