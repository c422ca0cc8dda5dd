//! REST routes and bucket signatures
//!
//! A route carries its request path plus the signature used for rate-limit
//! bucketing. Buckets are shared per route template: only the major
//! parameter (the first id under /channels, /guilds, or /webhooks) stays in
//! the signature; every other id collapses to `{id}`.

use reqwest::Method;

/// A REST route: method, concrete path, and rate-limit bucket signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub path: String,
    pub bucket: String,
}

impl Route {
    /// Build a route, deriving the bucket signature from the path
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let bucket = format!("{} {}", method, bucket_template(&path));
        Self { method, path, bucket }
    }
}

/// Collapse non-major id segments of a path into `{id}`
fn bucket_template(path: &str) -> String {
    const MAJOR_PARENTS: [&str; 3] = ["channels", "guilds", "webhooks"];

    let mut out = String::with_capacity(path.len());
    let mut previous = "";
    let mut major_kept = false;

    for (index, segment) in path.split('/').enumerate() {
        if index > 0 {
            out.push('/');
        }

        let is_id = !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit());
        if is_id {
            if !major_kept && MAJOR_PARENTS.contains(&previous) {
                major_kept = true;
                out.push_str(segment);
            } else {
                out.push_str("{id}");
            }
        } else {
            out.push_str(segment);
        }
        previous = segment;
    }

    out
}

// =============================================================================
// Typed route builders. Each REST operation is exposed exactly once.
// =============================================================================

/// GET /gateway/bot
#[must_use]
pub fn gateway_bot() -> Route {
    Route::new(Method::GET, "/gateway/bot")
}

/// GET /users/@me
#[must_use]
pub fn current_user() -> Route {
    Route::new(Method::GET, "/users/@me")
}

/// GET /channels/{channel_id}
#[must_use]
pub fn get_channel(channel_id: &str) -> Route {
    Route::new(Method::GET, format!("/channels/{channel_id}"))
}

/// POST /channels/{channel_id}/messages
#[must_use]
pub fn create_message(channel_id: &str) -> Route {
    Route::new(Method::POST, format!("/channels/{channel_id}/messages"))
}

/// PATCH /channels/{channel_id}/messages/{message_id}
#[must_use]
pub fn edit_message(channel_id: &str, message_id: &str) -> Route {
    Route::new(
        Method::PATCH,
        format!("/channels/{channel_id}/messages/{message_id}"),
    )
}

/// DELETE /channels/{channel_id}/messages/{message_id}
#[must_use]
pub fn delete_message(channel_id: &str, message_id: &str) -> Route {
    Route::new(
        Method::DELETE,
        format!("/channels/{channel_id}/messages/{message_id}"),
    )
}

/// PUT /channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me
#[must_use]
pub fn create_reaction(channel_id: &str, message_id: &str, emoji: &str) -> Route {
    Route::new(
        Method::PUT,
        format!("/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me"),
    )
}

/// DELETE /channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me
#[must_use]
pub fn delete_own_reaction(channel_id: &str, message_id: &str, emoji: &str) -> Route {
    Route::new(
        Method::DELETE,
        format!("/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me"),
    )
}

/// POST /channels/{channel_id}/typing
#[must_use]
pub fn trigger_typing(channel_id: &str) -> Route {
    Route::new(Method::POST, format!("/channels/{channel_id}/typing"))
}

/// GET /guilds/{guild_id}
#[must_use]
pub fn get_guild(guild_id: &str) -> Route {
    Route::new(Method::GET, format!("/guilds/{guild_id}"))
}

/// GET /guilds/{guild_id}/channels
#[must_use]
pub fn guild_channels(guild_id: &str) -> Route {
    Route::new(Method::GET, format!("/guilds/{guild_id}/channels"))
}

/// GET /guilds/{guild_id}/members/{user_id}
#[must_use]
pub fn get_guild_member(guild_id: &str, user_id: &str) -> Route {
    Route::new(Method::GET, format!("/guilds/{guild_id}/members/{user_id}"))
}

/// PUT /guilds/{guild_id}/members/{user_id}/roles/{role_id}
#[must_use]
pub fn add_member_role(guild_id: &str, user_id: &str, role_id: &str) -> Route {
    Route::new(
        Method::PUT,
        format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
    )
}

/// DELETE /guilds/{guild_id}/members/{user_id}/roles/{role_id}
#[must_use]
pub fn remove_member_role(guild_id: &str, user_id: &str, role_id: &str) -> Route {
    Route::new(
        Method::DELETE,
        format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
    )
}

/// PATCH /webhooks/{application_id}/{token}/messages/{message_id}
#[must_use]
pub fn edit_followup(application_id: &str, token: &str, message_id: &str) -> Route {
    Route::new(
        Method::PATCH,
        format!("/webhooks/{application_id}/{token}/messages/{message_id}"),
    )
}
