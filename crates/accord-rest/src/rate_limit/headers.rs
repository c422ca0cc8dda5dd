//! Rate-limit state derived from response headers

use reqwest::header::HeaderMap;

/// Bucket state reported by one response
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitUpdate {
    /// Requests left in the bucket window
    pub remaining: i64,
    /// Bucket capacity
    pub limit: i64,
    /// Seconds until the bucket resets
    pub reset_after: f64,
    /// Whether the limit applies globally rather than to this bucket
    pub global: bool,
    /// Server-requested wait on 429 responses
    pub retry_after: Option<f64>,
}

impl RateLimitUpdate {
    /// Parse the `x-ratelimit-*` and `retry-after` headers
    ///
    /// Returns None when no rate-limit headers are present.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let remaining = header_value::<i64>(headers, "x-ratelimit-remaining");
        let limit = header_value::<i64>(headers, "x-ratelimit-limit");
        let reset_after = header_value::<f64>(headers, "x-ratelimit-reset-after");
        let retry_after = header_value::<f64>(headers, "retry-after");
        let global = headers
            .get("x-ratelimit-global")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if remaining.is_none() && limit.is_none() && retry_after.is_none() {
            return None;
        }

        Some(Self {
            remaining: remaining.unwrap_or(-1),
            limit: limit.unwrap_or(-1),
            reset_after: reset_after.or(retry_after).unwrap_or(0.0),
            global,
            retry_after,
        })
    }
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
