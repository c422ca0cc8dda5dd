//! REST client
//!
//! Submissions are completed by a single worker task in FIFO order; callers
//! receive their result through a oneshot completion slot.

use crate::pipeline::{PendingRequest, Worker};
use crate::rate_limit::RateLimiter;
use crate::route::{self, Route};
use accord_core::{validate, AccordError, AccordResult};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Queue depth before submitters backpressure
const REQUEST_BUFFER_SIZE: usize = 128;

/// REST client configuration
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// API base URL
    pub base_url: String,
    /// Fixed timeout for each transport call
    pub timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://discord.com/api/v10".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Session start budget reported by /gateway/bot
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until the budget resets
    pub reset_after: u64,
    pub max_concurrency: u32,
}

/// Response of GET /gateway/bot
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBotInfo {
    pub url: String,
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Rate-limited REST client for the Discord API
///
/// Must be created inside a tokio runtime; construction spawns the worker.
pub struct RestClient {
    tx: Mutex<Option<mpsc::Sender<PendingRequest>>>,
    limiter: Arc<RateLimiter>,
    shutting_down: Arc<AtomicBool>,
}

impl RestClient {
    /// Create a client for the given bot token
    ///
    /// # Errors
    /// Returns a validation error for an empty token, or a transport error
    /// if the HTTP client cannot be built.
    pub fn new(token: &str, config: RestConfig) -> AccordResult<Self> {
        validate::token(token)?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AccordError::Transport(e.to_string()))?;

        let limiter = Arc::new(RateLimiter::new());
        let shutting_down = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER_SIZE);

        let worker = Worker {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            authorization: format!("Bot {}", token.trim_start_matches("Bot ")),
            user_agent: format!(
                "DiscordBot (https://github.com/accord-rs/accord, {})",
                env!("CARGO_PKG_VERSION")
            ),
            limiter: limiter.clone(),
            shutting_down: shutting_down.clone(),
        };
        tokio::spawn(worker.run(rx));

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            limiter,
            shutting_down,
        })
    }

    /// Create a client from the `DISCORD_BOT_TOKEN` environment variable
    ///
    /// Intended for headless test harnesses; production supplies the token
    /// explicitly.
    pub fn from_env() -> AccordResult<Self> {
        let _ = dotenvy::dotenv();
        let token = std::env::var("DISCORD_BOT_TOKEN")
            .map_err(|_| AccordError::Validation("DISCORD_BOT_TOKEN is not set".into()))?;
        Self::new(&token, RestConfig::default())
    }

    /// The rate limiter shared with the worker
    #[must_use]
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    /// Submit a request and await its JSON response
    ///
    /// An empty response body completes as `Value::Null`.
    pub async fn request(&self, route: Route, body: Option<Value>) -> AccordResult<Value> {
        self.request_with_headers(route, body, Vec::new()).await
    }

    /// Submit a request with extra headers overriding the defaults
    pub async fn request_with_headers(
        &self,
        route: Route,
        body: Option<Value>,
        headers: Vec<(String, String)>,
    ) -> AccordResult<Value> {
        let tx = match &*self.tx.lock() {
            Some(tx) => tx.clone(),
            None => return Err(AccordError::Shutdown),
        };

        let (respond, result) = oneshot::channel();
        tx.send(PendingRequest {
            route,
            body,
            headers,
            respond,
        })
        .await
        .map_err(|_| AccordError::Shutdown)?;

        result.await.map_err(|_| AccordError::Shutdown)?
    }

    /// Fetch gateway connection info and the session start budget
    pub async fn get_gateway_bot(&self) -> AccordResult<GatewayBotInfo> {
        let value = self.request(route::gateway_bot(), None).await?;
        serde_json::from_value(value)
            .map_err(|e| AccordError::Protocol(format!("invalid /gateway/bot response: {e}")))
    }

    /// Stop accepting submissions and fail queued requests with Shutdown
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        // Dropping the sender lets the worker drain and exit
        self.tx.lock().take();
        tracing::info!("REST client shut down");
    }

    /// Whether shutdown has been requested
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_client(server: &MockServer) -> RestClient {
        RestClient::new(
            "test_token_12345",
            RestConfig {
                base_url: server.uri(),
                timeout: Duration::from_secs(5),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_success_with_default_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .and(header("Authorization", "Bot test_token_12345"))
            .and(header("Content-Type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "123", "username": "bot", "bot": true
            })))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let user = client.request(route::current_user(), None).await.unwrap();
        assert_eq!(user["id"], serde_json::json!("123"));
    }

    #[tokio::test]
    async fn test_post_body_and_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/1/typing"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let result = client
            .request(route::trigger_typing("1"), Some(serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_create_message_round_trip() {
        let server = MockServer::start().await;
        let body = serde_json::json!({"content": "hello"});
        Mock::given(method("POST"))
            .and(path("/channels/42/messages"))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "900", "channel_id": "42", "content": "hello"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let message = client
            .request(route::create_message("42"), Some(body))
            .await
            .unwrap();
        assert_eq!(message["id"], serde_json::json!("900"));
    }

    #[tokio::test]
    async fn test_401_maps_to_authentication() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "message": "401: Unauthorized"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let err = client.request(route::current_user(), None).await.unwrap_err();
        assert!(matches!(err, AccordError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_403_maps_to_permission() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/guilds/1"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "message": "Missing Access"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let err = client.request(route::get_guild("1"), None).await.unwrap_err();
        match err {
            AccordError::Permission(message) => assert_eq!(message, "Missing Access"),
            other => panic!("expected permission error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_404_carries_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/9"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "message": "Unknown Channel", "code": 10003
            })))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let err = client.request(route::get_channel("9"), None).await.unwrap_err();
        match err {
            AccordError::Http { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Unknown Channel");
            }
            other => panic!("expected http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_429_retried_once_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/5"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "0.05")
                    .set_body_json(serde_json::json!({
                        "message": "You are being rate limited.",
                        "retry_after": 0.05,
                        "global": false
                    })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "5"})))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let start = Instant::now();
        let channel = client.request(route::get_channel("5"), None).await.unwrap();
        assert_eq!(channel["id"], serde_json::json!("5"));
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_429_twice_surfaces_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/6"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "0.02")
                    .set_body_json(serde_json::json!({"retry_after": 0.02, "global": false})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let err = client.request(route::get_channel("6"), None).await.unwrap_err();
        assert!(matches!(err, AccordError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_transport_and_rate_limit_retries_are_independent() {
        let server = MockServer::start().await;
        // First attempt: the response is delayed past the client timeout
        Mock::given(method("GET"))
            .and(path("/channels/30"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(600))
                    .set_body_json(serde_json::json!({"id": "30"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        // Second attempt: rate limited
        Mock::given(method("GET"))
            .and(path("/channels/30"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "0.05")
                    .set_body_json(serde_json::json!({"retry_after": 0.05, "global": false})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        // Third attempt succeeds
        Mock::given(method("GET"))
            .and(path("/channels/30"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "30"})))
            .mount(&server)
            .await;

        let client = RestClient::new(
            "test_token_12345",
            RestConfig {
                base_url: server.uri(),
                timeout: Duration::from_millis(200),
            },
        )
        .unwrap();

        // One transport failure and one 429 on the same submission: each
        // class carries its own retry, so the request still completes
        let channel = client.request(route::get_channel("30"), None).await.unwrap();
        assert_eq!(channel["id"], serde_json::json!("30"));
    }

    #[tokio::test]
    async fn test_429_headers_update_limiter_before_backoff() {
        let server = MockServer::start().await;
        // Global 429 whose headers advertise a longer window than the
        // body's retry_after
        Mock::given(method("GET"))
            .and(path("/channels/31"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("x-ratelimit-limit", "50")
                    .insert_header("x-ratelimit-reset-after", "0.3")
                    .insert_header("x-ratelimit-global", "true")
                    .set_body_json(serde_json::json!({"retry_after": 0.05, "global": true})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/31"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "31"})))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let start = Instant::now();
        let channel = client.request(route::get_channel("31"), None).await.unwrap();
        assert_eq!(channel["id"], serde_json::json!("31"));
        // The header-reported global window (0.3s) governs the retry, not
        // the shorter body retry_after
        assert!(
            start.elapsed() >= Duration::from_millis(250),
            "retry ignored the header-reported window ({:?})",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_exhausted_bucket_holds_next_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/7/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("x-ratelimit-limit", "5")
                    .insert_header("x-ratelimit-reset-after", "0.2")
                    .set_body_json(serde_json::json!({"id": "1"})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let route = route::create_message("7");

        // First response exhausts the bucket
        client
            .request(route.clone(), Some(serde_json::json!({"content": "a"})))
            .await
            .unwrap();

        // Second request must be held until the bucket resets
        let start = Instant::now();
        client
            .request(route, Some(serde_json::json!({"content": "b"})))
            .await
            .unwrap();
        assert!(
            start.elapsed() >= Duration::from_millis(180),
            "request was not held for the bucket reset ({:?})",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_requests_complete_in_submission_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(100))
                    .set_body_json(serde_json::json!({"id": "1"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "2"})))
            .mount(&server)
            .await;

        let client = Arc::new(test_client(&server).await);

        let slow = {
            let client = client.clone();
            tokio::spawn(async move {
                client.request(route::get_channel("1"), None).await.unwrap();
                Instant::now()
            })
        };
        // Give the slow request time to enter the queue first
        tokio::time::sleep(Duration::from_millis(10)).await;
        let fast = {
            let client = client.clone();
            tokio::spawn(async move {
                client.request(route::get_channel("2"), None).await.unwrap();
                Instant::now()
            })
        };

        let slow_done = slow.await.unwrap();
        let fast_done = fast.await.unwrap();
        // Single worker: the fast request cannot overtake the slow one
        assert!(fast_done >= slow_done);
    }

    #[tokio::test]
    async fn test_shutdown_fails_new_requests() {
        let server = MockServer::start().await;
        let client = test_client(&server).await;

        client.shutdown();
        let err = client.request(route::current_user(), None).await.unwrap_err();
        assert!(matches!(err, AccordError::Shutdown));
    }

    #[tokio::test]
    async fn test_get_gateway_bot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway/bot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "wss://gateway.discord.gg",
                "shards": 2,
                "session_start_limit": {
                    "total": 1000,
                    "remaining": 997,
                    "reset_after": 14400000,
                    "max_concurrency": 1
                }
            })))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let info = client.get_gateway_bot().await.unwrap();
        assert_eq!(info.url, "wss://gateway.discord.gg");
        assert_eq!(info.shards, 2);
        assert_eq!(info.session_start_limit.remaining, 997);
        assert_eq!(info.session_start_limit.max_concurrency, 1);
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let result = RestClient::new("", RestConfig::default());
        assert!(matches!(result, Err(AccordError::Validation(_))));
    }
}
