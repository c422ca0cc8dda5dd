//! Request pipeline worker
//!
//! A single worker drains the submission queue, so at most one transport
//! call is in flight per client and responses complete in submission order.

use crate::rate_limit::{RateLimitUpdate, RateLimiter};
use crate::route::Route;
use accord_core::{AccordError, AccordResult};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A queued request awaiting the worker
pub(crate) struct PendingRequest {
    pub route: Route,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub respond: oneshot::Sender<AccordResult<Value>>,
}

/// The single connection worker behind a [`crate::RestClient`]
pub(crate) struct Worker {
    pub http: reqwest::Client,
    pub base_url: String,
    pub authorization: String,
    pub user_agent: String,
    pub limiter: Arc<RateLimiter>,
    pub shutting_down: Arc<AtomicBool>,
}

impl Worker {
    /// Drain the queue until every sender is dropped
    pub(crate) async fn run(self, mut rx: mpsc::Receiver<PendingRequest>) {
        while let Some(request) = rx.recv().await {
            if self.shutting_down.load(Ordering::SeqCst) {
                let _ = request.respond.send(Err(AccordError::Shutdown));
                continue;
            }

            let result = self
                .execute(&request.route, request.body.as_ref(), &request.headers)
                .await;
            let _ = request.respond.send(result);
        }
        tracing::debug!("REST pipeline worker stopped");
    }

    async fn execute(
        &self,
        route: &Route,
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> AccordResult<Value> {
        // A transient transport failure and a 429 each get one internal
        // retry, budgeted independently
        let mut transport_retried = false;
        let mut rate_limit_retried = false;

        loop {
            self.limiter.wait_until_clear(&route.bucket).await;
            self.limiter.record_request(&route.bucket);

            let response = match self.transport(route, body, headers).await {
                Ok(response) => response,
                Err(e) if !transport_retried => {
                    tracing::warn!(route = %route.bucket, error = %e, "Transport error, retrying");
                    transport_retried = true;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let status = response.status();
            let response_headers = response.headers().clone();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| AccordError::Transport(e.to_string()))?;

            // Header-driven bucket update happens for every response; the
            // 429 branch layers its own backoff on top of it
            let update = RateLimitUpdate::from_headers(&response_headers);
            if let Some(update) = &update {
                self.limiter.update_from_response(&route.bucket, update);
            }

            if status.is_success() || status.as_u16() < 400 {
                if bytes.is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_slice(&bytes)
                    .map_err(|e| AccordError::Protocol(format!("invalid response JSON: {e}")));
            }

            let body_json: Option<Value> = serde_json::from_slice(&bytes).ok();
            let message = body_json
                .as_ref()
                .and_then(|v| v.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                });

            match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = update
                        .as_ref()
                        .and_then(|u| u.retry_after)
                        .or_else(|| {
                            body_json
                                .as_ref()
                                .and_then(|v| v.get("retry_after"))
                                .and_then(Value::as_f64)
                        })
                        .unwrap_or(1.0);
                    let global = update.as_ref().map(|u| u.global).unwrap_or(false)
                        || body_json
                            .as_ref()
                            .and_then(|v| v.get("global"))
                            .and_then(Value::as_bool)
                            .unwrap_or(false);

                    let wait = std::time::Duration::from_secs_f64(retry_after.max(0.0));
                    if global {
                        self.limiter.set_global_backoff(wait);
                    } else {
                        self.limiter.set_route_backoff(&route.bucket, wait);
                    }

                    if !rate_limit_retried {
                        tracing::warn!(
                            route = %route.bucket,
                            retry_after = retry_after,
                            global = global,
                            "Rate limited, retrying once"
                        );
                        rate_limit_retried = true;
                        continue;
                    }
                    return Err(AccordError::RateLimited { retry_after });
                }
                StatusCode::UNAUTHORIZED => return Err(AccordError::Authentication(message)),
                StatusCode::FORBIDDEN => return Err(AccordError::Permission(message)),
                _ => {
                    return Err(AccordError::Http {
                        status: status.as_u16(),
                        message,
                    })
                }
            }
        }
    }

    async fn transport(
        &self,
        route: &Route,
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> AccordResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, route.path);
        let mut builder = self
            .http
            .request(route.method.clone(), &url)
            .header("Authorization", &self.authorization)
            .header("User-Agent", &self.user_agent)
            .header("Content-Type", "application/json");

        // Caller headers override the defaults
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        if let Some(body) = body {
            builder = builder.json(body);
        }

        builder
            .send()
            .await
            .map_err(|e| AccordError::Transport(e.to_string()))
    }
}
