//! Test helpers
//!
//! A scripted local gateway: speaks the handshake, acks heartbeats, and
//! lets tests inject dispatch events through the full client stack.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// A local WebSocket server speaking the gateway handshake
///
/// Every accepted connection gets HELLO, answers IDENTIFY or RESUME with
/// the matching dispatch, and acknowledges heartbeats. Events injected via
/// [`MockGateway::dispatch`] reach every live connection with increasing
/// sequence numbers.
pub struct MockGateway {
    url: String,
    inject: broadcast::Sender<(String, Value)>,
    sessions_started: Arc<AtomicU64>,
}

impl MockGateway {
    /// Bind on an ephemeral port and start accepting connections
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (inject, _) = broadcast::channel(64);
        let sessions_started = Arc::new(AtomicU64::new(0));

        let inject_accept = inject.clone();
        let counter = sessions_started.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let inject_rx = inject_accept.subscribe();
                let counter = counter.clone();
                tokio::spawn(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if let Err(e) = serve_connection(stream, inject_rx).await {
                        // Connection teardown races are expected in tests
                        let _ = e;
                    }
                });
            }
        });

        Ok(Self {
            url: format!("ws://{addr}"),
            inject,
            sessions_started,
        })
    }

    /// The ws:// URL to hand to the client as a gateway override
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a dispatch event to every live connection
    pub fn dispatch(&self, event: &str, data: Value) {
        let _ = self.inject.send((event.to_string(), data));
    }

    /// How many WebSocket sessions have been accepted
    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::SeqCst)
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    mut inject: broadcast::Receiver<(String, Value)>,
) -> Result<()> {
    let mut ws = accept_async(stream).await?;
    ws.send(Message::Text(
        r#"{"op":10,"d":{"heartbeat_interval":45000}}"#.into(),
    ))
    .await?;

    // First client frame: IDENTIFY (op 2) or RESUME (op 6)
    let first = ws
        .next()
        .await
        .ok_or_else(|| anyhow::anyhow!("client hung up before auth"))??;
    let auth: Value = serde_json::from_str(first.to_text()?)?;
    let mut seq = 0u64;

    match auth["op"].as_u64() {
        Some(2) => {
            let shard = auth["d"]["shard"][0].as_u64().unwrap_or(0);
            seq += 1;
            let ready = serde_json::json!({
                "op": 0, "t": "READY", "s": seq,
                "d": {
                    "v": 10,
                    "session_id": format!("mock-session-{shard}"),
                    "resume_gateway_url": null,
                    "user": {"id": "1", "username": "mock-bot", "bot": true},
                },
            });
            ws.send(Message::Text(ready.to_string().into())).await?;
        }
        Some(6) => {
            seq = auth["d"]["seq"].as_u64().unwrap_or(0);
            seq += 1;
            let resumed = serde_json::json!({"op": 0, "t": "RESUMED", "s": seq, "d": null});
            ws.send(Message::Text(resumed.to_string().into())).await?;
        }
        other => anyhow::bail!("unexpected auth opcode: {other:?}"),
    }

    loop {
        tokio::select! {
            injected = inject.recv() => {
                let Ok((event, data)) = injected else { break };
                seq += 1;
                let dispatch = serde_json::json!({"op": 0, "t": event, "s": seq, "d": data});
                if ws.send(Message::Text(dispatch.to_string().into())).await.is_err() {
                    break;
                }
            }
            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let payload: Value = serde_json::from_str(&text)?;
                        if payload["op"] == 1 {
                            ws.send(Message::Text(r#"{"op":11,"d":null}"#.into())).await?;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    Ok(())
}
