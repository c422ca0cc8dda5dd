//! Gateway connection runtime
//!
//! Runs one WebSocket session: HELLO handshake, identify/resume, heartbeat
//! loop with zombie detection, inbound demultiplex, and outbound sends.
//! Decoded dispatches flow out over a channel; the reconnection decision
//! belongs to the shard runner that owns this connection.

use super::{ConnectionState, Inflater, SessionIdentity};
use crate::protocol::{GatewayPayload, IdentifyPayload, OpCode, ResumePayload};
use crate::shard::{ShardCommand, ShardEvent};
use accord_core::{AccordError, AccordResult, Intents};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Close code sent when the connection zombies out
const ZOMBIE_CLOSE_CODE: u16 = 4000;

/// Consecutive unacknowledged heartbeats before the connection is zombied
const MAX_MISSED_ACKS: u8 = 2;

/// Connection parameters fixed for the lifetime of a shard
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub token: String,
    pub intents: Intents,
    /// `[shard_id, shard_count]` for sharded IDENTIFYs
    pub shard: Option<[u32; 2]>,
    pub compress: bool,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Server closed the socket
    Closed { code: Option<u16>, reason: String },
    /// Two heartbeats went unacknowledged
    Zombied,
    /// Server asked for a reconnect (op 7) or a commanded reconnect
    ReconnectRequested,
    /// Server invalidated the session (op 9)
    InvalidSession { resumable: bool },
    /// Commanded disconnect; the runner should stop
    Disconnected,
    /// Stream ended without a close frame
    StreamEnded,
}

/// One gateway connection and its session identity
pub struct GatewayConnection {
    options: ConnectOptions,
    session: SessionIdentity,
    state_tx: watch::Sender<ConnectionState>,
    reached_ready: bool,
}

impl GatewayConnection {
    /// Create a disconnected connection
    #[must_use]
    pub fn new(options: ConnectOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            options,
            session: SessionIdentity::new(),
            state_tx,
            reached_ready: false,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The session identity
    #[must_use]
    pub fn session(&self) -> &SessionIdentity {
        &self.session
    }

    /// Mutable session identity, for forced re-identifies
    pub fn session_mut(&mut self) -> &mut SessionIdentity {
        &mut self.session
    }

    /// Whether the most recent session reached Ready
    #[must_use]
    pub fn reached_ready(&self) -> bool {
        self.reached_ready
    }

    fn set_state(&mut self, next: ConnectionState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "Unexpected state transition");
        }
        tracing::debug!(from = %current, to = %next, "Connection state changed");
        let _ = self.state_tx.send(next);
    }

    /// Run one session against `url` until it ends
    ///
    /// Dispatch payloads are annotated with `shard_id` and forwarded over
    /// `events`. `commands` carries outbound sends and close requests.
    /// Transport failures return `Err`; protocol-level session endings
    /// return `Ok(SessionEnd)` with the session identity already updated.
    pub async fn run_session(
        &mut self,
        url: &str,
        shard_id: u16,
        events: &mpsc::Sender<ShardEvent>,
        commands: &mut mpsc::Receiver<ShardCommand>,
    ) -> AccordResult<SessionEnd> {
        self.reached_ready = false;
        self.set_state(ConnectionState::Connecting);

        let (ws, _) = connect_async(url).await.map_err(|e| {
            self.set_state(ConnectionState::Disconnected);
            AccordError::Transport(format!("gateway connect failed: {e}"))
        })?;
        let (mut sink, mut stream) = ws.split();
        self.set_state(ConnectionState::AwaitingHello);

        let mut inflater = self.options.compress.then(Inflater::new);

        // The server speaks first: wait for HELLO
        let hello = loop {
            tokio::select! {
                frame = stream.next() => {
                    let Some(text) = self.decode_frame(frame, &mut inflater)? else {
                        continue;
                    };
                    let Ok(payload) = GatewayPayload::from_json(&text) else {
                        tracing::warn!(shard_id, "Dropping unparseable pre-HELLO frame");
                        continue;
                    };
                    if let Some(hello) = payload.as_hello() {
                        break hello;
                    }
                    tracing::warn!(shard_id, op = %payload.op, "Expected HELLO, dropping frame");
                }
                command = commands.recv() => {
                    if matches!(command, Some(ShardCommand::Disconnect) | None) {
                        self.close_socket(&mut sink, 1000, "disconnect").await;
                        self.set_state(ConnectionState::Closing);
                        self.set_state(ConnectionState::Disconnected);
                        return Ok(SessionEnd::Disconnected);
                    }
                }
            }
        };

        let heartbeat_interval = std::time::Duration::from_millis(hello.heartbeat_interval);
        tracing::debug!(shard_id, interval_ms = hello.heartbeat_interval, "Received HELLO");

        // Authenticate: resume when the identity allows it, else identify
        if self.session.is_resumable() {
            let resume = ResumePayload {
                token: self.options.token.clone(),
                session_id: self.session.session_id().unwrap_or_default().to_string(),
                seq: self.session.last_sequence(),
            };
            tracing::info!(
                shard_id,
                session_id = %resume.session_id,
                seq = resume.seq,
                "Resuming session"
            );
            self.send_payload(&mut sink, &GatewayPayload::resume(&resume)).await?;
            self.set_state(ConnectionState::Resuming);
        } else {
            let identify = IdentifyPayload::new(
                self.options.token.clone(),
                self.options.intents,
                self.options.shard,
            );
            tracing::info!(shard_id, "Identifying new session");
            self.send_payload(&mut sink, &GatewayPayload::identify(&identify)).await?;
            self.set_state(ConnectionState::Identifying);
        }

        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        // The first tick completes immediately; heartbeats start one
        // interval after HELLO
        heartbeat.tick().await;
        let mut acked = true;
        let mut missed_acks: u8 = 0;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if !acked {
                        missed_acks += 1;
                        if missed_acks >= MAX_MISSED_ACKS {
                            tracing::warn!(shard_id, "Heartbeat acks missing, connection zombied");
                            self.close_socket(&mut sink, ZOMBIE_CLOSE_CODE, "heartbeat ack timeout").await;
                            self.set_state(ConnectionState::Reconnecting);
                            return Ok(SessionEnd::Zombied);
                        }
                    } else {
                        missed_acks = 0;
                    }
                    let beat = GatewayPayload::heartbeat(self.session.heartbeat_sequence());
                    self.send_payload(&mut sink, &beat).await?;
                    acked = false;
                    tracing::trace!(shard_id, seq = ?self.session.heartbeat_sequence(), "Heartbeat sent");
                }

                command = commands.recv() => {
                    match command {
                        Some(ShardCommand::Send(payload)) => {
                            if self.state().can_send_user_payloads() {
                                self.send_payload(&mut sink, &payload).await?;
                            } else {
                                tracing::warn!(
                                    shard_id,
                                    state = %self.state(),
                                    "Dropping outbound payload on non-Ready connection"
                                );
                            }
                        }
                        Some(ShardCommand::Reconnect { resume }) => {
                            if !resume {
                                self.session.invalidate();
                            }
                            self.close_socket(&mut sink, 1000, "reconnect").await;
                            self.set_state(ConnectionState::Reconnecting);
                            return Ok(SessionEnd::ReconnectRequested);
                        }
                        Some(ShardCommand::Disconnect) | None => {
                            self.close_socket(&mut sink, 1000, "disconnect").await;
                            self.set_state(ConnectionState::Closing);
                            self.set_state(ConnectionState::Disconnected);
                            return Ok(SessionEnd::Disconnected);
                        }
                    }
                }

                frame = stream.next() => {
                    match frame {
                        None => {
                            self.set_state(ConnectionState::Reconnecting);
                            return Ok(SessionEnd::StreamEnded);
                        }
                        Some(Ok(Message::Close(close))) => {
                            let (code, reason) = match close {
                                Some(frame) => (
                                    Some(u16::from(frame.code)),
                                    frame.reason.to_string(),
                                ),
                                None => (None, String::new()),
                            };
                            tracing::info!(shard_id, code = ?code, reason = %reason, "Gateway closed connection");
                            self.set_state(ConnectionState::Reconnecting);
                            return Ok(SessionEnd::Closed { code, reason });
                        }
                        frame => {
                            let Some(text) = self.decode_frame(frame, &mut inflater)? else {
                                continue;
                            };
                            if let Some(end) = self
                                .handle_payload(&text, shard_id, events, &mut sink, &mut acked, &mut missed_acks)
                                .await?
                            {
                                return Ok(end);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Decode one WebSocket frame into payload text
    ///
    /// Returns None for frames that carry no complete payload (pings,
    /// partial compressed messages, malformed data).
    fn decode_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
        inflater: &mut Option<Inflater>,
    ) -> AccordResult<Option<String>> {
        match frame {
            Some(Ok(Message::Text(text))) => Ok(Some(text.to_string())),
            Some(Ok(Message::Binary(data))) => match inflater {
                Some(inflater) => match inflater.inflate(&data) {
                    Ok(Some(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => Ok(Some(text)),
                        Err(e) => {
                            tracing::warn!(error = %e, "Dropping non-UTF-8 gateway message");
                            Ok(None)
                        }
                    },
                    Ok(None) => Ok(None),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping undecodable compressed frame");
                        Ok(None)
                    }
                },
                None => {
                    tracing::warn!("Dropping binary frame on uncompressed connection");
                    Ok(None)
                }
            },
            Some(Ok(_)) => Ok(None),
            Some(Err(e)) => Err(AccordError::Transport(format!("websocket error: {e}"))),
            None => Err(AccordError::Transport("websocket stream ended".into())),
        }
    }

    /// Demultiplex one inbound payload
    ///
    /// Returns Some when the payload ends the session.
    #[allow(clippy::too_many_arguments)]
    async fn handle_payload(
        &mut self,
        text: &str,
        shard_id: u16,
        events: &mpsc::Sender<ShardEvent>,
        sink: &mut WsSink,
        acked: &mut bool,
        missed_acks: &mut u8,
    ) -> AccordResult<Option<SessionEnd>> {
        let payload = match GatewayPayload::from_json(text) {
            Ok(payload) => payload,
            Err(e) => {
                // Protocol errors never abort the loop
                tracing::warn!(shard_id, error = %e, "Dropping unparseable gateway payload");
                return Ok(None);
            }
        };

        if let Some(sequence) = payload.s {
            self.session.record_dispatch(sequence);
        }

        match payload.op {
            OpCode::Dispatch => {
                let event = payload.t.clone().unwrap_or_default();

                if let Some(ready) = payload.as_ready() {
                    self.session
                        .establish(ready.session_id.clone(), ready.resume_gateway_url.clone());
                    self.set_state(ConnectionState::Ready);
                    self.reached_ready = true;
                    tracing::info!(shard_id, session_id = %ready.session_id, "Shard ready");
                } else if event == "RESUMED" {
                    self.set_state(ConnectionState::Ready);
                    self.reached_ready = true;
                    tracing::info!(shard_id, "Session resumed");
                }

                let shard_event = ShardEvent {
                    shard_id,
                    event,
                    data: payload.d.unwrap_or(Value::Null),
                };
                if events.send(shard_event).await.is_err() {
                    tracing::info!(shard_id, "Event receiver dropped, closing connection");
                    self.close_socket(sink, 1000, "consumer gone").await;
                    self.set_state(ConnectionState::Closing);
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(Some(SessionEnd::Disconnected));
                }
            }
            OpCode::HeartbeatAck => {
                *acked = true;
                *missed_acks = 0;
                tracing::trace!(shard_id, "Heartbeat acknowledged");
            }
            OpCode::Heartbeat => {
                // Server-requested heartbeat: respond immediately
                let beat = GatewayPayload::heartbeat(self.session.heartbeat_sequence());
                self.send_payload(sink, &beat).await?;
            }
            OpCode::Reconnect => {
                tracing::info!(shard_id, "Server requested reconnect");
                self.set_state(ConnectionState::Reconnecting);
                return Ok(Some(SessionEnd::ReconnectRequested));
            }
            OpCode::InvalidSession => {
                let resumable = payload.invalid_session_resumable();
                tracing::warn!(shard_id, resumable, "Session invalidated");
                if !resumable {
                    self.session.invalidate();
                }
                self.set_state(ConnectionState::Reconnecting);
                return Ok(Some(SessionEnd::InvalidSession { resumable }));
            }
            OpCode::Hello => {
                // Late HELLO after the handshake: nothing to do
            }
            other => {
                tracing::warn!(shard_id, op = %other, "Dropping unexpected outbound-only opcode");
            }
        }

        Ok(None)
    }

    async fn send_payload(&self, sink: &mut WsSink, payload: &GatewayPayload) -> AccordResult<()> {
        let json = payload
            .to_json()
            .map_err(|e| AccordError::Protocol(format!("payload serialization failed: {e}")))?;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| AccordError::Transport(format!("websocket send failed: {e}")))
    }

    async fn close_socket(&self, sink: &mut WsSink, code: u16, reason: &'static str) {
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: reason.into(),
        };
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            tracing::debug!(error = %e, "Close frame send failed");
        }
        let _ = sink.close().await;
    }
}

impl std::fmt::Debug for GatewayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConnection")
            .field("state", &self.state())
            .field("session_id", &self.session.session_id())
            .field("last_sequence", &self.session.last_sequence())
            .finish()
    }
}
