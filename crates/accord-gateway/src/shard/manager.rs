//! Shard manager
//!
//! Launches shards within the identify-concurrency budget, keeps their
//! runners alive through reconnects, and routes operations to the owning
//! shard. One shard's failure never stops the manager.

use super::{shard_for_guild, ShardCommand, ShardConfig, ShardEvent};
use crate::connection::{ConnectOptions, ConnectionState, GatewayConnection, SessionEnd};
use crate::protocol::{self, GatewayPayload};
use crate::reconnect::{ReconnectController, ReconnectDecision, ReconnectStop};
use accord_core::{validate, AccordError, AccordResult, Snowflake};
use accord_rest::RestClient;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Aggregate event channel depth
const EVENT_BUFFER_SIZE: usize = 1024;

/// Per-shard command channel depth
const COMMAND_BUFFER_SIZE: usize = 32;

/// Bookkeeping shared between a shard's runner and the manager
struct ShardRecord {
    reconnect_attempts: AtomicU32,
    connected_at: Mutex<Option<Instant>>,
    resumable: AtomicBool,
    sequence: std::sync::atomic::AtomicU64,
}

impl ShardRecord {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            reconnect_attempts: AtomicU32::new(0),
            connected_at: Mutex::new(None),
            resumable: AtomicBool::new(false),
            sequence: std::sync::atomic::AtomicU64::new(0),
        })
    }
}

struct ShardHandle {
    command_tx: mpsc::Sender<ShardCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    stop: ReconnectStop,
    record: Arc<ShardRecord>,
    task: JoinHandle<()>,
}

/// Orchestrates N gateway connections
pub struct ShardManager {
    config: ShardConfig,
    rest: Arc<RestClient>,
    shards: DashMap<u16, ShardHandle>,
    shard_count: AtomicU16,
    event_tx: mpsc::Sender<ShardEvent>,
    running: AtomicBool,
}

impl ShardManager {
    /// Create a manager; the receiver carries every shard's events
    #[must_use]
    pub fn new(config: ShardConfig, rest: Arc<RestClient>) -> (Arc<Self>, mpsc::Receiver<ShardEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let manager = Arc::new(Self {
            config,
            rest,
            shards: DashMap::new(),
            shard_count: AtomicU16::new(0),
            event_tx,
            running: AtomicBool::new(false),
        });
        (manager, event_rx)
    }

    /// Resolve the shard count and launch every shard
    ///
    /// Consults /gateway/bot unless a gateway URL override is configured.
    /// When the session-start budget is exhausted, start blocks until the
    /// budget resets. Shards launch in id order, `max_concurrency` at a
    /// time, with the identify delay between batches.
    pub async fn start(&self) -> AccordResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AccordError::Validation("shard manager already running".into()));
        }

        let (base_url, recommended, limit) = match &self.config.gateway_url {
            Some(url) => (url.clone(), 1u32, None),
            None => {
                let info = self.rest.get_gateway_bot().await?;
                (info.url, info.shards, Some(info.session_start_limit))
            }
        };

        let shard_count = if self.config.auto_shard {
            recommended.max(1) as u16
        } else {
            self.config.shard_count.unwrap_or(1)
        };
        validate::shard_count(shard_count)?;
        self.shard_count.store(shard_count, Ordering::SeqCst);

        let max_concurrency = limit
            .as_ref()
            .map(|l| l.max_concurrency.max(1))
            .unwrap_or(1) as usize;

        if let Some(limit) = &limit {
            if limit.remaining < u32::from(shard_count) {
                let wait = Duration::from_millis(limit.reset_after);
                tracing::warn!(
                    remaining = limit.remaining,
                    needed = shard_count,
                    wait_ms = limit.reset_after,
                    "Session start budget exhausted, waiting for reset"
                );
                tokio::time::sleep(wait).await;
            }
        }

        tracing::info!(
            shard_count,
            max_concurrency,
            compress = self.config.compress,
            "Starting shards"
        );

        let ids: Vec<u16> = (0..shard_count).collect();
        for (index, batch) in ids.chunks(max_concurrency).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.identify_delay).await;
            }
            for &shard_id in batch {
                self.launch_shard(shard_id, shard_count, base_url.clone());
            }
        }

        Ok(())
    }

    fn launch_shard(&self, shard_id: u16, total: u16, base_url: String) {
        let options = ConnectOptions {
            token: self.config.token.clone(),
            intents: self.config.intents,
            shard: Some([u32::from(shard_id), u32::from(total)]),
            compress: self.config.compress,
        };

        let connection = GatewayConnection::new(options);
        let state_rx = connection.state_watch();
        let controller = ReconnectController::new(self.config.reconnect.clone());
        let stop = controller.stop_handle();
        let record = ShardRecord::new();

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let task = tokio::spawn(run_shard(
            shard_id,
            base_url,
            self.config.compress,
            connection,
            controller,
            record.clone(),
            self.event_tx.clone(),
            command_rx,
        ));

        self.shards.insert(
            shard_id,
            ShardHandle {
                command_tx,
                state_rx,
                stop,
                record,
                task,
            },
        );

        tracing::info!(shard_id, total, "Shard launched");
    }

    /// Total shard count resolved at start
    #[must_use]
    pub fn shard_count(&self) -> u16 {
        self.shard_count.load(Ordering::SeqCst)
    }

    /// Number of shards currently in the Ready state
    #[must_use]
    pub fn connected_shards(&self) -> usize {
        self.shards
            .iter()
            .filter(|entry| *entry.state_rx.borrow() == ConnectionState::Ready)
            .count()
    }

    /// Current state of one shard
    #[must_use]
    pub fn shard_state(&self, shard_id: u16) -> Option<ConnectionState> {
        self.shards.get(&shard_id).map(|h| *h.state_rx.borrow())
    }

    /// The shard that owns a guild
    #[must_use]
    pub fn shard_for_guild(&self, guild_id: Snowflake) -> u16 {
        shard_for_guild(guild_id, self.shard_count().max(1))
    }

    /// Send a payload on one shard's connection
    ///
    /// # Errors
    /// Validation if the shard is unknown or not Ready; Shutdown if its
    /// runner is gone.
    pub async fn send_to_shard(&self, shard_id: u16, payload: GatewayPayload) -> AccordResult<()> {
        let (state, command_tx) = {
            let handle = self
                .shards
                .get(&shard_id)
                .ok_or_else(|| AccordError::Validation(format!("unknown shard {shard_id}")))?;
            let state = *handle.state_rx.borrow();
            (state, handle.command_tx.clone())
        };

        if !state.can_send_user_payloads() {
            return Err(AccordError::Validation(format!(
                "shard {shard_id} is not ready (state: {state})"
            )));
        }

        command_tx
            .send(ShardCommand::Send(payload))
            .await
            .map_err(|_| AccordError::Shutdown)
    }

    /// Send a guild-scoped payload on the owning shard
    pub async fn send_to_guild(&self, guild_id: Snowflake, payload: GatewayPayload) -> AccordResult<()> {
        let shard_id = self.shard_for_guild(guild_id);
        self.send_to_shard(shard_id, payload).await
    }

    /// Send a payload to every Ready shard, returning how many accepted it
    pub async fn broadcast(&self, payload: GatewayPayload) -> usize {
        let targets: Vec<u16> = self.shards.iter().map(|entry| *entry.key()).collect();
        let mut sent = 0;
        for shard_id in targets {
            if self.send_to_shard(shard_id, payload.clone()).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Disconnect one shard permanently
    pub async fn disconnect_shard(&self, shard_id: u16) -> AccordResult<()> {
        let command_tx = self
            .shards
            .get(&shard_id)
            .map(|h| h.command_tx.clone())
            .ok_or_else(|| AccordError::Validation(format!("unknown shard {shard_id}")))?;
        command_tx
            .send(ShardCommand::Disconnect)
            .await
            .map_err(|_| AccordError::Shutdown)
    }

    /// Drop one shard's connection and reconnect it
    pub async fn reconnect_shard(&self, shard_id: u16, resume: bool) -> AccordResult<()> {
        let command_tx = self
            .shards
            .get(&shard_id)
            .map(|h| h.command_tx.clone())
            .ok_or_else(|| AccordError::Validation(format!("unknown shard {shard_id}")))?;
        command_tx
            .send(ShardCommand::Reconnect { resume })
            .await
            .map_err(|_| AccordError::Shutdown)
    }

    /// Clear every shard's session and reconnect them sequentially with
    /// fresh IDENTIFYs
    pub async fn force_identify_all(&self) -> AccordResult<()> {
        let mut ids: Vec<u16> = self.shards.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();

        for shard_id in ids {
            self.reconnect_shard(shard_id, false).await?;
            tokio::time::sleep(self.config.identify_delay).await;
        }
        Ok(())
    }

    /// Stop every shard: cancel backoff waits, close connections, join tasks
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);

        let ids: Vec<u16> = self.shards.iter().map(|entry| *entry.key()).collect();
        for shard_id in &ids {
            if let Some(handle) = self.shards.get(shard_id) {
                handle.stop.stop();
                let _ = handle.command_tx.send(ShardCommand::Disconnect).await;
            }
        }

        for shard_id in ids {
            if let Some((_, handle)) = self.shards.remove(&shard_id) {
                if let Err(e) = handle.task.await {
                    tracing::warn!(shard_id, error = %e, "Shard task join failed");
                }
            }
        }

        tracing::info!("All shards stopped");
    }

    /// Whether start() has been called and shutdown() has not
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Aggregate statistics for every shard
    #[must_use]
    pub fn statistics(&self) -> Value {
        let mut shards = serde_json::Map::new();
        for entry in self.shards.iter() {
            let handle = entry.value();
            let uptime = handle
                .record
                .connected_at
                .lock()
                .map(|at| at.elapsed().as_secs());

            shards.insert(
                entry.key().to_string(),
                serde_json::json!({
                    "state": *handle.state_rx.borrow(),
                    "resumable": handle.record.resumable.load(Ordering::Relaxed),
                    "reconnect_attempts": handle.record.reconnect_attempts.load(Ordering::Relaxed),
                    "sequence": handle.record.sequence.load(Ordering::Relaxed),
                    "uptime_seconds": uptime,
                }),
            );
        }

        serde_json::json!({
            "total_shards": self.shard_count(),
            "connected_shards": self.connected_shards(),
            "is_running": self.is_running(),
            "shards": shards,
        })
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("shard_count", &self.shard_count())
            .field("connected", &self.connected_shards())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Per-shard runner: one session after another, with backoff between them
#[allow(clippy::too_many_arguments)]
async fn run_shard(
    shard_id: u16,
    base_url: String,
    compress: bool,
    mut connection: GatewayConnection,
    mut controller: ReconnectController,
    record: Arc<ShardRecord>,
    events: mpsc::Sender<ShardEvent>,
    mut commands: mpsc::Receiver<ShardCommand>,
) {
    loop {
        let resume_base = connection
            .session()
            .resume_url()
            .map(str::to_string)
            .filter(|_| connection.session().is_resumable())
            .unwrap_or_else(|| base_url.clone());
        let url = protocol::gateway_url(&resume_base, compress);

        *record.connected_at.lock() = Some(Instant::now());
        let outcome = connection.run_session(&url, shard_id, &events, &mut commands).await;

        record
            .sequence
            .store(connection.session().last_sequence(), Ordering::Relaxed);
        record
            .resumable
            .store(connection.session().is_resumable(), Ordering::Relaxed);
        *record.connected_at.lock() = None;

        if connection.reached_ready() {
            controller.on_connection_restored();
        }

        let decision = match outcome {
            Ok(SessionEnd::Disconnected) => break,
            Ok(SessionEnd::Closed { code, reason }) => {
                tracing::info!(shard_id, code = ?code, reason = %reason, "Shard connection closed");
                controller.decide_close(code, connection.session_mut())
            }
            Ok(SessionEnd::Zombied) | Ok(SessionEnd::StreamEnded) => {
                controller.decide_drop(connection.session_mut())
            }
            Ok(SessionEnd::ReconnectRequested) => ReconnectDecision::Retry {
                delay: Duration::ZERO,
                resume: connection.session().is_resumable(),
            },
            Ok(SessionEnd::InvalidSession { resumable }) => {
                controller.decide_invalid_session(resumable, connection.session_mut())
            }
            Err(e) => {
                tracing::warn!(shard_id, error = %e, "Shard session error");
                controller.decide_drop(connection.session_mut())
            }
        };

        match decision {
            ReconnectDecision::Retry { delay, resume } => {
                record.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    shard_id,
                    delay_ms = delay.as_millis() as u64,
                    resume,
                    "Shard reconnecting"
                );

                if !delay.is_zero() {
                    tokio::select! {
                        completed = controller.wait(delay) => {
                            if !completed {
                                break;
                            }
                        }
                        command = commands.recv() => {
                            match command {
                                Some(ShardCommand::Reconnect { resume }) => {
                                    if !resume {
                                        connection.session_mut().invalidate();
                                    }
                                }
                                Some(ShardCommand::Send(_)) => {
                                    tracing::warn!(shard_id, "Dropping send while reconnecting");
                                }
                                Some(ShardCommand::Disconnect) | None => break,
                            }
                        }
                    }
                }
            }
            ReconnectDecision::Stop(error) => {
                tracing::error!(shard_id, error = %error, "Shard stopped");
                let _ = events
                    .send(ShardEvent {
                        shard_id,
                        event: "SHARD_TERMINATED".to_string(),
                        data: serde_json::json!({ "reason": error.to_string() }),
                    })
                    .await;
                break;
            }
            ReconnectDecision::Abandon => break,
        }
    }

    tracing::info!(shard_id, "Shard runner exited");
}
