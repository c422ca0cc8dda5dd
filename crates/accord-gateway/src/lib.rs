//! # accord-gateway
//!
//! WebSocket gateway session engine: per-shard protocol state machines with
//! heartbeating, sequence tracking, session resume, compressed-stream
//! decoding, exponential-backoff reconnection, and a shard manager that
//! enforces identify-concurrency limits.

pub mod connection;
pub mod protocol;
pub mod reconnect;
pub mod shard;

pub use connection::{ConnectOptions, ConnectionState, GatewayConnection, SessionEnd, SessionIdentity};
pub use protocol::{CloseAction, GatewayPayload, OpCode};
pub use reconnect::{ReconnectController, ReconnectDecision};
pub use shard::{shard_for_guild, ShardCommand, ShardConfig, ShardEvent, ShardManager};
