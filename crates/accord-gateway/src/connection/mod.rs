//! Gateway connection
//!
//! One WebSocket session end-to-end: state machine, session identity,
//! heartbeating, compressed-stream decoding, and payload demultiplex.

mod compression;
#[allow(clippy::module_inception)]
mod connection;
mod session;
mod state;

pub use compression::Inflater;
pub use connection::{ConnectOptions, GatewayConnection, SessionEnd};
pub use session::SessionIdentity;
pub use state::ConnectionState;
