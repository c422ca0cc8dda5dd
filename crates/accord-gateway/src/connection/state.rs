//! Connection state machine

use serde::{Deserialize, Serialize};

/// Gateway connection state
///
/// Transitions follow the protocol handshake: a socket opens into
/// `AwaitingHello`, authenticates via `Identifying` or `Resuming`, and
/// settles in `Ready` until closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No socket
    Disconnected,
    /// Transport connect in progress
    Connecting,
    /// Socket open, waiting for HELLO
    AwaitingHello,
    /// IDENTIFY sent, waiting for READY
    Identifying,
    /// RESUME sent, waiting for RESUMED
    Resuming,
    /// Session established; outbound sends accepted
    Ready,
    /// Explicit close in progress
    Closing,
    /// Dropped; the reconnection controller owns the next step
    Reconnecting,
}

impl ConnectionState {
    /// Whether a socket exists in this state
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(
            self,
            Self::AwaitingHello | Self::Identifying | Self::Resuming | Self::Ready | Self::Closing
        )
    }

    /// Whether caller-initiated payloads may be sent
    ///
    /// Heartbeat, IDENTIFY, and RESUME are issued by the connection itself
    /// and are exempt.
    #[must_use]
    pub const fn can_send_user_payloads(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether the transition to `next` is part of the protocol handshake
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, AwaitingHello)
                | (AwaitingHello, Identifying)
                | (AwaitingHello, Resuming)
                | (Identifying, Ready)
                | (Resuming, Ready)
                // A rejected resume falls back to a fresh identify
                | (Resuming, Identifying)
                | (_, Reconnecting)
                | (_, Closing)
                | (Closing, Disconnected)
                | (Reconnecting, Connecting)
                | (Connecting, Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::AwaitingHello => "AwaitingHello",
            Self::Identifying => "Identifying",
            Self::Resuming => "Resuming",
            Self::Ready => "Ready",
            Self::Closing => "Closing",
            Self::Reconnecting => "Reconnecting",
        };
        write!(f, "{name}")
    }
}
