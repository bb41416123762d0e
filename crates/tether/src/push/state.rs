//! Connection state and channel identity.

use serde::Serialize;

/// Which endpoint a push channel is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Assistant replies for one conversation.
    Conversation,
    /// Agent telemetry for one process.
    Telemetry,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conversation => write!(f, "conversation"),
            Self::Telemetry => write!(f, "telemetry"),
        }
    }
}

/// Identifies one connection attempt of one channel.
///
/// Every signal a transport emits carries the key it was opened with. A
/// channel only acts on signals whose key equals its current key, so anything
/// still queued from a closed or superseded connection is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub kind: ChannelKind,
    pub session_id: String,
    /// Session epoch, bumped by the owner on every initialize.
    pub epoch: u64,
    /// Connection generation, bumped by the channel on open, reconnect and close.
    pub generation: u64,
}

/// Connection state of one push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Transport failed. `terminal` is set once the reconnect policy gives up.
    Errored { reason: String, terminal: bool },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Errored with no automatic retry pending.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Errored { terminal: true, .. })
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Errored {
                reason,
                terminal: false,
            } => write!(f, "errored ({reason}), retrying"),
            Self::Errored {
                reason,
                terminal: true,
            } => write!(f, "errored ({reason})"),
        }
    }
}
