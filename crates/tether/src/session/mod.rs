//! Session lifecycle.
//!
//! A session is one server conversation. [`SessionManager`] creates it through
//! the init call, binds the reply and telemetry channels to its id, and owns
//! the message history built from replies.

mod manager;
mod message;

pub use manager::{SessionEvent, SessionManager, SessionSnapshot};
pub use message::{DeliveryState, History, Message, MessageId};

use crate::credential::Identity;

/// `Uninitialized -> Initializing -> Active -> (Failed | Uninitialized)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Initializing,
    Active,
    /// Initialization failed. The caller must start over.
    Failed(String),
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Active => write!(f, "active"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// The live session. `id` is set once per session and never reassigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub id: Option<String>,
    /// Process the telemetry stream is keyed by, when the server reports one.
    pub process_id: Option<String>,
    pub lifecycle: LifecycleState,
    pub identity: Option<Identity>,
}
