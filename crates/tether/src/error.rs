//! Error types for the session layer.
//!
//! Push-channel failures are absent: a dropped stream is represented as
//! [`ConnectionState`](crate::push::ConnectionState), not as an error, and
//! malformed frames are logged and swallowed. A failed post marks its message
//! [`DeliveryState::Failed`](crate::session::DeliveryState::Failed).

use thiserror::Error;

use crate::session::{LifecycleState, MessageId};

/// Errors from the REST API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request could not be sent or the response could not be read.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Init succeeded but yielded no usable conversation id.
    #[error("server returned no conversation id")]
    MissingConversationId,
}

/// Errors surfaced by [`SessionManager`](crate::session::SessionManager).
#[derive(Debug, Error)]
pub enum SessionError {
    /// The init call failed. Fatal to the session; the caller must retry.
    #[error("failed to initialize session: {0}")]
    Initialization(#[source] ApiError),

    /// A command needed an active session.
    #[error("session is not ready (state: {0})")]
    NotReady(LifecycleState),

    /// Blank messages are never posted.
    #[error("message is empty")]
    EmptyMessage,

    /// No retryable user turn with this id exists.
    #[error("no failed message with id {0}")]
    UnknownMessage(MessageId),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
