//! Agent chat client with a live telemetry feed.
//!
//! A conversation with a backend agent runs over three connections: a REST
//! handshake that creates the conversation, a server-push stream carrying the
//! assistant's replies, and a second stream carrying the agent's execution
//! telemetry. This crate keeps them consistent.
//!
//! - **push**: the generic reconnecting [`PushChannel`](push::PushChannel),
//!   its transport seam and the SSE transport
//! - **telemetry**: [`TelemetryLog`](telemetry::TelemetryLog), the append-only
//!   telemetry feed
//! - **conversation**: [`ConversationChannel`](conversation::ConversationChannel),
//!   the reply stream
//! - **session**: [`SessionManager`](session::SessionManager), which owns the
//!   lifecycle and history
//! - **api**: the REST client
//! - **config**, **credential**, **error**: supporting types

pub mod api;
pub mod config;
pub mod conversation;
pub mod credential;
pub mod error;
pub mod push;
pub mod session;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use api::{ChatApi, HttpChatApi};
pub use config::ClientConfig;
pub use credential::{Credential, Identity};
pub use error::{ApiError, ConfigError, SessionError};
pub use push::{ConnectionState, SseTransport};
pub use session::{LifecycleState, SessionEvent, SessionManager, SessionSnapshot};
