//! Wire types for agent chat sessions.
//!
//! This crate defines the REST bodies exchanged with the chat server and the
//! typed frames pushed over its two event-stream endpoints:
//!
//! - **api**: `/chat/init` and `/chat/message` request/response bodies
//! - **frames**: reply-channel and telemetry-channel frame variants
//! - **kind**: helpers for dotted frame kinds
//!
//! Nothing here performs I/O.

pub mod api;
pub mod frames;
pub mod kind;

pub use api::{ChatAck, ChatRequest, InitSessionRequest, InitSessionResponse, Role};
pub use frames::{
    AgentProcessEvent, ChatContent, ChatFrame, FrameParseError, TelemetryFrame, WireFrame,
};
pub use kind::{kind_name, short_kind};
