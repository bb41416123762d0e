//! REST request and response bodies.
//!
//! The server speaks camelCase JSON. Initializing a session yields the ids the
//! two push endpoints are keyed by; posting a message only yields an
//! acknowledgement, the reply arrives later over the chat stream.

use serde::{Deserialize, Serialize};

/// Body of `POST /chat/init`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSessionRequest {
    /// Existing conversation to resume. The server creates a new one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Response of `POST /chat/init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSessionResponse {
    /// Server-issued conversation id. May be empty on a misbehaving server,
    /// callers must treat an empty id as unusable.
    #[serde(default)]
    pub conversation_id: String,

    /// Agent process backing the conversation, used to key telemetry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
}

impl InitSessionResponse {
    /// Id the telemetry stream should be opened against.
    pub fn telemetry_id(&self) -> &str {
        match self.process_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.conversation_id,
        }
    }
}

/// Body of `POST /chat/message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: String,
}

/// Acknowledgement returned by `POST /chat/message`. Never carries the answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAck {
    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}
