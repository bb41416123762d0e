//! Typed frames pushed over the event-stream endpoints.
//!
//! Each endpoint gets a closed enum over the kinds it is known to emit plus an
//! `Unknown` catch-all, so new server-side kinds decode successfully and the
//! consumer decides what to do with them. Only malformed payloads are errors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::kind::{kind_name, short_kind};

/// Reply-channel kind carrying assistant content.
pub const MESSAGE_KIND: &str = "MessageOutputChannelEvent";
/// Reply-channel kind carrying a raw content chunk.
pub const CONTENT_KIND: &str = "ContentOutputChannelEvent";
/// Reply-channel kind carrying agent progress text.
pub const PROGRESS_KIND: &str = "ProgressOutputChannelEvent";
/// Reply-channel kind carrying agent log lines.
pub const LOGGING_KIND: &str = "LoggingOutputChannelEvent";
/// Telemetry kind carrying one agent process event.
pub const PROCESS_EVENT_KIND: &str = "agent-process-event";

/// A frame type that can be decoded from an event-stream message.
pub trait WireFrame: Sized + Clone + std::fmt::Debug + Send + 'static {
    /// Decode `data` received under the event name `kind`.
    fn decode(kind: &str, data: &str) -> Result<Self, FrameParseError>;
}

/// Frame decoding errors. Never fatal to the connection.
#[derive(Debug, Error)]
pub enum FrameParseError {
    /// Payload is not JSON.
    #[error("frame '{kind}' is not valid JSON: {source}")]
    InvalidJson {
        kind: String,
        source: serde_json::Error,
    },

    /// Payload is JSON but does not match the kind's shape.
    #[error("frame '{kind}' has an unexpected shape: {reason}")]
    InvalidShape { kind: String, reason: String },
}

// ============================================================================
// Reply channel
// ============================================================================

/// Frames pushed on the per-conversation reply stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatFrame {
    /// Server acknowledged the stream.
    Connected {
        process_id: Option<String>,
        message: Option<String>,
    },

    /// Assistant reply.
    Message {
        process_id: Option<String>,
        message: ChatContent,
    },

    /// Raw content chunk.
    Content {
        process_id: Option<String>,
        content: String,
    },

    /// Progress note from the agent.
    Progress {
        process_id: Option<String>,
        message: String,
    },

    /// Agent log line.
    Logging {
        process_id: Option<String>,
        message: String,
    },

    /// Any kind this client does not know.
    Unknown { kind: String, payload: Value },
}

/// Content of a reply frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContent {
    #[serde(default)]
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl ChatFrame {
    /// Reply text, if this frame carries a non-empty assistant reply.
    pub fn reply_content(&self) -> Option<&str> {
        match self {
            Self::Message { message, .. } if !message.content.is_empty() => {
                Some(message.content.as_str())
            }
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    #[serde(default)]
    process_id: Option<String>,
    message: ChatContent,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentBody {
    #[serde(default)]
    process_id: Option<String>,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextBody {
    #[serde(default)]
    process_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl WireFrame for ChatFrame {
    fn decode(kind: &str, data: &str) -> Result<Self, FrameParseError> {
        let name = kind_name(kind);

        if name.eq_ignore_ascii_case("connected") {
            let body = match serde_json::from_str::<Value>(data) {
                Ok(value) if value.is_object() => shape::<TextBody>(kind, value)?,
                _ => TextBody {
                    process_id: None,
                    message: text_message(data),
                },
            };
            return Ok(Self::Connected {
                process_id: body.process_id,
                message: body.message,
            });
        }

        let value = parse_json(kind, data)?;
        let frame = match name {
            MESSAGE_KIND => {
                let body: MessageBody = shape(kind, value)?;
                Self::Message {
                    process_id: body.process_id,
                    message: body.message,
                }
            }
            CONTENT_KIND => {
                let body: ContentBody = shape(kind, value)?;
                Self::Content {
                    process_id: body.process_id,
                    content: body.content,
                }
            }
            PROGRESS_KIND | LOGGING_KIND => {
                let body: TextBody = shape(kind, value)?;
                let message = body.message.ok_or_else(|| FrameParseError::InvalidShape {
                    kind: kind.to_string(),
                    reason: "missing field `message`".to_string(),
                })?;
                if name == PROGRESS_KIND {
                    Self::Progress {
                        process_id: body.process_id,
                        message,
                    }
                } else {
                    Self::Logging {
                        process_id: body.process_id,
                        message,
                    }
                }
            }
            _ => Self::Unknown {
                kind: kind.to_string(),
                payload: value,
            },
        };
        Ok(frame)
    }
}

// ============================================================================
// Telemetry channel
// ============================================================================

/// Frames pushed on the per-process telemetry stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryFrame {
    /// Sent once when the stream is established.
    Connected { message: Option<String> },

    /// One agent process event.
    Process(AgentProcessEvent),

    /// Any kind this client does not know.
    Unknown { kind: String, payload: Value },
}

impl TelemetryFrame {
    /// Short label for display.
    pub fn label(&self) -> String {
        match self {
            Self::Connected { .. } => "connected".to_string(),
            Self::Process(event) => event.short_type(),
            Self::Unknown { kind, .. } => short_kind(kind),
        }
    }
}

/// An event emitted by the agent while it works.
///
/// `timestamp` is informational only. Receipt order is the ordering key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProcessEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    pub timestamp: String,
    pub event_type: String,
    /// Remaining free-form fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentProcessEvent {
    /// Display form of the event type.
    pub fn short_type(&self) -> String {
        short_kind(&self.event_type)
    }

    fn from_map(kind: &str, mut map: Map<String, Value>) -> Result<Self, FrameParseError> {
        let missing = |field: &str| FrameParseError::InvalidShape {
            kind: kind.to_string(),
            reason: format!("missing field `{field}`"),
        };

        let event_type = match map.remove("eventType") {
            Some(Value::String(s)) => {
                map.remove("type");
                s
            }
            _ => match map.remove("type") {
                Some(Value::String(s)) => s,
                _ => return Err(missing("eventType")),
            },
        };

        let timestamp = match map.remove("timestamp") {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(missing("timestamp")),
        };

        let process_id = match map.remove("processId") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };

        Ok(Self {
            process_id,
            timestamp,
            event_type,
            extra: map,
        })
    }
}

impl WireFrame for TelemetryFrame {
    fn decode(kind: &str, data: &str) -> Result<Self, FrameParseError> {
        let name = kind_name(kind);

        if name.eq_ignore_ascii_case("connected") {
            let message = match serde_json::from_str::<Value>(data) {
                Ok(Value::Object(map)) => map
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                Ok(Value::String(s)) => Some(s),
                _ => text_message(data),
            };
            return Ok(Self::Connected { message });
        }

        let value = parse_json(kind, data)?;
        if name == PROCESS_EVENT_KIND {
            return match value {
                Value::Object(map) => Ok(Self::Process(AgentProcessEvent::from_map(kind, map)?)),
                other => Err(FrameParseError::InvalidShape {
                    kind: kind.to_string(),
                    reason: format!("expected an object, got {other}"),
                }),
            };
        }

        Ok(Self::Unknown {
            kind: kind.to_string(),
            payload: value,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_json(kind: &str, data: &str) -> Result<Value, FrameParseError> {
    serde_json::from_str(data).map_err(|source| FrameParseError::InvalidJson {
        kind: kind.to_string(),
        source,
    })
}

fn shape<T: serde::de::DeserializeOwned>(kind: &str, value: Value) -> Result<T, FrameParseError> {
    serde_json::from_value(value).map_err(|e| FrameParseError::InvalidShape {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

fn text_message(data: &str) -> Option<String> {
    let trimmed = data.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
