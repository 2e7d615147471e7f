//! Shared wire vocabulary for the Pepper relay.
//!
//! This crate defines the connection roles, the structured message envelope
//! exchanged over the WebSocket transport, and the small set of outbound
//! payloads the relay composes itself. Binary payloads carry no envelope and
//! are interpreted by the sender's role (Agent → camera frame, Viewer → audio
//! clip), so they never pass through these types.
//!
//! `pepper-types` is the leaf of the workspace dependency graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request path that identifies the robot-side connection.
pub const AGENT_PATH: &str = "/pepper";

/// Sub-protocol token that identifies the robot-side connection when the
/// request path is unavailable.
pub const AGENT_SUBPROTOCOL: &str = "pepper";

/// Role of a transport connection. Fixed for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The single robot connection producing frames and consuming commands.
    Agent,
    /// A human-facing client displaying frames and issuing commands.
    Viewer,
}

impl Role {
    /// Returns the lowercase label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Viewer => "viewer",
        }
    }

    /// Classifies a new connection.
    ///
    /// The request path wins when known: `/pepper` is the Agent, anything
    /// else is a Viewer. Without a path the offered sub-protocols decide, and
    /// the fallback is always Viewer.
    pub fn classify(path: Option<&str>, subprotocols: &[&str]) -> Self {
        match path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(path) if path.trim_end_matches('/') == AGENT_PATH => Self::Agent,
            Some(_) => Self::Viewer,
            None if subprotocols
                .iter()
                .any(|p| p.trim().eq_ignore_ascii_case(AGENT_SUBPROTOCOL)) =>
            {
                Self::Agent
            }
            None => Self::Viewer,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `type` field of a structured message.
///
/// Unknown types are preserved rather than rejected so newer peers keep
/// working against an older relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    FaceDetection,
    Speech,
    Command,
    Status,
    Ping,
    Other(String),
}

impl MessageKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "face_detection" => Self::FaceDetection,
            "speech" => Self::Speech,
            "command" => Self::Command,
            "status" => Self::Status,
            "ping" => Self::Ping,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::FaceDetection => "face_detection",
            Self::Speech => "speech",
            Self::Command => "command",
            Self::Status => "status",
            Self::Ping => "ping",
            Self::Other(other) => other,
        }
    }
}

/// Errors raised while reading a structured message.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("message has no string `type` field")]
    MissingType,
}

/// A parsed structured message.
///
/// Keeps the raw text so commands can be forwarded verbatim and the original
/// JSON value so handlers can read optional fields such as `action`, `text`
/// and `source`.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: MessageKind,
    pub body: Value,
    pub raw: String,
}

impl Envelope {
    /// Parses a text frame into an envelope.
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let body: Value = serde_json::from_str(raw)?;
        let kind = body
            .as_object()
            .ok_or(EnvelopeError::NotAnObject)?
            .get("type")
            .and_then(Value::as_str)
            .map(MessageKind::parse)
            .ok_or(EnvelopeError::MissingType)?;

        Ok(Self {
            kind,
            body,
            raw: raw.to_string(),
        })
    }

    /// Returns a string field of the message body, if present.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.body.get(name).and_then(Value::as_str)
    }

    pub fn action(&self) -> Option<&str> {
        self.str_field("action")
    }
}

/// Process-wide feature flags. Changed only through explicit enable/disable
/// calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureToggles {
    pub face_detection_enabled: bool,
    pub mic_enabled: bool,
}

/// `{"type": "speech", "action": "say", "text": ...}` sent to the Agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SayCommand {
    pub text: String,
}

impl SayCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Serializes the command for the transport.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "type": "speech",
            "action": "say",
            "text": self.text,
        })
        .to_string()
    }
}

/// Face-detection toggle state reported back to a Viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleStatus {
    Enabled,
    Disabled,
}

/// `{"type": "face_detection", "status": "enabled" | "disabled"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceDetectionAck {
    pub status: ToggleStatus,
}

impl FaceDetectionAck {
    pub fn new(enabled: bool) -> Self {
        let status = if enabled {
            ToggleStatus::Enabled
        } else {
            ToggleStatus::Disabled
        };
        Self { status }
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "type": "face_detection",
            "status": self.status,
        })
        .to_string()
    }
}

/// Reply to an Agent `ping`.
pub const PONG: &str = r#"{"type":"pong"}"#;
