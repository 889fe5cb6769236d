use crate::{Alert, DetectionCounts};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const STREAM_PATH: &str = "/ws/stream";
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;

/// Messages the dashboard sends. The backend only ever expects the one
/// readiness handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Start,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Frame {
        data: String,
        detections: DetectionCounts,
    },
    Alert {
        data: Alert,
    },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Frame { .. } => "frame",
            ServerMessage::Alert { .. } => "alert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("message exceeds max size: {size} > {max}")]
    Oversized { size: usize, max: usize },
    #[error("message has no type tag")]
    MissingKind,
    #[error("unknown message type: {0}")]
    UnknownKind(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message encode failed: {0}")]
    Encode(String),
}

pub fn encode_client_message(message: &ClientMessage) -> Result<String, StreamError> {
    serde_json::to_string(message).map_err(|err| StreamError::Encode(err.to_string()))
}

/// Decodes one text message from the push channel. Unknown kinds are reported
/// separately from malformed payloads so callers can log them differently.
pub fn decode_server_message(text: &str, max_bytes: usize) -> Result<ServerMessage, StreamError> {
    if text.len() > max_bytes {
        return Err(StreamError::Oversized {
            size: text.len(),
            max: max_bytes,
        });
    }
    let value: Value =
        serde_json::from_str(text).map_err(|err| StreamError::Malformed(err.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(StreamError::MissingKind)?;
    match kind {
        "frame" | "alert" => {}
        other => return Err(StreamError::UnknownKind(other.to_string())),
    }
    serde_json::from_value(value).map_err(|err| StreamError::Malformed(err.to_string()))
}
