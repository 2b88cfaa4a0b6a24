//! SignalR JSON hub protocol framing.
//!
//! Every record is a JSON document terminated by the `0x1E` record separator;
//! one WebSocket text frame may carry several records.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u8 = 1;
const PING: u8 = 6;
const CLOSE: u8 = 7;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed hub record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invocation record has no target")]
    MissingTarget,
    #[error("server rejected handshake: {0}")]
    HandshakeRejected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation { target: String, arguments: Vec<Value> },
    Ping,
    Close { error: Option<String>, allow_reconnect: bool },
    /// Completions, stream items and other record types we never request.
    Other(u8),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    #[serde(rename = "type")]
    kind: u8,
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    error: Option<String>,
    allow_reconnect: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    error: Option<String>,
}

/// First record sent after the WebSocket opens.
pub fn handshake_request() -> String {
    format!(r#"{{"protocol":"json","version":1}}{RECORD_SEPARATOR}"#)
}

/// Keep-alive record.
pub fn ping_record() -> String {
    format!(r#"{{"type":{PING}}}{RECORD_SEPARATOR}"#)
}

/// Split a text frame into its non-empty records.
pub fn split_records(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|r| !r.is_empty())
}

/// Check the server's handshake answer.
pub fn parse_handshake(record: &str) -> Result<(), ProtocolError> {
    let response: HandshakeResponse = serde_json::from_str(record)?;
    match response.error {
        Some(error) => Err(ProtocolError::HandshakeRejected(error)),
        None => Ok(()),
    }
}

pub fn parse_record(record: &str) -> Result<HubMessage, ProtocolError> {
    let raw: RawRecord = serde_json::from_str(record)?;
    Ok(match raw.kind {
        INVOCATION => HubMessage::Invocation {
            target: raw.target.ok_or(ProtocolError::MissingTarget)?,
            arguments: raw.arguments,
        },
        PING => HubMessage::Ping,
        CLOSE => HubMessage::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect.unwrap_or(true),
        },
        other => HubMessage::Other(other),
    })
}
