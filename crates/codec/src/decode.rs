//! Decoding of raw inbound payloads into typed events.

use crate::schema::FeedEvent;
use serde_json::Value;
use thiserror::Error;

/// Why a raw payload could not be decoded.
///
/// Decode errors are never fatal anywhere in the pipeline: callers log
/// and discard the frame.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unknown event kind: {0}")]
    UnknownKind(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

const KNOWN_KINDS: &[&str] = &[
    "chat_message",
    "order_notification",
    "viewer_count",
    "order_counter_update",
    "ticker_update",
];

/// Decode a raw JSON payload into a typed event.
///
/// Pure function: no side effects, no logging. Unknown `kind` values and
/// known kinds with missing or mistyped fields map to distinct error
/// variants so callers can count them separately.
pub fn decode(raw: &str) -> Result<FeedEvent, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;

    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::MalformedPayload("missing string `kind` field".into()))?;

    if !KNOWN_KINDS.contains(&kind) {
        return Err(DecodeError::UnknownKind(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| DecodeError::MalformedPayload(e.to_string()))
}

/// Decode a raw byte payload (e.g. a binary WebSocket frame).
pub fn decode_bytes(raw: &[u8]) -> Result<FeedEvent, DecodeError> {
    let text =
        std::str::from_utf8(raw).map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;
    decode(text)
}
