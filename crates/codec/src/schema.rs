//! Typed event definitions matching the backend wire shape.

use serde::{Deserialize, Serialize};

/// A chat message posted by a viewer or the host.
///
/// `id` is optional: the push transport assigns one, the collection
/// endpoint's snapshots may omit it. Absence is legal and handled by the
/// store's fuzzy duplicate matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub author: String,
    pub body: String,
    /// Optional reaction emoji rendered alongside the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_glyph: Option<String>,
    /// Creation time in epoch milliseconds.
    pub occurred_at: i64,
}

/// A system notification about an order, pre-formatted by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotice {
    pub rendered_text: String,
    /// Creation time in epoch milliseconds.
    pub occurred_at: i64,
}

/// Current concurrent viewer count. Replaces, never accumulates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewerCount {
    pub count: u64,
}

/// Running order counters for the broadcast. Replaces, never accumulates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OrderCounters {
    pub session_orders: u64,
    pub total_orders: u64,
}

/// Running ticker text shown under the video. Replaces, never accumulates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickerState {
    pub text: String,
    pub enabled: bool,
}

/// The closed set of events the backend produces, discriminated on the
/// wire by a `kind` field with the payload under `data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data")]
pub enum FeedEvent {
    #[serde(rename = "chat_message")]
    Chat(ChatMessage),
    #[serde(rename = "order_notification")]
    OrderNotice(OrderNotice),
    #[serde(rename = "viewer_count")]
    ViewerCount(ViewerCount),
    #[serde(rename = "order_counter_update")]
    OrderCounters(OrderCounters),
    #[serde(rename = "ticker_update")]
    Ticker(TickerState),
}

/// An entry of the accumulating event log. Chat messages and order
/// notices are the only kinds that accumulate; everything else replaces.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum LogEntry {
    Chat(ChatMessage),
    Order(OrderNotice),
}

impl LogEntry {
    /// Creation time of the underlying event in epoch milliseconds.
    pub fn occurred_at(&self) -> i64 {
        match self {
            LogEntry::Chat(m) => m.occurred_at,
            LogEntry::Order(n) => n.occurred_at,
        }
    }
}

impl FeedEvent {
    /// Split off the accumulating part of the event, if any.
    pub fn into_log_entry(self) -> Option<LogEntry> {
        match self {
            FeedEvent::Chat(m) => Some(LogEntry::Chat(m)),
            FeedEvent::OrderNotice(n) => Some(LogEntry::Order(n)),
            _ => None,
        }
    }
}
