//! Wire schema and decoder for live feed events.
//!
//! Every payload that reaches the client, pushed over the WebSocket or
//! fetched from the collection endpoint, is decoded here into one of a
//! closed set of typed events before anything else touches it.

pub mod decode;
pub mod schema;

pub use decode::{decode, decode_bytes, DecodeError};
pub use schema::{
    ChatMessage, FeedEvent, LogEntry, OrderCounters, OrderNotice, TickerState, ViewerCount,
};
