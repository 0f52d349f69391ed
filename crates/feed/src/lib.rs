//! Real-time event delivery for the live broadcast view.
//!
//! Two independent transports feed a single shared store: a WebSocket
//! push channel delivering individual events as they occur, and an
//! interval poller fetching the full collection as a correctness
//! backstop. The store's fuzzy duplicate matching makes their overlap
//! harmless. The supervisor never enforces mutual exclusion between
//! them; it only guarantees that at least one is running.

pub mod poller;
pub mod push;
pub mod session;
pub mod store;
pub mod supervisor;

pub use poller::Poller;
pub use push::{ConnectionState, PushChannel, PushChannelConfig};
pub use session::{FeedSession, FeedSessionConfig};
pub use store::{FeedStatus, FeedStore, StoreStats};
pub use supervisor::{SupervisorConfig, TransportSupervisor};
