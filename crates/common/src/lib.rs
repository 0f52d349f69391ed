//! Common types and utilities shared across the live feed client.

pub mod error;
pub mod messages;

pub use error::Error;
pub use messages::ControlCommand;
