//! REST client for the storefront backend.
//!
//! Covers the two surfaces this subsystem touches: the full-collection
//! read used by the poller, and the fire-and-forget write endpoints whose
//! completion triggers a sync pulse.

pub mod client;

pub use client::{CollectionSource, FeedApiClient};
