//! Session facade tying the feed transports to the write endpoints.

use crate::push::PushChannelConfig;
use crate::store::{FeedStatus, FeedStore};
use crate::supervisor::{SupervisorConfig, TransportSupervisor};
use crate::ConnectionState;
use backend_api::FeedApiClient;
use codec::LogEntry;
use common::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Configuration for one live feed session.
#[derive(Debug, Clone)]
pub struct FeedSessionConfig {
    /// Base URL of the storefront REST backend.
    pub api_url: String,
    /// Push endpoint URL.
    pub push_url: String,
    /// Poll cadence while the push channel is not open.
    pub active_poll_interval: Duration,
    /// Poll cadence while push is open; `None` stops the poller then.
    pub idle_poll_interval: Option<Duration>,
    /// Push channel tuning.
    pub push: PushChannelConfig,
}

impl FeedSessionConfig {
    pub fn new(api_url: impl Into<String>, push_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            push_url: push_url.into(),
            active_poll_interval: crate::poller::ACTIVE_POLL_INTERVAL,
            idle_poll_interval: Some(Duration::from_secs(5)),
            push: PushChannelConfig::default(),
        }
    }
}

/// One viewer's live feed session.
///
/// Owns the store, both transports and the backend client. Instances are
/// fully isolated; any number of sessions can coexist in one process.
pub struct FeedSession {
    store: FeedStore,
    api: FeedApiClient,
    supervisor: TransportSupervisor,
}

impl FeedSession {
    pub fn new(config: FeedSessionConfig) -> Result<Self> {
        let api = FeedApiClient::new(config.api_url)?;
        let store = FeedStore::new();

        let supervisor_config = SupervisorConfig {
            push_url: config.push_url,
            active_poll_interval: config.active_poll_interval,
            idle_poll_interval: config.idle_poll_interval,
            push: config.push,
        };
        let supervisor = TransportSupervisor::new(
            store.clone(),
            Arc::new(api.clone()),
            supervisor_config,
        );

        Ok(Self {
            store,
            api,
            supervisor,
        })
    }

    /// Start delivery: polling immediately, push asynchronously.
    pub fn start(&self) {
        self.supervisor.initialize();
    }

    /// After any successful write, one sync pulse closes the gap before
    /// the next scheduled poll or push delivery brings the write back.
    /// Pulse failures are logged, never surfaced: the write succeeded
    /// and the regular cadence guarantees eventual delivery.
    async fn pulse_after_write(&self) {
        if let Err(e) = self.supervisor.pulse().await {
            warn!("Sync pulse failed: {}", e);
        }
    }

    /// Send a chat message and pulse.
    pub async fn send_message(&self, author: &str, body: &str) -> Result<()> {
        self.api.post_message(author, body).await?;
        self.pulse_after_write().await;
        Ok(())
    }

    /// Send a reaction and pulse.
    pub async fn send_reaction(&self, author: &str, reaction_glyph: &str) -> Result<()> {
        self.api.post_reaction(author, reaction_glyph).await?;
        self.pulse_after_write().await;
        Ok(())
    }

    /// Place an order and pulse.
    pub async fn place_order(&self, product_id: &str, quantity: u32) -> Result<()> {
        self.api.post_order(product_id, quantity).await?;
        self.pulse_after_write().await;
        Ok(())
    }

    /// Owned copy of the current event log, safe from render paths.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.store.snapshot()
    }

    /// Current replace-only status values.
    pub fn status(&self) -> FeedStatus {
        self.store.status()
    }

    /// Current push connection state, e.g. for a soft "reconnecting"
    /// indicator in the UI.
    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.connection_state()
    }

    /// Stop both transports and release every timer.
    pub async fn shutdown(&self) {
        self.supervisor.teardown().await;
    }
}
