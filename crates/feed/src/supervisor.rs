//! Transport supervisor: arbitration between push and poll delivery.
//!
//! Two independent supervised processes plus a dedup layer that makes
//! their overlap harmless. This is deliberately not a strict state
//! machine forcing exactly one active transport. The one hard
//! guarantee: at least one transport is running once initialized.

use crate::poller::{Poller, ACTIVE_POLL_INTERVAL};
use crate::push::{ConnectionState, PushChannel, PushChannelConfig};
use crate::store::FeedStore;
use backend_api::CollectionSource;
use common::ControlCommand;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Push endpoint URL (fixed, pre-configured).
    pub push_url: String,
    /// Poll cadence while the push channel is not open.
    pub active_poll_interval: Duration,
    /// Poll cadence while the push channel is open. `None` stops the
    /// poller entirely while push is healthy; the default keeps it
    /// running relaxed, since overlap costs requests, not correctness.
    pub idle_poll_interval: Option<Duration>,
    /// Push channel tuning.
    pub push: PushChannelConfig,
}

impl SupervisorConfig {
    pub fn new(push_url: impl Into<String>) -> Self {
        Self {
            push_url: push_url.into(),
            active_poll_interval: ACTIVE_POLL_INTERVAL,
            idle_poll_interval: Some(Duration::from_secs(5)),
            push: PushChannelConfig::default(),
        }
    }
}

struct SupervisorRuntime {
    push_command_tx: mpsc::Sender<ControlCommand>,
    push_handle: JoinHandle<()>,
    monitor_handle: JoinHandle<()>,
    state_rx: watch::Receiver<ConnectionState>,
}

/// Owns the push task, the poller and the monitor reacting to channel
/// health. One instance per session; fully isolated, no global state.
pub struct TransportSupervisor {
    store: FeedStore,
    poller: Poller,
    config: SupervisorConfig,
    runtime: Mutex<Option<SupervisorRuntime>>,
}

impl TransportSupervisor {
    pub fn new(
        store: FeedStore,
        source: Arc<dyn CollectionSource>,
        config: SupervisorConfig,
    ) -> Self {
        let poller = Poller::new(source, store.clone());
        Self {
            store,
            poller,
            config,
            runtime: Mutex::new(None),
        }
    }

    /// Start delivery. Idempotent: a second call is a no-op.
    ///
    /// The poller starts immediately and unconditionally: push
    /// establishment is slower and less certain at cold start, and an
    /// empty event log during that gap is the failure mode to avoid.
    /// The push channel is opened asynchronously, independent of it.
    pub fn initialize(&self) {
        let mut runtime = self.runtime.lock().unwrap();
        if runtime.is_some() {
            info!("Supervisor already initialized");
            return;
        }

        self.poller.start(self.config.active_poll_interval);

        let (push_command_tx, push_command_rx) = mpsc::channel::<ControlCommand>(4);
        let (push, state_rx) = PushChannel::new(
            self.config.push_url.clone(),
            self.store.clone(),
            self.config.push.clone(),
            push_command_rx,
        );

        let push_handle = tokio::spawn(push.run());

        let monitor_handle = tokio::spawn(monitor_loop(
            state_rx.clone(),
            self.poller.clone(),
            self.config.active_poll_interval,
            self.config.idle_poll_interval,
        ));

        *runtime = Some(SupervisorRuntime {
            push_command_tx,
            push_handle,
            monitor_handle,
            state_rx,
        });

        info!("Supervisor initialized: polling active, push connecting");
    }

    /// Current push connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.runtime
            .lock()
            .unwrap()
            .as_ref()
            .map(|r| r.state_rx.borrow().clone())
            .unwrap_or(ConnectionState::Idle)
    }

    /// Whether the poller currently runs an interval.
    pub fn polling_active(&self) -> bool {
        self.poller.is_running()
    }

    /// One-shot fetch-and-reconcile after a local write.
    pub async fn pulse(&self) -> common::error::Result<()> {
        self.poller.pulse().await
    }

    /// Stop both transports and release every timer. Safe to call more
    /// than once; a teardown mid-backoff cancels the pending retry.
    pub async fn teardown(&self) {
        let runtime = self.runtime.lock().unwrap().take();

        if let Some(runtime) = runtime {
            // The monitor goes first: the push channel's final state
            // transition must not restart the poller mid-teardown.
            runtime.monitor_handle.abort();
            let _ = runtime.monitor_handle.await;

            let _ = runtime
                .push_command_tx
                .send(ControlCommand::Shutdown)
                .await;
            if let Err(e) = runtime.push_handle.await {
                if !e.is_cancelled() {
                    error!("Push task failed: {:?}", e);
                }
            }
        }

        self.poller.stop().await;

        info!("Supervisor torn down");
    }
}

/// React to push channel health: any close guarantees active-cadence
/// polling; an open channel relaxes (or stops) the poller.
async fn monitor_loop(
    mut state_rx: watch::Receiver<ConnectionState>,
    poller: Poller,
    active_interval: Duration,
    idle_interval: Option<Duration>,
) {
    while state_rx.changed().await.is_ok() {
        let state = state_rx.borrow_and_update().clone();
        match state {
            ConnectionState::Open => match idle_interval {
                Some(interval) => {
                    poller.stop().await;
                    poller.start(interval);
                    info!("Push open: poller relaxed to {:?}", interval);
                }
                None => {
                    poller.stop().await;
                    info!("Push open: poller stopped");
                }
            },
            ConnectionState::Closed { permanent, .. } => {
                poller.stop().await;
                poller.start(active_interval);
                if permanent {
                    info!("Push parked permanently: polling-only from here on");
                }
            }
            ConnectionState::Idle | ConnectionState::Connecting => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codec::FeedEvent;
    use common::error::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EmptySource {
        fetches: AtomicUsize,
    }

    impl EmptySource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CollectionSource for EmptySource {
        async fn fetch_collection(&self) -> Result<Vec<FeedEvent>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    fn test_config() -> SupervisorConfig {
        // Nothing listens on this port; push will fail and park.
        let mut config = SupervisorConfig::new("ws://127.0.0.1:9/feed");
        config.push.connect_timeout = Duration::from_millis(100);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_starts_poller_immediately() {
        let store = FeedStore::new();
        let source = EmptySource::new();
        let supervisor = TransportSupervisor::new(store, source.clone(), test_config());

        supervisor.initialize();
        assert!(supervisor.polling_active());

        // Idempotent: a second call must not spin up anything new.
        supervisor.initialize();
        assert!(supervisor.polling_active());

        tokio::time::sleep(Duration::from_millis(1250)).await;
        assert!(source.fetches.load(Ordering::SeqCst) >= 3);

        supervisor.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_survives_permanent_push_failure() {
        let store = FeedStore::new();
        let source = EmptySource::new();
        let supervisor = TransportSupervisor::new(store, source, test_config());

        supervisor.initialize();

        let mut state_rx = {
            let runtime = supervisor.runtime.lock().unwrap();
            runtime.as_ref().unwrap().state_rx.clone()
        };
        while !state_rx.borrow_and_update().is_permanently_closed() {
            state_rx.changed().await.unwrap();
        }

        // Give the monitor a chance to react to the final transition.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(supervisor.polling_active());

        supervisor.teardown().await;
        assert!(!supervisor.polling_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_relaxes_then_reactivates_poller() {
        let source = EmptySource::new();
        let store = FeedStore::new();
        let poller = Poller::new(source.clone(), store);
        poller.start(Duration::from_millis(500));

        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let monitor = tokio::spawn(monitor_loop(
            state_rx,
            poller.clone(),
            Duration::from_millis(500),
            Some(Duration::from_secs(5)),
        ));

        // Push opens: the poller keeps running at the relaxed cadence.
        state_tx.send(ConnectionState::Open).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(poller.is_running());

        let relaxed_count = source.fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        // 5s cadence: no further tick inside a 2s window.
        assert_eq!(source.fetches.load(Ordering::SeqCst), relaxed_count);

        // Push drops: active cadence resumes.
        state_tx
            .send(ConnectionState::Closed {
                reason: "read error".to_string(),
                permanent: false,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(source.fetches.load(Ordering::SeqCst) > relaxed_count);

        monitor.abort();
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_can_stop_poller_outright() {
        let source = EmptySource::new();
        let store = FeedStore::new();
        let poller = Poller::new(source.clone(), store);
        poller.start(Duration::from_millis(500));

        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let monitor = tokio::spawn(monitor_loop(
            state_rx,
            poller.clone(),
            Duration::from_millis(500),
            None,
        ));

        state_tx.send(ConnectionState::Open).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!poller.is_running());

        monitor.abort();
    }
}
