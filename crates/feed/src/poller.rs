//! Interval poller and one-shot sync pulse.
//!
//! Pulls the full current event collection on a fixed cadence and
//! reconciles it into the store. The poller is the correctness backstop:
//! it keeps delivery alive when the push channel is down and it is what
//! makes a freshly joined viewer see history at all.

use crate::store::FeedStore;
use backend_api::CollectionSource;
use common::error::Result;
use metrics::counter;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Poll cadence while compensating for an unhealthy push channel.
pub const ACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One fetch-and-reconcile pass. Shared by the interval tick and the
/// sync pulse so the two can never diverge on dedup behavior.
async fn reconcile_once(source: &dyn CollectionSource, store: &FeedStore) -> Result<()> {
    let events = source.fetch_collection().await?;
    store.reconcile(events);
    Ok(())
}

struct PollTask {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Interval-driven full-collection poller.
///
/// Cheap to clone; all clones control the same underlying task.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    source: Arc<dyn CollectionSource>,
    store: FeedStore,
    task: Mutex<Option<PollTask>>,
}

impl Poller {
    pub fn new(source: Arc<dyn CollectionSource>, store: FeedStore) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                source,
                store,
                task: Mutex::new(None),
            }),
        }
    }

    /// Start polling at the given cadence. Idempotent: calling while a
    /// task is already running is a no-op and never creates a second
    /// concurrent interval. The first fetch fires immediately.
    pub fn start(&self, interval: Duration) {
        let mut task = self.inner.task.lock().unwrap();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("Poller already running, ignoring start");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let source = Arc::clone(&self.inner.source);
        let store = self.inner.store.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;  // Prioritize shutdown over the next tick

                    _ = shutdown_rx.recv() => {
                        debug!("Poller stopped");
                        break;
                    }

                    _ = ticker.tick() => {
                        if let Err(e) = reconcile_once(source.as_ref(), &store).await {
                            warn!("Poll fetch failed: {}, retrying next tick", e);
                            counter!("feed_poll_errors_total").increment(1);
                        }
                    }
                }
            }
        });

        *task = Some(PollTask {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the interval task and wait for it to wind down. Idempotent;
    /// a tick in flight finishes before the task exits, so no stale
    /// reconcile can land after this returns.
    pub async fn stop(&self) {
        let task = self.inner.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.shutdown_tx.send(()).await;
            let _ = task.handle.await;
        }
    }

    /// Whether an interval task is currently running.
    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Sync pulse: one immediate fetch-and-reconcile outside the regular
    /// cadence, used right after a local write to close the gap before
    /// the next scheduled tick or push delivery. Best-effort: failures
    /// are reported but never retried here; the regular cadence remains
    /// the guarantee of eventual delivery.
    pub async fn pulse(&self) -> Result<()> {
        counter!("feed_sync_pulses_total").increment(1);
        reconcile_once(self.inner.source.as_ref(), &self.inner.store).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codec::{ChatMessage, FeedEvent};
    use common::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chat(author: &str, body: &str, occurred_at: i64) -> FeedEvent {
        FeedEvent::Chat(ChatMessage {
            id: None,
            author: author.to_string(),
            body: body.to_string(),
            reaction_glyph: None,
            occurred_at,
        })
    }

    /// Fake backend returning a fixed collection and counting fetches.
    struct CountingSource {
        fetches: AtomicUsize,
        collection: Vec<FeedEvent>,
    }

    impl CountingSource {
        fn new(collection: Vec<FeedEvent>) -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
                collection,
            })
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CollectionSource for CountingSource {
        async fn fetch_collection(&self) -> Result<Vec<FeedEvent>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.collection.clone())
        }
    }

    /// Fake backend that fails the first N fetches.
    struct FlakySource {
        fetches: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl CollectionSource for FlakySource {
        async fn fetch_collection(&self) -> Result<Vec<FeedEvent>> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(Error::Generic("backend unavailable".to_string()));
            }
            Ok(vec![chat("ana", "back online", 0)])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let source = CountingSource::new(vec![]);
        let store = FeedStore::new();
        let poller = Poller::new(source.clone(), store);

        poller.start(Duration::from_millis(500));
        poller.start(Duration::from_millis(500));

        // Ticks land at 0, 500, 1000, 1500 and 2000ms. A second interval
        // would roughly double the count.
        tokio::time::sleep(Duration::from_millis(2250)).await;
        assert_eq!(source.fetch_count(), 5);

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_interval() {
        let source = CountingSource::new(vec![]);
        let store = FeedStore::new();
        let poller = Poller::new(source.clone(), store);

        poller.start(Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(750)).await;
        poller.stop().await;
        assert!(!poller.is_running());

        let count_at_stop = source.fetch_count();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(source.fetch_count(), count_at_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let source = CountingSource::new(vec![]);
        let store = FeedStore::new();
        let poller = Poller::new(source.clone(), store);

        poller.start(Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(100)).await;
        poller.stop().await;

        let count = source.fetch_count();
        poller.start(Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(source.fetch_count() > count);
        assert!(poller.is_running());

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_keeps_interval_alive() {
        let source = Arc::new(FlakySource {
            fetches: AtomicUsize::new(0),
            failures: 2,
        });
        let store = FeedStore::new();
        let poller = Poller::new(source.clone(), store.clone());

        poller.start(Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(1250)).await;

        // First two ticks failed, third succeeded and reconciled.
        assert!(source.fetches.load(Ordering::SeqCst) >= 3);
        assert_eq!(store.snapshot().len(), 1);

        poller.stop().await;
    }

    #[tokio::test]
    async fn test_pulse_reconciles_immediately() {
        let source = CountingSource::new(vec![chat("ana", "hi", 0)]);
        let store = FeedStore::new();
        let poller = Poller::new(source.clone(), store.clone());

        // No interval running: the pulse alone must deliver the write.
        poller.pulse().await.unwrap();
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_beats_the_next_tick() {
        // A local write completes right after a tick; the pulse makes it
        // visible well before the next scheduled tick at +500ms.
        let source = CountingSource::new(vec![chat("ana", "hi", 0)]);
        let store = FeedStore::new();
        let poller = Poller::new(source.clone(), store.clone());

        poller.start(Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(80)).await;

        poller.pulse().await.unwrap();
        assert_eq!(store.snapshot().len(), 1);
        // Only the immediate tick and the pulse have fetched so far.
        assert_eq!(source.fetch_count(), 2);

        poller.stop().await;
    }

    #[tokio::test]
    async fn test_pulse_failure_is_reported_not_retried() {
        let source = Arc::new(FlakySource {
            fetches: AtomicUsize::new(0),
            failures: 1,
        });
        let store = FeedStore::new();
        let poller = Poller::new(source.clone(), store);

        assert!(poller.pulse().await.is_err());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_duplicate_reconciled_by_poll() {
        // End to end: push delivers the message with an id at t=50ms, the
        // poll snapshot carries it without one. One entry at every
        // observation point.
        let source = CountingSource::new(vec![chat("A", "hi", 0)]);
        let store = FeedStore::new();
        let poller = Poller::new(source, store.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.apply_push(FeedEvent::Chat(ChatMessage {
            id: Some("m1".to_string()),
            author: "A".to_string(),
            body: "hi".to_string(),
            reaction_glyph: None,
            occurred_at: 0,
        }));
        assert_eq!(store.snapshot().len(), 1);

        poller.start(Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.snapshot().len(), 1);

        poller.stop().await;
    }
}
