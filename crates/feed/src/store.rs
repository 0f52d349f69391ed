//! Shared in-memory feed store with fuzzy duplicate matching.
//!
//! The single source of truth the UI renders from. Written by exactly
//! two callers (the push channel's event handler and the poller's tick
//! handler); read from render paths at any time via owned snapshots.

use codec::{FeedEvent, LogEntry, OrderCounters, TickerState};
use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Two deliveries of the same logical entry are merged when their
/// timestamps fall within this window and their content matches.
const DEDUP_WINDOW_MS: i64 = 1000;

/// Replace-only feed state: each field overwrites, never accumulates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedStatus {
    pub viewer_count: u64,
    pub order_counters: OrderCounters,
    pub ticker: TickerState,
}

/// Store statistics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub log_len: usize,
    pub total_appended: u64,
    pub total_deduped: u64,
    pub total_reconciles: u64,
}

/// Shared store for the accumulating event log and replace-only status.
///
/// Cheap to clone; all clones share the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct FeedStore {
    inner: Arc<FeedStoreInner>,
}

#[derive(Debug, Default)]
struct FeedStoreInner {
    log: RwLock<Vec<LogEntry>>,
    status: RwLock<FeedStatus>,
    total_appended: AtomicU64,
    total_deduped: AtomicU64,
    total_reconciles: AtomicU64,
}

/// Fuzzy membership test: recognizes the same logical entry delivered
/// twice via different transports, without a globally agreed identifier.
///
/// Chat messages match on equal ids when both carry one, or on exact
/// author/body equality with timestamps inside the window. Order notices
/// never carry an id and match on rendered text inside the window.
fn is_duplicate(existing: &LogEntry, candidate: &LogEntry) -> bool {
    match (existing, candidate) {
        (LogEntry::Chat(a), LogEntry::Chat(b)) => {
            if let (Some(x), Some(y)) = (&a.id, &b.id) {
                if x == y {
                    return true;
                }
            }
            a.author == b.author
                && a.body == b.body
                && (a.occurred_at - b.occurred_at).abs() < DEDUP_WINDOW_MS
        }
        (LogEntry::Order(a), LogEntry::Order(b)) => {
            a.rendered_text == b.rendered_text
                && (a.occurred_at - b.occurred_at).abs() < DEDUP_WINDOW_MS
        }
        _ => false,
    }
}

impl FeedStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single entry unless the fuzzy test finds a match.
    /// Returns whether the entry was appended.
    pub fn accept(&self, entry: LogEntry) -> bool {
        let mut log = self.inner.log.write().unwrap();
        if log.iter().any(|existing| is_duplicate(existing, &entry)) {
            self.inner.total_deduped.fetch_add(1, Ordering::Relaxed);
            counter!("feed_dedup_hits_total").increment(1);
            return false;
        }
        log.push(entry);
        self.inner.total_appended.fetch_add(1, Ordering::Relaxed);
        counter!("feed_log_appended_total").increment(1);
        true
    }

    /// Swap the accumulating log wholesale, keeping the server-provided
    /// order verbatim. Not a merge: the collection endpoint is the
    /// eventual source of truth, and any push-only entry not yet in the
    /// snapshot reappears in the next one.
    pub fn replace_all(&self, entries: Vec<LogEntry>) {
        let mut log = self.inner.log.write().unwrap();
        *log = entries;
    }

    /// Owned copy of the current log, safe to call from render paths.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.inner.log.read().unwrap().clone()
    }

    /// Current replace-only status values.
    pub fn status(&self) -> FeedStatus {
        self.inner.status.read().unwrap().clone()
    }

    /// Apply a single event delivered by the push channel.
    /// Returns whether it changed the store.
    pub fn apply_push(&self, event: FeedEvent) -> bool {
        counter!("feed_events_received_total", "transport" => "push").increment(1);
        match event {
            FeedEvent::Chat(m) => self.accept(LogEntry::Chat(m)),
            FeedEvent::OrderNotice(n) => self.accept(LogEntry::Order(n)),
            other => {
                self.apply_status(other);
                true
            }
        }
    }

    /// Reconcile against a freshly fetched full collection: the
    /// accumulating kinds replace the log wholesale, the replace-only
    /// kinds overwrite current status.
    pub fn reconcile(&self, events: Vec<FeedEvent>) {
        counter!("feed_events_received_total", "transport" => "poll")
            .increment(events.len() as u64);
        let mut entries = Vec::with_capacity(events.len());
        for event in events {
            match event {
                FeedEvent::Chat(m) => entries.push(LogEntry::Chat(m)),
                FeedEvent::OrderNotice(n) => entries.push(LogEntry::Order(n)),
                other => self.apply_status(other),
            }
        }
        self.replace_all(entries);
        self.inner.total_reconciles.fetch_add(1, Ordering::Relaxed);
    }

    fn apply_status(&self, event: FeedEvent) {
        let mut status = self.inner.status.write().unwrap();
        match event {
            FeedEvent::ViewerCount(v) => status.viewer_count = v.count,
            FeedEvent::OrderCounters(c) => status.order_counters = c,
            FeedEvent::Ticker(t) => status.ticker = t,
            // Log kinds are routed through accept/replace_all, never here.
            FeedEvent::Chat(_) | FeedEvent::OrderNotice(_) => {}
        }
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            log_len: self.inner.log.read().unwrap().len(),
            total_appended: self.inner.total_appended.load(Ordering::Relaxed),
            total_deduped: self.inner.total_deduped.load(Ordering::Relaxed),
            total_reconciles: self.inner.total_reconciles.load(Ordering::Relaxed),
        }
    }
}
