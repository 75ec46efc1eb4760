//! The deliberation hub: broadcast pub/sub plus the depth guard, bounded
//! history, and ledger projection that keep a runaway publish chain from
//! looping forever or growing memory without bound.
//!
//! A recursion guard drops an event once publish nesting reaches ten deep,
//! a history ring is capped at 1,000 entries, and a side-table of
//! event-type -> ledger-mutation rules projects select events onto the
//! dual ledger (`FACT_DISCOVERED` adds a fact, `QUERY_RAISED`/
//! `QUERY_RESOLVED` manage the open-question queue,
//! `CODE_WRITTEN`/`TEST_PASSED`/`TEST_FAILED` record an iteration), all
//! layered on top of a `tokio::broadcast` channel for live-stream
//! subscribers.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::types::Event;
use crate::ledger::DualLedger;

/// A registered typed-callback subscriber: an opaque handle and the closure
/// to invoke.
type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Token returned by [`EventBus::subscribe_callback`], needed to
/// [`EventBus::unsubscribe`] later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

/// Maximum nested `publish` depth before an event is dropped rather than
/// risking unbounded recursion (e.g. a ledger projection that itself
/// publishes).
const MAX_PUBLISH_DEPTH: usize = 10;

/// Maximum number of events retained in the in-memory history ring.
const MAX_HISTORY: usize = 1000;

/// Channel capacity for the broadcast stream.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("failed to persist event: {0}")]
    PersistFailed(String),

    #[error("channel closed")]
    ChannelClosed,
}

pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// The hub: publishes events to subscribers, projects them onto an
/// attached ledger, and keeps a bounded replay history.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    history: Mutex<VecDeque<Event>>,
    publish_depth: AtomicUsize,
    ledger: Option<Arc<Mutex<DualLedger>>>,
    #[cfg(feature = "heavy-state")]
    store: Option<Arc<crate::state::store::StateStore>>,
    callbacks: Mutex<HashMap<String, Vec<(u64, Callback)>>>,
    next_handle: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(MAX_HISTORY)),
            publish_depth: AtomicUsize::new(0),
            ledger: None,
            #[cfg(feature = "heavy-state")]
            store: None,
            callbacks: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Register a typed callback for one event type, dispatched in
    /// registration order every time a matching event is published. Runs
    /// alongside the broadcast stream, not instead of it — a caller that
    /// wants a `Stream`-style subscription still uses [`EventBus::subscribe`].
    ///
    /// The callback runs inline on the publishing thread; a callback that
    /// panics is isolated with `catch_unwind` so it cannot take down the
    /// publisher or other subscribers.
    pub fn subscribe_callback<F>(&self, event_type: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let mut callbacks = self.callbacks.lock().expect("callback table lock poisoned");
        callbacks
            .entry(event_type.to_string())
            .or_default()
            .push((handle, Arc::new(callback)));
        SubscriptionHandle(handle)
    }

    /// Removes a callback previously registered with `subscribe_callback`.
    /// A no-op if the handle is unknown or already removed.
    pub fn unsubscribe(&self, event_type: &str, handle: SubscriptionHandle) {
        let mut callbacks = self.callbacks.lock().expect("callback table lock poisoned");
        if let Some(subs) = callbacks.get_mut(event_type) {
            subs.retain(|(h, _)| *h != handle.0);
        }
    }

    fn dispatch_callbacks(&self, event: &Event) {
        let subs: Vec<Callback> = {
            let callbacks = self.callbacks.lock().expect("callback table lock poisoned");
            callbacks
                .get(event.event_type())
                .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for callback in subs {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(event_type = event.event_type(), "callback subscriber panicked, isolating");
            }
        }
    }

    /// Attach a ledger that events project onto (facts, queries, iterations).
    pub fn with_ledger(mut self, ledger: Arc<Mutex<DualLedger>>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    #[cfg(feature = "heavy-state")]
    pub fn with_persistence(mut self, store: Arc<crate::state::store::StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event: records history, projects onto the ledger,
    /// persists if configured, and broadcasts to subscribers.
    ///
    /// Publish nesting past [`MAX_PUBLISH_DEPTH`] drops the event and logs
    /// an error instead of recursing or panicking — a ledger-mutation
    /// callback that itself publishes cannot wedge the hub.
    pub fn publish(&self, event: Event) -> EventBusResult<()> {
        let depth = self.publish_depth.fetch_add(1, Ordering::SeqCst) + 1;
        let result = if depth >= MAX_PUBLISH_DEPTH {
            error!(
                event_type = event.event_type(),
                depth, "publish depth limit reached, dropping event"
            );
            Ok(())
        } else {
            self.publish_inner(event)
        };
        self.publish_depth.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn publish_inner(&self, event: Event) -> EventBusResult<()> {
        let event_type = event.event_type();

        self.push_history(event.clone());
        self.project_onto_ledger(&event);
        self.dispatch_callbacks(&event);

        #[cfg(feature = "heavy-state")]
        if let Some(store) = &self.store {
            let timestamp_nanos = event.timestamp().timestamp_nanos_opt().unwrap_or(0);
            let event_id = Event::new_id();
            if let Err(e) = store.put_event(timestamp_nanos, &event_id, &event) {
                warn!(event_type, "failed to persist event: {}", e);
                return Err(EventBusError::PersistFailed(e.to_string()));
            }
        }

        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "event published");
            }
            Err(_) => {
                debug!(event_type, "event published (no receivers)");
            }
        }
        Ok(())
    }

    fn push_history(&self, event: Event) {
        let mut history = self.history.lock().expect("history lock poisoned");
        if history.len() >= MAX_HISTORY {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Mutate the attached ledger according to the event's type. Errors
    /// inside ledger mutation never propagate to the publisher: a bad
    /// projection should not take down the event that triggered it.
    fn project_onto_ledger(&self, event: &Event) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        let mut ledger = ledger.lock().expect("ledger lock poisoned");

        match event {
            Event::FactDiscovered { key, value, .. } => {
                ledger.task.add_fact(key.clone(), value.clone());
            }
            Event::QueryRaised { query, .. } => {
                ledger.task.add_query(query.clone());
            }
            Event::QueryResolved { query, resolution, .. } => {
                ledger.task.resolve_query(query, resolution.clone());
            }
            Event::CodeWritten { summary, .. } => {
                ledger.progress.record_iteration(true, "code_written", summary.clone());
            }
            Event::TestPassed { summary, .. } => {
                ledger.progress.record_iteration(true, "test_passed", summary.clone());
            }
            Event::TestFailed { failure_summary, .. } => {
                ledger
                    .progress
                    .record_iteration(false, "test_failed", failure_summary.clone());
            }
            _ => {}
        }
    }

    /// Subscribe to the live broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }

    /// Most recent `limit` events from the bounded history ring.
    pub fn get_recent_events(&self, limit: usize) -> Vec<Event> {
        let history = self.history.lock().expect("history lock poisoned");
        history.iter().rev().take(limit).cloned().collect()
    }

    /// String dump of the attached ledger's full context, or empty when
    /// no ledger is attached.
    pub fn get_context(&self) -> String {
        let Some(ledger) = &self.ledger else {
            return String::new();
        };
        ledger.lock().expect("ledger lock poisoned").get_full_context()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
pub struct EventFilter {
    pub thread_id: Option<String>,
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self {
            thread_id: None,
            event_types: None,
        }
    }

    pub fn thread(mut self, thread_id: &str) -> Self {
        self.thread_id = Some(thread_id.to_string());
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref tid) = self.thread_id {
            if event.thread_id() != tid {
                return false;
            }
        }
        if let Some(ref types) = self.event_types {
            if !types.contains(&event.event_type().to_string()) {
                return false;
            }
        }
        true
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<Event>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<Event>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

pub trait EventBusExt {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fact_event(thread_id: &str, key: &str, value: &str) -> Event {
        Event::FactDiscovered {
            thread_id: thread_id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            discovered_by: "tester".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(fact_event("t1", "k", "v")).unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "info.fact_discovered");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(fact_event("t1", "k", "v")).unwrap();

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.event_type(), e2.event_type());
    }

    #[test]
    fn test_event_filter_by_thread_and_type() {
        let filter = EventFilter::new()
            .thread("thread-1")
            .types(vec!["task.created", "task.completed"]);

        let matching = Event::TaskCreated {
            thread_id: "thread-1".to_string(),
            task_id: "task-1".to_string(),
            goal: "ship it".to_string(),
            timestamp: Utc::now(),
        };
        let wrong_thread = Event::TaskCreated {
            thread_id: "thread-2".to_string(),
            task_id: "task-2".to_string(),
            goal: "ship it".to_string(),
            timestamp: Utc::now(),
        };
        let wrong_type = fact_event("thread-1", "k", "v");

        assert!(filter.matches(&matching));
        assert!(!filter.matches(&wrong_thread));
        assert!(!filter.matches(&wrong_type));
    }

    #[test]
    fn test_history_is_capped_and_fifo() {
        let bus = EventBus::new();
        for i in 0..(MAX_HISTORY + 10) {
            bus.publish(fact_event("t1", "k", &i.to_string())).unwrap();
        }
        let history = bus.get_recent_events(MAX_HISTORY + 50);
        assert_eq!(history.len(), MAX_HISTORY);
    }

    #[test]
    fn test_publish_depth_guard_drops_without_panic() {
        let bus = EventBus::new();
        bus.publish_depth.store(MAX_PUBLISH_DEPTH, Ordering::SeqCst);
        let result = bus.publish(fact_event("t1", "k", "v"));
        assert!(result.is_ok(), "depth guard should drop, not error, the caller");
        bus.publish_depth.store(0, Ordering::SeqCst);
    }

    #[test]
    fn test_ledger_projection_fact_discovered() {
        let ledger = Arc::new(Mutex::new(DualLedger::new("t1", "goal")));
        let bus = EventBus::new().with_ledger(ledger.clone());

        bus.publish(fact_event("t1", "owner", "alice")).unwrap();

        let ledger = ledger.lock().unwrap();
        assert_eq!(ledger.task.known_facts.get("owner"), Some(&"alice".to_string()));
    }

    #[test]
    fn test_ledger_projection_query_lifecycle() {
        let ledger = Arc::new(Mutex::new(DualLedger::new("t1", "goal")));
        let bus = EventBus::new().with_ledger(ledger.clone());

        bus.publish(Event::QueryRaised {
            thread_id: "t1".to_string(),
            query: "what is the deadline?".to_string(),
            raised_by: "agent-a".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(ledger.lock().unwrap().task.pending_queries.len(), 1);

        bus.publish(Event::QueryResolved {
            thread_id: "t1".to_string(),
            query: "what is the deadline?".to_string(),
            resolution: "Friday".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();
        assert!(ledger.lock().unwrap().task.pending_queries.is_empty());
    }

    #[test]
    fn test_ledger_projection_test_failed_increments_stagnation() {
        let ledger = Arc::new(Mutex::new(DualLedger::new("t1", "goal")));
        let bus = EventBus::new().with_ledger(ledger.clone());

        bus.publish(Event::TestFailed {
            thread_id: "t1".to_string(),
            test_command: "cargo test".to_string(),
            failure_summary: "1 failed".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();

        assert_eq!(ledger.lock().unwrap().progress.stagnation_count, 1);
    }

    #[test]
    fn test_get_context_dumps_attached_ledger() {
        let ledger = Arc::new(Mutex::new(DualLedger::new("t1", "ship it")));
        let bus = EventBus::new().with_ledger(ledger);

        bus.publish(fact_event("t1", "owner", "alice")).unwrap();

        let context = bus.get_context();
        assert!(context.contains("ship it"));
        assert!(context.contains("owner: alice"));
    }

    #[test]
    fn test_get_context_empty_without_ledger() {
        let bus = EventBus::new();
        assert_eq!(bus.get_context(), "");
    }

    #[test]
    fn test_callback_subscriber_receives_matching_events() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.subscribe_callback("info.fact_discovered", move |event| {
            seen_clone.lock().unwrap().push(event.event_type().to_string());
        });

        bus.publish(fact_event("t1", "k", "v")).unwrap();
        bus.publish(Event::TaskCreated {
            thread_id: "t1".to_string(),
            task_id: "task-1".to_string(),
            goal: "ship it".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), ["info.fact_discovered"]);
    }

    #[test]
    fn test_unsubscribe_stops_further_dispatch() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handle = bus.subscribe_callback("info.fact_discovered", move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(fact_event("t1", "k", "v")).unwrap();
        bus.unsubscribe("info.fact_discovered", handle);
        bus.publish(fact_event("t1", "k", "v")).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_panic_is_isolated() {
        let bus = EventBus::new();
        bus.subscribe_callback("info.fact_discovered", |_| panic!("boom"));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe_callback("info.fact_discovered", move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let result = bus.publish(fact_event("t1", "k", "v"));
        assert!(result.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
