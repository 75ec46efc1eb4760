//! Event history and replay, backed by the embedded checkpoint store's
//! persisted event column family. Only available when `heavy-state` is
//! enabled — the in-memory bus history (`EventBus::get_recent_events`)
//! covers the non-persistent case.

#![cfg(feature = "heavy-state")]

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::types::Event;
use crate::state::store::SharedStateStore;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("store error: {0}")]
    StoreError(String),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Event history manager for replay and querying
pub struct EventHistory {
    store: SharedStateStore,
}

impl EventHistory {
    pub fn new(store: SharedStateStore) -> Self {
        Self { store }
    }

    pub fn get_events(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> HistoryResult<Vec<Event>> {
        let start_nanos = start.timestamp_nanos_opt().unwrap_or(0);
        let end_nanos = end.timestamp_nanos_opt().unwrap_or(i64::MAX);

        let events: Vec<Event> = self
            .store
            .get_events_range(start_nanos, end_nanos)
            .map_err(|e| HistoryError::StoreError(e.to_string()))?
            .into_iter()
            .map(|(_, event)| event)
            .collect();

        debug!(count = events.len(), "retrieved events from history");
        Ok(events)
    }

    pub fn get_recent_events(&self, minutes: i64) -> HistoryResult<Vec<Event>> {
        let end = Utc::now();
        let start = end - Duration::minutes(minutes);
        self.get_events(start, end)
    }

    pub fn get_thread_events(&self, thread_id: &str) -> HistoryResult<Vec<Event>> {
        let all_events = self.get_recent_events(60 * 24)?;
        Ok(all_events
            .into_iter()
            .filter(|e| e.thread_id() == thread_id)
            .collect())
    }

    /// Replay events through a callback, in stored (chronological) order.
    pub async fn replay<F, Fut>(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        mut callback: F,
    ) -> HistoryResult<ReplayStats>
    where
        F: FnMut(Event) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let events = self.get_events(start, end)?;
        let total = events.len();
        info!(total, "starting event replay");

        let mut stats = ReplayStats::new();
        for event in events {
            stats.record_event(&event);
            callback(event).await;
        }

        info!(total = stats.total_events, threads = stats.threads_seen, "event replay complete");
        Ok(stats)
    }

    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> HistoryResult<usize> {
        let cutoff_nanos = cutoff.timestamp_nanos_opt().unwrap_or(0);
        let count = self
            .store
            .prune_events_before(cutoff_nanos)
            .map_err(|e| HistoryError::StoreError(e.to_string()))?;
        info!(count, cutoff = %cutoff, "pruned old events");
        Ok(count)
    }

    pub fn get_stats(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> HistoryResult<EventStats> {
        let events = self.get_events(start, end)?;
        Ok(EventStats::from_events(&events))
    }
}

#[derive(Debug, Default)]
pub struct ReplayStats {
    pub total_events: usize,
    pub threads_seen: usize,
    pub errors_seen: usize,
    threads: std::collections::HashSet<String>,
}

impl ReplayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, event: &Event) {
        self.total_events += 1;
        if self.threads.insert(event.thread_id().to_string()) {
            self.threads_seen += 1;
        }
        if matches!(event, Event::TaskFailed { .. } | Event::SystemError { .. }) {
            self.errors_seen += 1;
        }
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct EventStats {
    pub total_events: usize,
    pub events_by_type: std::collections::HashMap<String, usize>,
    pub unique_threads: usize,
    pub code_written: usize,
    pub test_passed: usize,
    pub test_failed: usize,
    pub failures: usize,
}

impl EventStats {
    pub fn from_events(events: &[Event]) -> Self {
        let mut stats = Self::default();
        let mut threads = std::collections::HashSet::new();

        for event in events {
            stats.total_events += 1;
            *stats.events_by_type.entry(event.event_type().to_string()).or_insert(0) += 1;
            threads.insert(event.thread_id().to_string());

            match event {
                Event::CodeWritten { .. } => stats.code_written += 1,
                Event::TestPassed { .. } => stats.test_passed += 1,
                Event::TestFailed { .. } => stats.test_failed += 1,
                Event::TaskFailed { .. } | Event::SystemError { .. } => stats.failures += 1,
                _ => {}
            }
        }

        stats.unique_threads = threads.len();
        stats
    }
}

/// Builder for replaying events with transformations
pub struct ReplayBuilder {
    store: SharedStateStore,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    filter_thread: Option<String>,
    filter_types: Option<Vec<String>>,
}

impl ReplayBuilder {
    pub fn new(store: SharedStateStore) -> Self {
        let now = Utc::now();
        Self {
            store,
            start: now - Duration::hours(24),
            end: now,
            filter_thread: None,
            filter_types: None,
        }
    }

    pub fn time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn thread(mut self, thread_id: &str) -> Self {
        self.filter_thread = Some(thread_id.to_string());
        self
    }

    pub fn event_types(mut self, types: Vec<&str>) -> Self {
        self.filter_types = Some(types.into_iter().map(String::from).collect());
        self
    }

    pub fn collect(self) -> HistoryResult<Vec<Event>> {
        let history = EventHistory::new(self.store);
        let mut events = history.get_events(self.start, self.end)?;

        if let Some(ref thread_id) = self.filter_thread {
            events.retain(|e| e.thread_id() == thread_id);
        }
        if let Some(ref types) = self.filter_types {
            events.retain(|e| types.contains(&e.event_type().to_string()));
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_created(thread_id: &str, task_id: &str) -> Event {
        Event::TaskCreated {
            thread_id: thread_id.to_string(),
            task_id: task_id.to_string(),
            goal: "test".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_event_stats() {
        let events = vec![
            task_created("t1", "task-1"),
            Event::TestFailed {
                thread_id: "t1".to_string(),
                test_command: "cargo test".to_string(),
                failure_summary: "1 failed".to_string(),
                timestamp: Utc::now(),
            },
        ];

        let stats = EventStats::from_events(&events);
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.unique_threads, 1);
        assert_eq!(stats.test_failed, 1);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_replay_stats() {
        let mut stats = ReplayStats::new();
        stats.record_event(&task_created("t1", "task-1"));
        stats.record_event(&task_created("t1", "task-2"));
        stats.record_event(&task_created("t2", "task-3"));

        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.threads_seen, 2);
    }
}
