//! Event-driven coordination module for the multi-agent orchestrator.
//!
//! This module provides the pub/sub messaging infrastructure agents and the
//! orchestrator use to observe each other's progress, plus event history for
//! replay and recovery.
//!
//! # Architecture
//!
//! The event system consists of three main components:
//!
//! 1. **Event Types** (`types.rs`): defines the 16 event types that drive
//!    orchestrator coordination, from task creation through handoffs,
//!    interrupts, and terminal outcomes.
//!
//! 2. **Event Bus** (`bus.rs`): tokio broadcast-based pub/sub that also
//!    projects select events onto the dual ledger, with optional persistence
//!    to RocksDB.
//!
//! 3. **Event History** (`history.rs`): query and replay capabilities for
//!    debugging and recovery.
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Producer   │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────┬───────┘     └──────────────┘
//!                             │
//!                             ▼
//!                      ┌──────────────┐
//!                      │   RocksDB    │
//!                      │  (persist)   │
//!                      └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use coordination::events::{EventBus, Event, EventHistory};
//! use chrono::Utc;
//!
//! // Create event bus with persistence
//! let bus = EventBus::with_persistence(store.clone()).shared();
//!
//! // Subscribe to events
//! let mut receiver = bus.subscribe();
//!
//! // Publish an event
//! bus.publish(Event::TaskCreated {
//!     task_id: "task-1".to_string(),
//!     thread_id: "thread-1".to_string(),
//!     goal: "Analyze...".to_string(),
//!     timestamp: Utc::now(),
//! })?;
//!
//! // Receive event
//! let event = receiver.recv().await?;
//!
//! // Replay history
//! let history = EventHistory::new(store);
//! let recent = history.get_recent_events(60)?; // Last hour
//! ```

pub mod bus;
pub mod history;
pub mod types;

// Re-export core types
pub use bus::{
    EventBus, EventBusError, EventBusExt, EventBusResult, EventFilter, FilteredReceiver,
    SharedEventBus, SubscriptionHandle,
};
pub use history::{
    EventHistory, EventStats, HistoryError, HistoryResult, ReplayBuilder, ReplayStats,
};
pub use types::{Event, EventId};
