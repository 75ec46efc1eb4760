//! Agent Registry — capability-indexed agent discovery.
//!
//! See `agent_registry` for the `AgentRegistry` type itself: a
//! dual-indexed `name → RegisteredAgent` / `capability → set<name>` table
//! with availability tracking and delegation-eligibility checks.

pub mod agent_registry;

pub use agent_registry::{AgentRegistry, RegisteredAgent, RegistryStats};
