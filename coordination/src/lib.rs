//! Deliberation core for a multi-agent execution runtime.
//!
//! This crate provides the subsystems a task orchestrator drives to take one
//! development task from intake to a terminal status: a typed pub/sub event
//! hub, a dual (task + progress) ledger, a capability-indexed agent registry
//! with depth/cycle-safe delegation, Wald sequential consensus and a
//! speculative shadow-voting tier on top of it, a bounded self-healing test
//! loop, a governance gateway for human-in-the-loop gating, and checkpoint
//! persistence that can be swapped between an embedded store and a network
//! key-value store without touching the state machine.
//!
//! The crate owns none of the deployment topology, model inference, or UI —
//! it is consumed by a binary (`swarm-agents`) that supplies concrete agents
//! over the `CompletionClient` boundary and drives the orchestrator loop.

#![allow(dead_code)]
#![allow(clippy::uninlined_format_args)]

pub mod agents;
pub mod consensus;
pub mod delegation;
pub mod events;
pub mod governance;
pub mod healing;
pub mod ledger;
pub mod registry;
pub mod state;

// Agent identity and capability-trait types
pub use agents::{
    AgentContext, AgentIdentity, CompletionClient, Execute, ExecuteResult, HistoryEntry, LlmError,
    Message, MinimalThinkResult, MinimalVote, PlanSuggestion, RiskCategory, ScriptedClient,
    StructuredCompletionExt, Think, Vote, VoteDecision,
};

// Event hub types
pub use events::{Event, EventBus, EventBusError, EventFilter, FilteredReceiver, SharedEventBus, SubscriptionHandle};

// Ledger types
pub use ledger::{DualLedger, IterationRecord, IterationStatus, ProgressLedger, ProgressReflection, TaskLedger};

// Agent registry types
pub use registry::{AgentRegistry, RegisteredAgent, RegistryStats};

// Delegation manager types
pub use delegation::{
    DelegationError, DelegationManager, DelegationRequest, DelegationResult, DelegationStats,
    DelegationStatus,
};

// Consensus types (Wald + Shadow)
pub use consensus::{
    ConsensusDecision, ConsensusResult, EscalationReason as ShadowEscalationReason, NamedVote,
    ShadowConfig, ShadowFacilitator, ShadowResult, ShadowStats, VoteSummary, WaldConfig,
    WaldConsensus,
};

// Governance gateway types
pub use governance::{
    ActionType, ApprovalKind, ApprovalRequest, DecisionType, GovernanceGateway, HumanInterrupt,
    InterruptRecord, RiskLevel as GovernanceRiskLevel, SafetyCheck, PROTECTED_PATHS,
};

// Self-healing loop types
pub use healing::{
    FixStrategy, HealingAttempt, HealingReport, HealingStatus, ReinvokeWithTraceback,
    SelfHealingLoop, TestOutcome, TestRunner,
};

// Persistence types
pub use state::{
    Checkpoint, CheckpointStore, DistributedLock, InMemoryKvBackend, KvBackend, KvCheckpointStore,
    KvError, LockError, SessionId, SharedCheckpointStore, StoreError, StoreResult, TaskId, ThreadId,
};

#[cfg(feature = "heavy-state")]
pub use state::{SharedStateStore, StateStore};
