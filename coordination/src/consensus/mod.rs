//! Consensus: Wald sequential analysis (SPRT) and two-tier Shadow
//! (speculative) consensus built on top of it.
//!
//! These compute a commit/reject/hold-for-human decision from a set of
//! per-agent votes; they are independent of round-by-round debate-style
//! verdict tracking, which a caller may layer on top separately.

pub mod shadow;
pub mod wald;

pub use shadow::{EscalationReason, ShadowConfig, ShadowFacilitator, ShadowResult, ShadowStats};
pub use wald::{ConsensusDecision, ConsensusResult, VoteSummary, WaldConfig, WaldConsensus};
