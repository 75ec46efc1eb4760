//! Structured vote and planning-result contracts exchanged between agents
//! and the deliberation core.
//!
//! An integer-coded vote and character-capped think result replace
//! verbose natural-language exchange with a fixed wire shape. Every
//! structured LLM-output contract pairs `Serialize`/`Deserialize` with
//! `schemars::JsonSchema` so a provider that supports response-format
//! constraints can be handed the schema directly.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Integer-coded vote decision, matching `VoteEnum`'s wire encoding
/// (`0=REJECT, 1=APPROVE, 2=APPROVE_WITH_CHANGES, 3=HOLD`) so a vote can be
/// round-tripped through a compact JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr, JsonSchema)]
#[repr(u8)]
pub enum VoteDecision {
    Reject = 0,
    Approve = 1,
    ApproveWithChanges = 2,
    Hold = 3,
}

impl VoteDecision {
    /// Back-compat string mapping: every integer code has a 1:1 legacy
    /// string form.
    pub fn to_legacy(self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::Approve => "approve",
            Self::ApproveWithChanges => "approve_with_changes",
            Self::Hold => "hold",
        }
    }

    pub fn from_legacy(s: &str) -> Option<Self> {
        match s {
            "reject" => Some(Self::Reject),
            "approve" => Some(Self::Approve),
            "approve_with_changes" => Some(Self::ApproveWithChanges),
            "hold" => Some(Self::Hold),
            _ => None,
        }
    }

    /// True for the two decisions the Wald/Shadow algorithms treat as
    /// "approve" evidence.
    pub fn is_approve(self) -> bool {
        matches!(self, Self::Approve | Self::ApproveWithChanges)
    }
}

/// Closed risk-category tag set, wire tags `sec, perf, maint, arch, data,
/// none`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    #[serde(rename = "sec")]
    Security,
    #[serde(rename = "perf")]
    Performance,
    #[serde(rename = "maint")]
    Maintainability,
    #[serde(rename = "arch")]
    Architecture,
    #[serde(rename = "data")]
    Data,
    #[serde(rename = "none")]
    None,
}

/// Structured per-agent vote on a proposal.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MinimalVote {
    pub vote: VoteDecision,
    pub confidence: f64,
    #[serde(default)]
    pub risks: Vec<RiskCategory>,
    #[serde(default)]
    pub blocking_reason: Option<String>,
}

impl MinimalVote {
    pub fn new(vote: VoteDecision, confidence: f64) -> Self {
        Self {
            vote,
            confidence: Self::clamp_and_round(confidence),
            risks: Vec::new(),
            blocking_reason: None,
        }
    }

    pub fn with_risks(mut self, risks: Vec<RiskCategory>) -> Self {
        self.risks = risks;
        self
    }

    pub fn with_blocking_reason(mut self, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        reason.truncate(100);
        self.blocking_reason = Some(reason);
        self
    }

    /// Confidence is clamped to `[0, 1]` and rounded to two decimals.
    fn clamp_and_round(confidence: f64) -> f64 {
        let clamped = confidence.clamp(0.0, 1.0);
        (clamped * 100.0).round() / 100.0
    }

    /// Fail-safe vote for when an agent call errors: a HOLD at low
    /// confidence so a provider outage never silently reads as approval.
    pub fn hold_on_failure(reason: impl Into<String>) -> Self {
        MinimalVote::new(VoteDecision::Hold, 0.3).with_blocking_reason(reason)
    }

    pub fn has_security_risk(&self) -> bool {
        self.risks.contains(&RiskCategory::Security)
    }
}

/// Structured planning output from the "architect" agent's
/// `think_structured` call, consumed by the orchestrator's PLANNING state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct MinimalThinkResult {
    #[serde(default)]
    pub suggestions: Vec<PlanSuggestion>,
    #[serde(default)]
    pub concerns: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanSuggestion {
    pub description: String,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl MinimalThinkResult {
    /// Fail-closed default used when the architect's response doesn't
    /// parse: empty suggestions, zero confidence. The orchestrator's
    /// PLANNING step falls back to a single subtask equal to the raw task
    /// when it sees this.
    pub fn empty() -> Self {
        Self { suggestions: Vec::new(), concerns: Vec::new(), confidence: 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_decision_legacy_roundtrip() {
        for d in [
            VoteDecision::Reject,
            VoteDecision::Approve,
            VoteDecision::ApproveWithChanges,
            VoteDecision::Hold,
        ] {
            let legacy = d.to_legacy();
            assert_eq!(VoteDecision::from_legacy(legacy), Some(d));
        }
    }

    #[test]
    fn test_is_approve_classification() {
        assert!(VoteDecision::Approve.is_approve());
        assert!(VoteDecision::ApproveWithChanges.is_approve());
        assert!(!VoteDecision::Reject.is_approve());
        assert!(!VoteDecision::Hold.is_approve());
    }

    #[test]
    fn test_confidence_is_clamped_and_rounded() {
        let vote = MinimalVote::new(VoteDecision::Approve, 1.5);
        assert_eq!(vote.confidence, 1.0);

        let vote = MinimalVote::new(VoteDecision::Approve, 0.12345);
        assert_eq!(vote.confidence, 0.12);
    }

    #[test]
    fn test_blocking_reason_truncated_to_100_chars() {
        let long = "x".repeat(200);
        let vote = MinimalVote::new(VoteDecision::Reject, 0.9).with_blocking_reason(long);
        assert_eq!(vote.blocking_reason.unwrap().len(), 100);
    }

    #[test]
    fn test_hold_on_failure_is_low_confidence() {
        let vote = MinimalVote::hold_on_failure("timeout");
        assert_eq!(vote.vote, VoteDecision::Hold);
        assert!(vote.confidence <= 0.5);
    }

    #[test]
    fn test_wire_encoding_is_integer_tagged() {
        let vote = MinimalVote::new(VoteDecision::Approve, 0.9);
        let json = serde_json::to_value(&vote).unwrap();
        assert_eq!(json["vote"], 1);
    }

    #[test]
    fn test_risk_category_wire_tags() {
        let json = serde_json::to_string(&RiskCategory::Security).unwrap();
        assert_eq!(json, "\"sec\"");
    }
}
