//! Shadow (Speculative) Consensus: a cheap "shadow cabinet" votes first;
//! only disagreement, critical risk, low confidence, or a missing vote
//! escalates to the full, expensive council.
//!
//! The escalation check runs empty-votes first (nothing else is
//! computable), then disagreement, then critical risk, then low
//! confidence — a deliberate ordering choice since a vote set can trip
//! more than one condition at once and the first match decides the
//! reported reason.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::agents::{MinimalVote, Vote as VoteCapability, VoteDecision};
use crate::consensus::wald::{ConsensusDecision, NamedVote, WaldConsensus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    Disagreement,
    LowConfidence,
    CriticalRisk,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ShadowResult {
    pub resolved: bool,
    pub decision: Option<ConsensusDecision>,
    pub shadow_votes: Vec<MinimalVote>,
    pub escalation_reason: Option<EscalationReason>,
    pub cost_saved_percent: f64,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ShadowConfig {
    pub unanimity_required: bool,
    pub min_confidence: f64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self { unanimity_required: true, min_confidence: 0.7 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShadowStats {
    pub total_deliberations: u64,
    pub shadow_resolved: u64,
    pub escalations: u64,
    pub resolution_rate_pct: f64,
    pub estimated_cost_savings_pct: f64,
}

/// Drives shadow-then-pro two-tier voting over any agents implementing the
/// `Vote` capability trait. Agents are held as trait objects behind `Arc`
/// by the caller; this facilitator borrows slices of them for the
/// lifetime of one `deliberate` call.
pub struct ShadowFacilitator {
    config: ShadowConfig,
    wald: WaldConsensus,
    total_deliberations: AtomicU64,
    shadow_resolved: AtomicU64,
    escalations: AtomicU64,
}

impl ShadowFacilitator {
    pub fn new(config: ShadowConfig) -> Self {
        Self {
            config,
            wald: WaldConsensus::default(),
            total_deliberations: AtomicU64::new(0),
            shadow_resolved: AtomicU64::new(0),
            escalations: AtomicU64::new(0),
        }
    }

    pub async fn deliberate(
        &self,
        proposal: &str,
        shadow_agents: &[&(dyn VoteCapability + Send + Sync)],
        pro_agents: &[&(dyn VoteCapability + Send + Sync)],
    ) -> ShadowResult {
        let start = std::time::Instant::now();
        self.total_deliberations.fetch_add(1, Ordering::Relaxed);

        let shadow_votes = Self::collect_votes(shadow_agents, proposal).await;
        let escalation_reason = self.check_escalation(&shadow_votes);

        match escalation_reason {
            None => {
                self.shadow_resolved.fetch_add(1, Ordering::Relaxed);
                let decision = Self::determine_decision(&shadow_votes);
                ShadowResult {
                    resolved: true,
                    decision: Some(decision),
                    shadow_votes,
                    escalation_reason: None,
                    cost_saved_percent: 90.0,
                    latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                    timestamp: Utc::now(),
                }
            }
            Some(reason) => {
                self.escalations.fetch_add(1, Ordering::Relaxed);
                let pro_votes = Self::collect_votes(pro_agents, proposal).await;

                let named_agents: Vec<String> = (0..shadow_votes.len() + pro_votes.len())
                    .map(|i| format!("agent_{}", i))
                    .collect();
                let all_votes: Vec<&MinimalVote> = shadow_votes.iter().chain(pro_votes.iter()).collect();
                let named_votes: Vec<NamedVote> = named_agents
                    .iter()
                    .zip(all_votes.iter())
                    .map(|(name, vote)| NamedVote { agent: name, vote })
                    .collect();

                let wald_result = self.wald.evaluate(&named_votes);

                ShadowResult {
                    resolved: false,
                    decision: Some(wald_result.decision),
                    shadow_votes,
                    escalation_reason: Some(reason),
                    cost_saved_percent: 0.0,
                    latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                    timestamp: Utc::now(),
                }
            }
        }
    }

    async fn collect_votes(agents: &[&(dyn VoteCapability + Send + Sync)], proposal: &str) -> Vec<MinimalVote> {
        let mut votes = Vec::with_capacity(agents.len());
        for agent in agents {
            let vote = match agent.vote_structured(proposal, None).await {
                Ok(v) => v,
                Err(e) => MinimalVote::hold_on_failure(format!("vote failed: {}", e)),
            };
            votes.push(vote);
        }
        votes
    }

    fn check_escalation(&self, votes: &[MinimalVote]) -> Option<EscalationReason> {
        if votes.is_empty() {
            return Some(EscalationReason::Timeout);
        }

        let first = votes[0].vote;
        let is_unanimous = votes.iter().all(|v| v.vote == first);
        if self.config.unanimity_required && !is_unanimous {
            return Some(EscalationReason::Disagreement);
        }

        if votes.iter().any(|v| v.has_security_risk()) {
            return Some(EscalationReason::CriticalRisk);
        }

        let avg_confidence = votes.iter().map(|v| v.confidence).sum::<f64>() / votes.len() as f64;
        if avg_confidence < self.config.min_confidence {
            return Some(EscalationReason::LowConfidence);
        }

        None
    }

    fn determine_decision(votes: &[MinimalVote]) -> ConsensusDecision {
        if votes.is_empty() {
            return ConsensusDecision::HoldForHuman;
        }
        if votes.iter().all(|v| v.vote.is_approve()) {
            return ConsensusDecision::AutoCommit;
        }
        if votes.iter().all(|v| v.vote == VoteDecision::Reject) {
            return ConsensusDecision::Reject;
        }
        ConsensusDecision::HoldForHuman
    }

    pub fn get_stats(&self) -> ShadowStats {
        let total = self.total_deliberations.load(Ordering::Relaxed);
        let resolved = self.shadow_resolved.load(Ordering::Relaxed);
        let escalations = self.escalations.load(Ordering::Relaxed);

        let resolution_rate = if total > 0 { resolved as f64 / total as f64 * 100.0 } else { 0.0 };
        let estimated_savings = resolution_rate * 0.9;

        ShadowStats {
            total_deliberations: total,
            shadow_resolved: resolved,
            escalations,
            resolution_rate_pct: (resolution_rate * 10.0).round() / 10.0,
            estimated_cost_savings_pct: (estimated_savings * 10.0).round() / 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentContext, AgentIdentity, LlmError};
    use async_trait::async_trait;

    struct ScriptedVoter {
        identity: AgentIdentity,
        vote: MinimalVote,
    }

    #[async_trait]
    impl VoteCapability for ScriptedVoter {
        fn identity(&self) -> &AgentIdentity {
            &self.identity
        }

        async fn vote_structured(&self, _proposal: &str, _context: Option<&AgentContext>) -> Result<MinimalVote, LlmError> {
            Ok(self.vote.clone())
        }
    }

    fn voter(name: &str, decision: VoteDecision, confidence: f64) -> ScriptedVoter {
        ScriptedVoter {
            identity: AgentIdentity::new(name, "prompt", "flash"),
            vote: MinimalVote::new(decision, confidence),
        }
    }

    #[tokio::test]
    async fn test_unanimous_shadow_approval_resolves_without_escalation() {
        let facilitator = ShadowFacilitator::new(ShadowConfig::default());
        let a = voter("architect", VoteDecision::Approve, 0.9);
        let b = voter("coder", VoteDecision::Approve, 0.9);
        let shadow: Vec<&(dyn VoteCapability + Send + Sync)> = vec![&a, &b];

        let result = facilitator.deliberate("add a login form", &shadow, &[]).await;

        assert!(result.resolved);
        assert_eq!(result.decision, Some(ConsensusDecision::AutoCommit));
        assert_eq!(result.cost_saved_percent, 90.0);
        assert!(result.escalation_reason.is_none());
    }

    #[tokio::test]
    async fn test_security_risk_always_escalates() {
        let facilitator = ShadowFacilitator::new(ShadowConfig::default());
        let mut risky_vote = MinimalVote::new(VoteDecision::Approve, 0.95);
        risky_vote = risky_vote.with_risks(vec![crate::agents::RiskCategory::Security]);
        let risky = ScriptedVoter { identity: AgentIdentity::new("coder", "p", "flash"), vote: risky_vote };
        let calm = voter("architect", VoteDecision::Approve, 0.95);

        let shadow: Vec<&(dyn VoteCapability + Send + Sync)> = vec![&risky, &calm];
        let pro_a = voter("pro_architect", VoteDecision::Approve, 0.9);
        let pro_b = voter("pro_coder", VoteDecision::Approve, 0.9);
        let pro: Vec<&(dyn VoteCapability + Send + Sync)> = vec![&pro_a, &pro_b];

        let result = facilitator.deliberate("touch auth middleware", &shadow, &pro).await;

        assert!(!result.resolved);
        assert_eq!(result.escalation_reason, Some(EscalationReason::CriticalRisk));
        assert_eq!(result.cost_saved_percent, 0.0);
    }

    #[tokio::test]
    async fn test_disagreement_escalates_before_confidence_check() {
        let facilitator = ShadowFacilitator::new(ShadowConfig::default());
        let a = voter("architect", VoteDecision::Approve, 0.95);
        let b = voter("coder", VoteDecision::Reject, 0.95);
        let shadow: Vec<&(dyn VoteCapability + Send + Sync)> = vec![&a, &b];
        let pro: Vec<&(dyn VoteCapability + Send + Sync)> = vec![];

        let result = facilitator.deliberate("refactor module", &shadow, &pro).await;

        assert_eq!(result.escalation_reason, Some(EscalationReason::Disagreement));
    }

    #[tokio::test]
    async fn test_empty_shadow_votes_times_out() {
        let facilitator = ShadowFacilitator::new(ShadowConfig::default());
        let shadow: Vec<&(dyn VoteCapability + Send + Sync)> = vec![];
        let pro: Vec<&(dyn VoteCapability + Send + Sync)> = vec![];

        let result = facilitator.deliberate("anything", &shadow, &pro).await;

        assert_eq!(result.escalation_reason, Some(EscalationReason::Timeout));
    }

    #[tokio::test]
    async fn test_stats_track_resolution_rate() {
        let facilitator = ShadowFacilitator::new(ShadowConfig::default());
        let a = voter("architect", VoteDecision::Approve, 0.9);
        let b = voter("coder", VoteDecision::Approve, 0.9);
        let shadow: Vec<&(dyn VoteCapability + Send + Sync)> = vec![&a, &b];

        facilitator.deliberate("task one", &shadow, &[]).await;
        let stats = facilitator.get_stats();
        assert_eq!(stats.total_deliberations, 1);
        assert_eq!(stats.shadow_resolved, 1);
        assert_eq!(stats.resolution_rate_pct, 100.0);
    }
}
