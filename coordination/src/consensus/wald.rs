//! Wald Sequential Consensus: a Sequential Probability Ratio Test (SPRT)
//! over per-agent votes, deciding whether a proposal can auto-commit,
//! should be rejected, or needs a human.
//!
//! Accumulates a likelihood ratio `L = Π P(vote_i | approve) / P(vote_i |
//! reject)` across votes, turns it into a posterior `π = (prior·L) /
//! (prior·L + (1-prior))`, and applies the three-way decision rule against
//! `upper_limit`/`lower_limit`.

use crate::agents::{MinimalVote, VoteDecision};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusDecision {
    AutoCommit,
    HoldForHuman,
    Reject,
}

#[derive(Debug, Clone)]
pub struct WaldConfig {
    pub upper_limit: f64,
    pub lower_limit: f64,
    pub prior_approve: f64,
}

impl Default for WaldConfig {
    fn default() -> Self {
        Self { upper_limit: 0.95, lower_limit: 0.30, prior_approve: 0.70 }
    }
}

impl WaldConfig {
    /// Panics if limits/prior fall outside the open interval `(0, 1)` or
    /// `lower_limit >= upper_limit`, matching the teacher's `__post_init__`
    /// assertions.
    pub fn validated(self) -> Self {
        assert!(0.0 < self.lower_limit && self.lower_limit < self.upper_limit && self.upper_limit < 1.0);
        assert!(0.0 < self.prior_approve && self.prior_approve < 1.0);
        self
    }
}

#[derive(Debug, Clone)]
pub struct VoteSummary {
    pub agent: String,
    pub decision: VoteDecision,
    pub confidence: f64,
    pub p_approve: f64,
    pub p_reject: f64,
}

#[derive(Debug, Clone)]
pub struct ConsensusResult {
    pub decision: ConsensusDecision,
    pub pi_approve: f64,
    pub pi_reject: f64,
    pub likelihood_ratio: f64,
    pub votes_summary: Vec<VoteSummary>,
    pub reason: String,
    pub iteration: u32,
}

/// One named vote fed into `WaldConsensus::evaluate`.
pub struct NamedVote<'a> {
    pub agent: &'a str,
    pub vote: &'a MinimalVote,
}

pub struct WaldConsensus {
    config: WaldConfig,
}

impl WaldConsensus {
    pub fn new(config: WaldConfig) -> Self {
        Self { config }
    }

    /// Likelihood of a vote under the approve and reject hypotheses.
    /// Clamped away from zero to avoid a division blow-up in the log-ratio,
    /// per the teacher's `max(p, 0.01)` floor.
    fn vote_likelihood(confidence: f64, is_approve: bool) -> (f64, f64) {
        let (p_approve, p_reject) =
            if is_approve { (confidence, 1.0 - confidence) } else { (1.0 - confidence, confidence) };
        (p_approve.max(0.01), p_reject.max(0.01))
    }

    pub fn evaluate(&self, votes: &[NamedVote]) -> ConsensusResult {
        if votes.is_empty() {
            return ConsensusResult {
                decision: ConsensusDecision::HoldForHuman,
                pi_approve: 0.5,
                pi_reject: 0.5,
                likelihood_ratio: 1.0,
                votes_summary: Vec::new(),
                reason: "no votes were received".to_string(),
                iteration: 1,
            };
        }

        let mut log_likelihood = 0.0;
        let mut votes_summary = Vec::with_capacity(votes.len());

        for named in votes {
            let is_approve = named.vote.vote.is_approve();
            let (p_approve, p_reject) = Self::vote_likelihood(named.vote.confidence, is_approve);
            log_likelihood += (p_approve / p_reject).ln();

            votes_summary.push(VoteSummary {
                agent: named.agent.to_string(),
                decision: named.vote.vote,
                confidence: named.vote.confidence,
                p_approve,
                p_reject,
            });
        }

        let likelihood_ratio = log_likelihood.exp();
        let prior = self.config.prior_approve;
        let pi_approve = (prior * likelihood_ratio) / (prior * likelihood_ratio + (1.0 - prior));
        let pi_reject = 1.0 - pi_approve;

        let (decision, reason) = if pi_approve >= self.config.upper_limit {
            (ConsensusDecision::AutoCommit, format!("consensus probability π={:.3} >= {}, auto-committing", pi_approve, self.config.upper_limit))
        } else if pi_approve <= self.config.lower_limit {
            (ConsensusDecision::Reject, format!("consensus probability π={:.3} <= {}, rejecting proposal", pi_approve, self.config.lower_limit))
        } else {
            (ConsensusDecision::HoldForHuman, format!("consensus probability π={:.3} is in the uncertain band, human review needed", pi_approve))
        };

        ConsensusResult {
            decision,
            pi_approve,
            pi_reject,
            likelihood_ratio,
            votes_summary,
            reason,
            iteration: 1,
        }
    }

    pub fn should_continue(&self, result: &ConsensusResult, max_iterations: u32) -> bool {
        if result.iteration >= max_iterations {
            return false;
        }
        !matches!(result.decision, ConsensusDecision::AutoCommit | ConsensusDecision::Reject)
    }

    /// Shannon entropy over the distribution of vote decisions, normalized
    /// by `log2(4)` (the four-way `VoteDecision` tag set). Zero means
    /// perfect agreement; 1.0 is maximal disagreement.
    pub fn semantic_entropy(votes: &[NamedVote]) -> f64 {
        if votes.is_empty() {
            return 1.0;
        }

        let mut counts: std::collections::HashMap<VoteDecision, usize> = std::collections::HashMap::new();
        for named in votes {
            *counts.entry(named.vote.vote).or_insert(0) += 1;
        }

        let total = votes.len() as f64;
        let entropy: f64 = counts
            .values()
            .map(|&count| {
                let p = count as f64 / total;
                -p * p.log2()
            })
            .sum();

        let max_entropy = 4f64.log2();
        if max_entropy > 0.0 {
            entropy / max_entropy
        } else {
            0.0
        }
    }
}

impl Default for WaldConsensus {
    fn default() -> Self {
        Self::new(WaldConfig::default())
    }
}
