//! Orchestrator configuration: model names for the stock agent roster,
//! consensus/shadow tuning knobs, healing/stagnation bounds, and the
//! decision keywords that force a human-in-the-loop hold.
//!
//! A `Default` impl plus a thin env-var override layer sits on top of the
//! TOML file load; no provider/endpoint fields live here since
//! `CompletionClient` is the only LLM boundary this crate has.

use std::collections::HashMap;

use coordination::{ShadowConfig, WaldConfig};
use serde::{Deserialize, Serialize};

/// Per-agent model name, keyed by the agent's registry name
/// (`architect`, `coder`, `reviewer`, `security_auditor`, `web_researcher`).
pub type ModelRoster = HashMap<String, String>;

fn default_model_roster() -> ModelRoster {
    [
        ("architect", "claude"),
        ("coder", "qwen"),
        ("reviewer", "qwen"),
        ("security_auditor", "claude"),
        ("web_researcher", "claude"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Orchestrator-wide configuration, loaded from a TOML file and overridable
/// by `SWARM_*` environment variables layered on top of the struct defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Shell command run by the `TestRunner` in the TESTING/HEALING states.
    pub test_command: String,

    /// Model assigned to each stock agent.
    #[serde(default = "default_model_roster")]
    pub model_roster: ModelRoster,

    /// Bound on `SelfHealingLoop`'s retry count.
    pub max_healing_iterations: u32,

    /// Consecutive non-progress iterations before the orchestrator forces
    /// a replan (threaded into `ProgressLedger::with_max_stagnation`).
    pub max_stagnation: u32,

    /// Wald sequential consensus tuning.
    #[serde(default)]
    pub wald: WaldSettings,

    /// Shadow (speculative) consensus tuning.
    #[serde(default)]
    pub shadow: ShadowSettings,

    /// Maximum delegation chain depth enforced globally, independent of
    /// any individual agent's `max_delegation_depth`.
    pub global_max_delegation_depth: usize,

    /// Decision keywords that always force a HITL hold regardless of the
    /// consensus outcome, matched case-insensitively against the task text.
    #[serde(default = "default_hitl_keywords")]
    pub hitl_keywords: Vec<String>,

    /// Seconds to wait on a raised `HumanInterrupt` before treating the
    /// run as stalled.
    pub approval_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaldSettings {
    pub upper_limit: f64,
    pub lower_limit: f64,
    pub prior_approve: f64,
}

impl Default for WaldSettings {
    fn default() -> Self {
        let d = WaldConfig::default();
        Self { upper_limit: d.upper_limit, lower_limit: d.lower_limit, prior_approve: d.prior_approve }
    }
}

impl From<WaldSettings> for WaldConfig {
    fn from(s: WaldSettings) -> Self {
        WaldConfig { upper_limit: s.upper_limit, lower_limit: s.lower_limit, prior_approve: s.prior_approve }
            .validated()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowSettings {
    pub unanimity_required: bool,
    pub min_confidence: f64,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        let d = ShadowConfig::default();
        Self { unanimity_required: d.unanimity_required, min_confidence: d.min_confidence }
    }
}

impl From<ShadowSettings> for ShadowConfig {
    fn from(s: ShadowSettings) -> Self {
        ShadowConfig { unanimity_required: s.unanimity_required, min_confidence: s.min_confidence }
    }
}

fn default_hitl_keywords() -> Vec<String> {
    ["deploy", "production", "delete", "drop table", "secret", "credential"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            test_command: "cargo test".to_string(),
            model_roster: default_model_roster(),
            max_healing_iterations: 3,
            max_stagnation: 3,
            wald: WaldSettings::default(),
            shadow: ShadowSettings::default(),
            global_max_delegation_depth: 3,
            hitl_keywords: default_hitl_keywords(),
            approval_timeout_secs: 300,
        }
    }
}

impl SwarmConfig {
    /// Load from a TOML file, falling back to `Default` values for any
    /// field the file omits. `SWARM_TEST_COMMAND` and `SWARM_MAX_HEALING_ITERATIONS`
    /// override the loaded value when set.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: SwarmConfig = toml::from_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(cmd) = std::env::var("SWARM_TEST_COMMAND") {
            self.test_command = cmd;
        }
        if let Ok(n) = std::env::var("SWARM_MAX_HEALING_ITERATIONS") {
            if let Ok(n) = n.parse() {
                self.max_healing_iterations = n;
            }
        }
    }

    /// Model assigned to `agent_name`, falling back to `"default"` if the
    /// roster has no entry (e.g. a custom agent added at call sites).
    pub fn model_for(&self, agent_name: &str) -> String {
        self.model_roster.get(agent_name).cloned().unwrap_or_else(|| "default".to_string())
    }

    /// Whether `task` mentions any configured HITL keyword.
    pub fn task_requires_hitl(&self, task: &str) -> bool {
        let lower = task.to_lowercase();
        self.hitl_keywords.iter().any(|kw| lower.contains(&kw.to_lowercase()))
    }
}
