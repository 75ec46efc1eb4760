//! Agent Registry: capability-indexed agent discovery.
//!
//! A dual index — `agents: name -> RegisteredAgent` and
//! `capability_index: capability -> HashSet<name>` — wrapped in a single
//! outer struct so methods can keep both in sync under one mutex, with a
//! `get_stats()` summary method for observability.
//!
//! Both indexes are guarded by a single mutex so `register`/`unregister`
//! can never leave them inconsistent with each other.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::agents::AgentIdentity;

/// One registered agent: its identity plus registry-owned bookkeeping.
#[derive(Debug, Clone)]
pub struct RegisteredAgent {
    pub identity: AgentIdentity,
    pub capabilities: HashSet<String>,
    pub is_available: bool,
}

#[derive(Default)]
struct RegistryInner {
    agents: HashMap<String, RegisteredAgent>,
    capability_index: HashMap<String, HashSet<String>>,
}

/// Capability-indexed store of agent identities. Not a trait-object store
/// of `Think`/`Vote`/`Execute` implementations — per spec §9's "hold agents
/// by stable identifier, resolve through the registry at call sites" note,
/// orchestration code looks up an `AgentIdentity` here and dispatches the
/// actual capability call through whatever holds the corresponding trait
/// object (typically a small `HashMap<String, Arc<dyn Execute>>` the
/// orchestrator owns alongside the registry).
#[derive(Default)]
pub struct AgentRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStats {
    pub total_agents: usize,
    pub available_agents: usize,
    pub total_capabilities: usize,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn register(&self, identity: AgentIdentity, capabilities: Vec<String>) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let name = identity.name.clone();
        let caps: HashSet<String> = capabilities.into_iter().collect();

        for cap in &caps {
            inner
                .capability_index
                .entry(cap.clone())
                .or_default()
                .insert(name.clone());
        }

        inner.agents.insert(
            name,
            RegisteredAgent { identity, capabilities: caps, is_available: true },
        );
    }

    /// Remove an agent and purge it from every capability bucket it
    /// occupied. Absence is a no-op success (`false` return), matching the
    /// teacher's registry idiom of returning a bool rather than erroring.
    pub fn unregister(&self, name: &str) -> bool {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let Some(entry) = inner.agents.remove(name) else {
            return false;
        };
        for cap in entry.capabilities {
            if let Some(names) = inner.capability_index.get_mut(&cap) {
                names.remove(name);
            }
        }
        true
    }

    pub fn get(&self, name: &str) -> Option<AgentIdentity> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.agents.get(name).map(|e| e.identity.clone())
    }

    pub fn is_available(&self, name: &str) -> bool {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.agents.get(name).map(|e| e.is_available).unwrap_or(false)
    }

    /// Agents advertising `capability`, filtered to those currently
    /// available.
    pub fn find_by_capability(&self, capability: &str) -> Vec<AgentIdentity> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        let Some(names) = inner.capability_index.get(capability) else {
            return Vec::new();
        };
        names
            .iter()
            .filter_map(|n| inner.agents.get(n))
            .filter(|e| e.is_available)
            .map(|e| e.identity.clone())
            .collect()
    }

    pub fn list_available(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.agents.iter().filter(|(_, e)| e.is_available).map(|(n, _)| n.clone()).collect()
    }

    pub fn list_all(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.agents.keys().cloned().collect()
    }

    pub fn set_availability(&self, name: &str, available: bool) -> bool {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        match inner.agents.get_mut(name) {
            Some(entry) => {
                entry.is_available = available;
                true
            }
            None => false,
        }
    }

    /// Whether `from` may delegate to `to_name`, and if not, why. Checked in
    /// the exact order spec §4.3 lists: delegation disabled, target absent,
    /// target unavailable, target outside an explicit allow-list.
    pub fn can_delegate_to(&self, from: &AgentIdentity, to_name: &str) -> (bool, String) {
        if !from.allow_delegation {
            return (false, format!("{} does not allow delegation", from.name));
        }

        let inner = self.inner.lock().expect("registry lock poisoned");
        let Some(target) = inner.agents.get(to_name) else {
            return (false, format!("target agent '{}' is not registered", to_name));
        };

        if !target.is_available {
            return (false, format!("target agent '{}' is not available", to_name));
        }

        if !from.allowed_agents.is_empty() && !from.allowed_agents.iter().any(|a| a == to_name) {
            return (false, format!("'{}' is not in {}'s allowed-agents list", to_name, from.name));
        }

        (true, "delegation allowed".to_string())
    }

    pub fn get_stats(&self) -> RegistryStats {
        let inner = self.inner.lock().expect("registry lock poisoned");
        RegistryStats {
            total_agents: inner.agents.len(),
            available_agents: inner.agents.values().filter(|e| e.is_available).count(),
            total_capabilities: inner.capability_index.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> AgentIdentity {
        AgentIdentity::new(name, "prompt", "model")
    }

    #[test]
    fn test_register_and_find_by_capability() {
        let registry = AgentRegistry::new();
        registry.register(identity("coder"), vec!["coding".to_string(), "testing".to_string()]);

        let found = registry.find_by_capability("coding");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "coder");
    }

    #[test]
    fn test_unregister_purges_capability_index() {
        let registry = AgentRegistry::new();
        registry.register(identity("coder"), vec!["coding".to_string()]);
        assert!(registry.unregister("coder"));

        assert!(registry.find_by_capability("coding").is_empty());
        assert!(!registry.unregister("coder"), "second unregister is a no-op");
    }

    #[test]
    fn test_find_by_capability_excludes_unavailable() {
        let registry = AgentRegistry::new();
        registry.register(identity("coder"), vec!["coding".to_string()]);
        registry.set_availability("coder", false);

        assert!(registry.find_by_capability("coding").is_empty());
    }

    #[test]
    fn test_indexes_stay_consistent_across_registrations() {
        let registry = AgentRegistry::new();
        registry.register(identity("a"), vec!["x".to_string()]);
        registry.register(identity("b"), vec!["x".to_string(), "y".to_string()]);

        let xs = registry.find_by_capability("x");
        assert_eq!(xs.len(), 2);

        registry.unregister("a");
        let xs = registry.find_by_capability("x");
        assert_eq!(xs.len(), 1);
        assert_eq!(xs[0].name, "b");

        let stats = registry.get_stats();
        assert_eq!(stats.total_agents, 1);
        assert_eq!(stats.total_capabilities, 2);
    }

    #[test]
    fn test_can_delegate_to_reasons() {
        let registry = AgentRegistry::new();
        let closed = identity("closed");
        let (ok, reason) = registry.can_delegate_to(&closed, "anyone");
        assert!(!ok);
        assert!(reason.contains("does not allow delegation"));

        let open = identity("open").with_delegation(vec![], 3);
        let (ok, reason) = registry.can_delegate_to(&open, "ghost");
        assert!(!ok);
        assert!(reason.contains("not registered"));

        registry.register(identity("coder"), vec![]);
        registry.set_availability("coder", false);
        let (ok, reason) = registry.can_delegate_to(&open, "coder");
        assert!(!ok);
        assert!(reason.contains("not available"));

        registry.set_availability("coder", true);
        let (ok, _) = registry.can_delegate_to(&open, "coder");
        assert!(ok);

        let restricted = identity("restricted").with_delegation(vec!["other".to_string()], 3);
        let (ok, reason) = registry.can_delegate_to(&restricted, "coder");
        assert!(!ok);
        assert!(reason.contains("allowed-agents"));
    }
}
