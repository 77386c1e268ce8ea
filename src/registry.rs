//! Node registry (C4, §4.4): live node view, manifest admission, health, and cooldown.

use std::collections::HashMap;
use std::sync::RwLock;

use router_types::model::{Node, NodeAdmission, NodeManifest};

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("manifest is unsigned or structurally invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeHealth {
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_failure_ms: Option<i64>,
    pub last_success_ms: Option<i64>,
}

/// Live view of every known node, plus admission, cooldown, and health bookkeeping.
/// A single `RwLock` per map, per the shared-resource policy in §5: readers may take a
/// read lock, and no cross-map transaction exists.
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, Node>>,
    admissions: RwLock<HashMap<String, NodeAdmission>>,
    cooldown_until_ms: RwLock<HashMap<String, i64>>,
    health: RwLock<HashMap<String, NodeHealth>>,
    cooldown_threshold: u32,
    cooldown_base_ms: i64,
    cooldown_cap_ms: i64,
    heartbeat_ttl_ms: i64,
}

impl NodeRegistry {
    pub fn new(cooldown_threshold: u32, cooldown_base_ms: i64, cooldown_cap_ms: i64, heartbeat_ttl_ms: i64) -> Self {
        NodeRegistry {
            nodes: RwLock::new(HashMap::new()),
            admissions: RwLock::new(HashMap::new()),
            cooldown_until_ms: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            cooldown_threshold,
            cooldown_base_ms,
            cooldown_cap_ms,
            heartbeat_ttl_ms,
        }
    }

    /// Admits (or rejects) a signed `NodeManifest`. A structurally invalid manifest marks
    /// the node ineligible with a reason and excludes it from scheduling, but is not
    /// treated as a hard error: the admission record is still stored.
    pub fn admit_manifest(&self, manifest: &NodeManifest, signature_valid: bool) -> NodeAdmission {
        let admission = if !signature_valid {
            NodeAdmission::rejected("manifest signature invalid")
        } else if manifest.capabilities.is_empty() {
            NodeAdmission::rejected("manifest declares no capabilities")
        } else {
            NodeAdmission::accepted()
        };
        self.admissions
            .write()
            .expect("mutex poisoned")
            .insert(manifest.node_id.clone(), admission.clone());
        if admission.eligible {
            let node = Node {
                node_id: manifest.node_id.clone(),
                key_id: manifest.key_id.clone(),
                endpoint: manifest.endpoint.clone(),
                region: manifest.region.clone(),
                capacity: router_types::model::Capacity {
                    max_concurrent: manifest.max_concurrent,
                    current_load: 0,
                },
                capabilities: manifest.capabilities.clone(),
                trust_score: None,
                last_heartbeat_ms: None,
            };
            self.upsert_node(node);
        }
        admission
    }

    pub fn upsert_node(&self, node: Node) {
        self.nodes
            .write()
            .expect("mutex poisoned")
            .insert(node.node_id.clone(), node);
    }

    pub fn heartbeat(&self, node_id: &str, now_ms: i64, current_load: u32) {
        let mut nodes = self.nodes.write().expect("mutex poisoned");
        if let Some(node) = nodes.get_mut(node_id) {
            node.last_heartbeat_ms = Some(now_ms);
            node.capacity.current_load = current_load;
        }
    }

    pub fn record_success(&self, node_id: &str, now_ms: i64) {
        let mut health = self.health.write().expect("mutex poisoned");
        let entry = health.entry(node_id.to_string()).or_default();
        entry.successes += 1;
        entry.consecutive_failures = 0;
        entry.last_success_ms = Some(now_ms);
    }

    /// Records a failure; if it is the `K`th consecutive failure (default 3), the node
    /// enters cooldown for `min(base·2^(K-3), cap)`.
    pub fn record_failure(&self, node_id: &str, now_ms: i64) {
        let consecutive = {
            let mut health = self.health.write().expect("mutex poisoned");
            let entry = health.entry(node_id.to_string()).or_default();
            entry.failures += 1;
            entry.consecutive_failures += 1;
            entry.last_failure_ms = Some(now_ms);
            entry.consecutive_failures
        };
        if consecutive >= self.cooldown_threshold {
            let exp = consecutive - self.cooldown_threshold;
            let duration = self
                .cooldown_base_ms
                .saturating_mul(1i64 << exp.min(32))
                .min(self.cooldown_cap_ms);
            self.cooldown_until_ms
                .write()
                .expect("mutex poisoned")
                .insert(node_id.to_string(), now_ms + duration);
        }
    }

    pub fn is_cooling(&self, node_id: &str, now_ms: i64) -> bool {
        self.cooldown_until_ms
            .read()
            .expect("mutex poisoned")
            .get(node_id)
            .is_some_and(|until| *until > now_ms)
    }

    pub fn is_eligible(&self, node_id: &str) -> bool {
        self.admissions
            .read()
            .expect("mutex poisoned")
            .get(node_id)
            .is_none_or(|a| a.eligible)
    }

    /// `active = {n | eligible ∧ not cooling ∧ now - lastHeartbeatMs < heartbeatTTL}` (§4.4).
    pub fn active_nodes(&self, now_ms: i64) -> Vec<Node> {
        self.nodes
            .read()
            .expect("mutex poisoned")
            .values()
            .filter(|n| self.is_eligible(&n.node_id))
            .filter(|n| !self.is_cooling(&n.node_id, now_ms))
            .filter(|n| {
                n.last_heartbeat_ms
                    .is_some_and(|last| now_ms - last < self.heartbeat_ttl_ms)
            })
            .cloned()
            .collect()
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        self.nodes.read().expect("mutex poisoned").values().cloned().collect()
    }

    pub fn get(&self, node_id: &str) -> Option<Node> {
        self.nodes.read().expect("mutex poisoned").get(node_id).cloned()
    }

    pub fn node_health(&self, node_id: &str) -> NodeHealth {
        self.health
            .read()
            .expect("mutex poisoned")
            .get(node_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            nodes: self.nodes.read().expect("mutex poisoned").clone(),
            admissions: self.admissions.read().expect("mutex poisoned").clone(),
            cooldown_until_ms: self.cooldown_until_ms.read().expect("mutex poisoned").clone(),
        }
    }

    pub fn restore(&self, snapshot: RegistrySnapshot) {
        *self.nodes.write().expect("mutex poisoned") = snapshot.nodes;
        *self.admissions.write().expect("mutex poisoned") = snapshot.admissions;
        *self.cooldown_until_ms.write().expect("mutex poisoned") = snapshot.cooldown_until_ms;
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct RegistrySnapshot {
    pub nodes: HashMap<String, Node>,
    pub admissions: HashMap<String, NodeAdmission>,
    pub cooldown_until_ms: HashMap<String, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_types::model::{Capability, Pricing, PricingUnit};

    fn sample_manifest() -> NodeManifest {
        NodeManifest {
            node_id: "n1".into(),
            key_id: "deadbeef".into(),
            endpoint: "http://n1.local".into(),
            region: None,
            max_concurrent: 10,
            capabilities: vec![Capability {
                model_id: "m".into(),
                context_window: 4096,
                max_tokens: 256,
                pricing: Pricing {
                    unit: PricingUnit::Token,
                    input_rate: 0.01,
                    output_rate: 0.02,
                    currency: "sat".into(),
                },
                latency_estimate_ms: None,
            }],
        }
    }

    #[test]
    fn unsigned_manifest_is_ineligible() {
        let registry = NodeRegistry::new(3, 10_000, 600_000, 60_000);
        let admission = registry.admit_manifest(&sample_manifest(), false);
        assert!(!admission.eligible);
        assert!(!registry.is_eligible("n1"));
    }

    #[test]
    fn third_consecutive_failure_triggers_cooldown() {
        let registry = NodeRegistry::new(3, 10_000, 600_000, 60_000);
        registry.record_failure("n1", 0);
        registry.record_failure("n1", 0);
        assert!(!registry.is_cooling("n1", 0));
        registry.record_failure("n1", 0);
        assert!(registry.is_cooling("n1", 0));
        assert!(!registry.is_cooling("n1", 10_000));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let registry = NodeRegistry::new(3, 10_000, 600_000, 60_000);
        registry.record_failure("n1", 0);
        registry.record_failure("n1", 0);
        registry.record_success("n1", 0);
        registry.record_failure("n1", 0);
        assert!(!registry.is_cooling("n1", 0));
    }

    #[test]
    fn active_requires_fresh_heartbeat() {
        let registry = NodeRegistry::new(3, 10_000, 600_000, 60_000);
        registry.admit_manifest(&sample_manifest(), true);
        assert!(registry.active_nodes(0).is_empty());
        registry.heartbeat("n1", 0, 0);
        assert_eq!(registry.active_nodes(0).len(), 1);
        assert!(registry.active_nodes(120_000).is_empty());
    }
}
