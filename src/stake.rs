//! Stake commitments and slashes (§4.9 persisted fields, §5 `stakeStore`).
//!
//! The data model in §3 never defines a `Stake` type — nodes are admitted by manifest and
//! excluded by cooldown, not by bonded collateral — but §4.9 lists "stake commits/slashes"
//! among the persisted snapshot fields and §5 lists `stakeStore` among the maps guarded by
//! one advisory mutex each. This module is the minimal store that satisfies both: a ledger
//! of per-node stake commitments and slash events, mutated only by whatever admission or
//! health-penalty path chooses to call it (today, nothing in this spec's operations does —
//! there is no slashing trigger named anywhere in §4), kept available and persisted so a
//! future trust/bonding policy has somewhere to write without a schema migration.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// A single stake commitment or slash against a node, append-only per node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeEvent {
    pub amount_sats: u64,
    pub reason: Option<String>,
    pub at_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StakeRecord {
    pub committed_sats: u64,
    pub slashed_sats: u64,
    pub commits: Vec<StakeEvent>,
    pub slashes: Vec<StakeEvent>,
}

impl StakeRecord {
    pub fn balance(&self) -> i64 {
        self.committed_sats as i64 - self.slashed_sats as i64
    }
}

/// Per-node stake bookkeeping, one `RwLock`-guarded map per the shared-resource policy.
pub struct StakeStore {
    records: RwLock<HashMap<String, StakeRecord>>,
}

impl StakeStore {
    pub fn new() -> Self {
        StakeStore {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn commit(&self, node_id: &str, amount_sats: u64, now_ms: i64) {
        let mut records = self.records.write().expect("mutex poisoned");
        let record = records.entry(node_id.to_string()).or_default();
        record.committed_sats += amount_sats;
        record.commits.push(StakeEvent {
            amount_sats,
            reason: None,
            at_ms: now_ms,
        });
    }

    pub fn slash(&self, node_id: &str, amount_sats: u64, reason: impl Into<String>, now_ms: i64) {
        let mut records = self.records.write().expect("mutex poisoned");
        let record = records.entry(node_id.to_string()).or_default();
        record.slashed_sats += amount_sats;
        record.slashes.push(StakeEvent {
            amount_sats,
            reason: Some(reason.into()),
            at_ms: now_ms,
        });
    }

    pub fn balance(&self, node_id: &str) -> i64 {
        self.records
            .read()
            .expect("mutex poisoned")
            .get(node_id)
            .map(|r| r.balance())
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, StakeRecord> {
        self.records.read().expect("mutex poisoned").clone()
    }

    pub fn restore(&self, snapshot: HashMap<String, StakeRecord>) {
        *self.records.write().expect("mutex poisoned") = snapshot;
    }
}

impl Default for StakeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_then_slash_nets_balance() {
        let store = StakeStore::new();
        store.commit("n1", 1000, 0);
        assert_eq!(store.balance("n1"), 1000);
        store.slash("n1", 400, "missed-heartbeat-streak", 10);
        assert_eq!(store.balance("n1"), 600);
    }

    #[test]
    fn unknown_node_has_zero_balance() {
        let store = StakeStore::new();
        assert_eq!(store.balance("ghost"), 0);
    }

    #[test]
    fn snapshot_round_trips() {
        let store = StakeStore::new();
        store.commit("n1", 500, 0);
        let snap = store.snapshot();
        let restored = StakeStore::new();
        restored.restore(snap);
        assert_eq!(restored.balance("n1"), 500);
    }
}
