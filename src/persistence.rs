//! Crash-recoverable snapshot/restore of all mutable router state (C9, §4.9).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::federation::PeerDirectory;
use crate::payment_engine::{LedgerSnapshot, PaymentLedger};
use crate::registry::{NodeRegistry, RegistrySnapshot};
use crate::stake::{StakeRecord, StakeStore};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to write snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize snapshot: {0}")]
    Serde(#[from] serde_json::Error),
}

/// The whole-state snapshot written to `ROUTER_STATE_FILE` (§4.9). Forward-compatible:
/// unknown keys are ignored on load via `serde(default)` on every field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub registry: RegistrySnapshot,
    #[serde(default)]
    pub ledger: LedgerSnapshot,
    #[serde(default)]
    pub stake: std::collections::HashMap<String, StakeRecord>,
    #[serde(default)]
    pub peers: std::collections::HashMap<String, router_types::federation_proto::PeerRouter>,
    #[serde(default)]
    pub timestamp_ms: i64,
}

/// Writes the snapshot atomically (tmp + rename) and debounces concurrent callers: at
/// most one write is in flight, and a write requested while one is running queues a
/// single follow-up via the `pending` flag.
pub struct PersistenceWriter {
    path: PathBuf,
    in_flight: AtomicBool,
    pending: AtomicBool,
}

impl PersistenceWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PersistenceWriter {
            path: path.into(),
            in_flight: AtomicBool::new(false),
            pending: AtomicBool::new(false),
        }
    }

    /// Best-effort load: a missing or malformed file yields an empty snapshot (§4.9),
    /// logged as a warning rather than surfaced as an error.
    pub fn load(path: &Path) -> Snapshot {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %path.display(), "snapshot file is corrupt, starting empty");
                Snapshot::default()
            }),
            Err(_) => Snapshot::default(),
        }
    }

    /// Writes `snapshot` if no write is currently in flight; otherwise marks a pending
    /// follow-up and returns immediately. Callers on a fixed-interval timer should call
    /// this every tick; `flush` should be used for the graceful-shutdown write.
    pub async fn write_debounced(self: &Arc<Self>, snapshot: Snapshot) -> Result<(), PersistError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.pending.store(true, Ordering::Release);
            return Ok(());
        }
        let result = self.write_now(&snapshot).await;
        self.in_flight.store(false, Ordering::Release);
        if self.pending.swap(false, Ordering::AcqRel) {
            // A follow-up was requested while we were writing; the caller's next tick
            // will observe fresh state, so nothing further to do here.
        }
        result
    }

    /// Forces an immediate write regardless of in-flight state, for graceful shutdown.
    pub async fn flush(&self, snapshot: Snapshot) -> Result<(), PersistError> {
        self.write_now(&snapshot).await
    }

    async fn write_now(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| format!("{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| "router-state.tmp".to_string());
    tmp.set_file_name(file_name);
    tmp
}

/// Builds a point-in-time snapshot from the live subsystems (§5: "not serializable with
/// concurrent handler mutations" — each map is read independently, not under one lock).
pub fn build_snapshot(
    registry: &NodeRegistry,
    ledger: &PaymentLedger,
    stake: &StakeStore,
    peers: &PeerDirectory,
    now_ms: i64,
) -> Snapshot {
    Snapshot {
        registry: registry.snapshot(),
        ledger: ledger.snapshot(),
        stake: stake.snapshot(),
        peers: peers.snapshot(),
        timestamp_ms: now_ms,
    }
}

pub fn restore_snapshot(
    snapshot: Snapshot,
    registry: &NodeRegistry,
    ledger: &PaymentLedger,
    stake: &StakeStore,
    peers: &PeerDirectory,
) {
    registry.restore(snapshot.registry);
    ledger.restore(snapshot.ledger);
    stake.restore(snapshot.stake);
    peers.restore(snapshot.peers);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("persist-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");
        let writer = Arc::new(PersistenceWriter::new(&path));
        let mut snapshot = Snapshot::default();
        snapshot.timestamp_ms = 42;
        writer.flush(snapshot).await.unwrap();
        let reloaded = PersistenceWriter::load(&path);
        assert_eq!(reloaded.timestamp_ms, 42);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let path = std::env::temp_dir().join("definitely-does-not-exist.json");
        let snapshot = PersistenceWriter::load(&path);
        assert_eq!(snapshot.timestamp_ms, 0);
    }
}
