//! Nonce + timestamp replay protection (C2, §4.2).
//!
//! `check` is the only way an entry enters the store: on `Ok` the `(nonce, ts)` pair is
//! inserted; on a rejection nothing is inserted (Open Question decision (c) in
//! `DESIGN.md`). `cleanup` is a separate, idempotent, rate-limited operation that never
//! runs more than once per second.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use router_types::ErrorReason;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("nonce already used within the replay window")]
    NonceReused,
    #[error("timestamp is outside the replay window")]
    TsOutOfWindow,
    #[error("failed to persist replay store: {0}")]
    Io(#[from] std::io::Error),
}

impl ReplayError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            ReplayError::NonceReused => ErrorReason::NonceReused,
            ReplayError::TsOutOfWindow => ErrorReason::TsOutOfWindow,
            ReplayError::Io(_) => ErrorReason::PersistFailed,
        }
    }
}

/// Contract implemented by both backing stores (§4.2).
pub trait ReplayStore: Send + Sync {
    /// Checks `(nonce, ts)` against the window and, on acceptance, inserts it.
    fn check(&self, nonce: &str, ts: i64, now_ms: i64, window_ms: i64) -> Result<(), ReplayError>;

    /// Drops entries older than `now - window`. Idempotent; callers are expected to
    /// rate-limit their own calls to at most once per second.
    fn cleanup(&self, now_ms: i64, window_ms: i64);
}

/// In-memory replay store backed by a single mutex-guarded map.
#[derive(Default)]
pub struct MemoryReplayStore {
    entries: Mutex<HashMap<String, i64>>,
    last_cleanup: Mutex<Option<Instant>>,
}

impl MemoryReplayStore {
    pub fn new() -> Self {
        MemoryReplayStore::default()
    }

    fn check_locked(entries: &mut HashMap<String, i64>, nonce: &str, ts: i64, now_ms: i64, window_ms: i64) -> Result<(), ReplayError> {
        if now_ms - ts > window_ms || ts > now_ms {
            return Err(ReplayError::TsOutOfWindow);
        }
        if entries.contains_key(nonce) {
            return Err(ReplayError::NonceReused);
        }
        entries.insert(nonce.to_string(), ts);
        Ok(())
    }
}

impl ReplayStore for MemoryReplayStore {
    fn check(&self, nonce: &str, ts: i64, now_ms: i64, window_ms: i64) -> Result<(), ReplayError> {
        let mut entries = self.entries.lock().expect("replay store mutex poisoned");
        Self::check_locked(&mut entries, nonce, ts, now_ms, window_ms)
    }

    fn cleanup(&self, now_ms: i64, window_ms: i64) {
        let mut last = self.last_cleanup.lock().expect("mutex poisoned");
        if let Some(prev) = *last {
            if prev.elapsed() < Duration::from_secs(1) {
                return;
            }
        }
        *last = Some(Instant::now());
        drop(last);
        let mut entries = self.entries.lock().expect("replay store mutex poisoned");
        entries.retain(|_, ts| now_ms - *ts <= window_ms);
    }
}

#[derive(Serialize, Deserialize, Default)]
struct FileReplaySnapshot {
    entries: HashMap<String, i64>,
}

/// File-backed replay store: debounced atomic writes (tmp + rename), reloaded on
/// construction, tolerant of a missing or corrupt file (treated as empty per §4.2).
pub struct FileReplayStore {
    path: PathBuf,
    memory: MemoryReplayStore,
    last_write: Mutex<Option<Instant>>,
}

impl FileReplayStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<FileReplaySnapshot>(&bytes).ok())
            .unwrap_or_default();
        let memory = MemoryReplayStore::new();
        {
            let mut entries = memory.entries.lock().expect("mutex poisoned");
            *entries = snapshot.entries;
        }
        FileReplayStore {
            path,
            memory,
            last_write: Mutex::new(None),
        }
    }

    fn write_through(&self) -> Result<(), ReplayError> {
        let mut last = self.last_write.lock().expect("mutex poisoned");
        if let Some(prev) = *last {
            if prev.elapsed() < Duration::from_secs(1) {
                return Ok(());
            }
        }
        *last = Some(Instant::now());
        drop(last);
        self.flush()
    }

    /// Forces an immediate write, bypassing the debounce window. Used on graceful
    /// shutdown.
    pub fn flush(&self) -> Result<(), ReplayError> {
        let entries = self
            .memory
            .entries
            .lock()
            .expect("mutex poisoned")
            .clone();
        let snapshot = FileReplaySnapshot { entries };
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| ReplayError::Io(std::io::Error::other(e)))?;
        let tmp_path = tmp_path_for(&self.path);
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| format!("{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| "replay-store.tmp".to_string());
    tmp.set_file_name(file_name);
    tmp
}

impl ReplayStore for FileReplayStore {
    fn check(&self, nonce: &str, ts: i64, now_ms: i64, window_ms: i64) -> Result<(), ReplayError> {
        self.memory.check(nonce, ts, now_ms, window_ms)?;
        self.write_through()
    }

    fn cleanup(&self, now_ms: i64, window_ms: i64) {
        self.memory.cleanup(now_ms, window_ms);
        let _ = self.write_through();
    }
}
