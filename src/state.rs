//! `AppState`: the composition root binding every subsystem together for the HTTP layer.

use std::sync::Arc;

use router_types::SigningIdentity;

use crate::config::RouterConfig;
use crate::federation::peer_client::PeerClient;
use crate::federation::relay::Relay;
use crate::federation::{BidCollector, PeerDirectory};
use crate::ln_adapter::HttpLightningAdapter;
use crate::metrics::Metrics;
use crate::payment_engine::PaymentLedger;
use crate::persistence::PersistenceWriter;
use crate::registry::NodeRegistry;
use crate::replaystore::{FileReplayStore, ReplayStore};
use crate::runner::HttpRunner;
use crate::stake::StakeStore;
use crate::workerpool::WorkerPool;

/// Everything a request handler needs, composed once at startup and cheaply `Clone`d
/// (every field is an `Arc` or a cheap value) into each Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RouterConfig>,
    pub signing_identity: Arc<SigningIdentity>,
    pub replay_store: Arc<FileReplayStore>,
    pub registry: Arc<NodeRegistry>,
    pub ledger: Arc<PaymentLedger>,
    pub stake: Arc<StakeStore>,
    pub peers: Arc<PeerDirectory>,
    pub relays: Arc<Vec<Relay>>,
    pub bid_collector: Arc<BidCollector>,
    pub peer_client: Arc<PeerClient>,
    pub offload_slots: Arc<tokio::sync::Semaphore>,
    pub worker_pool: Arc<WorkerPool>,
    pub metrics: Arc<Metrics>,
    pub persistence: Arc<PersistenceWriter>,
    pub runner: Arc<HttpRunner>,
    pub ln_adapter: Option<Arc<HttpLightningAdapter>>,
    pub started_at_ms: i64,
}

impl AppState {
    pub fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as i64
    }
}

/// `loadFactor = meanNodeLoad` across active nodes, used by the offload controller (§4.8).
pub fn mean_node_load(registry: &NodeRegistry, now_ms: i64) -> f64 {
    let nodes = registry.active_nodes(now_ms);
    if nodes.is_empty() {
        return 0.0;
    }
    let total: f64 = nodes.iter().map(|n| n.capacity.load_factor()).sum();
    total / nodes.len() as f64
}
