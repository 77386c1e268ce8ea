//! Federation engine (C7, §4.7): peer directory, capability/price/status announces, and
//! the RFB/BID/AWARD auction protocol over a best-effort pub-sub relay bus.

pub mod auction;
pub mod peer_client;
pub mod relay;

use std::collections::HashMap;
use std::sync::RwLock;

use router_types::ErrorReason;
use router_types::federation_proto::{JobBid, PeerRouter};

#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("no relay accepted the published message")]
    PeerUnreachable,
    #[error("auction closed with no bids")]
    AuctionNoBids,
    #[error("award window has already expired")]
    AwardExpired,
    #[error("federation offload failed: {0}")]
    Failure(String),
}

impl FederationError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            FederationError::PeerUnreachable => ErrorReason::PeerUnreachable,
            FederationError::AuctionNoBids => ErrorReason::AuctionNoBids,
            FederationError::AwardExpired => ErrorReason::AwardExpired,
            FederationError::Failure(_) => ErrorReason::FederationFailure,
        }
    }
}

/// The peer directory: last-known state for every router we've heard an announce from.
#[derive(Default)]
pub struct PeerDirectory {
    peers: RwLock<HashMap<String, PeerRouter>>,
    seen_message_ids: RwLock<std::collections::HashSet<String>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        PeerDirectory::default()
    }

    /// Deduplicates by `messageId`; returns `false` if this message was already seen.
    pub fn dedup(&self, message_id: &str) -> bool {
        self.seen_message_ids
            .write()
            .expect("mutex poisoned")
            .insert(message_id.to_string())
    }

    pub fn upsert(&self, peer: PeerRouter) {
        self.peers.write().expect("mutex poisoned").insert(peer.router_id.clone(), peer);
    }

    pub fn get(&self, router_id: &str) -> Option<PeerRouter> {
        self.peers.read().expect("mutex poisoned").get(router_id).cloned()
    }

    pub fn eligible_peers(&self, now_ms: i64) -> Vec<PeerRouter> {
        self.peers
            .read()
            .expect("mutex poisoned")
            .values()
            .filter(|p| p.backoff_until_ms <= now_ms)
            .cloned()
            .collect()
    }

    pub fn record_failure(&self, router_id: &str) {
        let mut peers = self.peers.write().expect("mutex poisoned");
        if let Some(peer) = peers.get_mut(router_id) {
            peer.failures += 1;
        }
    }

    pub fn snapshot(&self) -> HashMap<String, PeerRouter> {
        self.peers.read().expect("mutex poisoned").clone()
    }

    pub fn restore(&self, peers: HashMap<String, PeerRouter>) {
        *self.peers.write().expect("mutex poisoned") = peers;
    }

    /// Inserts or refreshes a directory entry for `router_id`, running `update` against
    /// either the existing record or a fresh placeholder. Used by every announce handler
    /// (CAPS/PRICE/STATUS) so each only has to describe what it changes.
    pub fn upsert_with<F: FnOnce(&mut PeerRouter)>(&self, router_id: &str, now_ms: i64, update: F) {
        let mut peers = self.peers.write().expect("mutex poisoned");
        let peer = peers.entry(router_id.to_string()).or_insert_with(|| PeerRouter {
            router_id: router_id.to_string(),
            endpoint: String::new(),
            capability_profile: None,
            price_sheet: Vec::new(),
            load_summary: None,
            last_seen_ms: now_ms,
            backoff_until_ms: 0,
            failures: 0,
        });
        update(peer);
        peer.last_seen_ms = now_ms;
    }
}

/// Routes inbound `BID` messages to whichever in-flight auction is waiting on them,
/// keyed by `jobId`. Registered just before an `RFB` is published, unregistered once the
/// auction window closes (§4.7).
#[derive(Default)]
pub struct BidCollector {
    waiters: RwLock<HashMap<String, tokio::sync::mpsc::Sender<JobBid>>>,
}

impl BidCollector {
    pub fn new() -> Self {
        BidCollector::default()
    }

    pub fn register(&self, job_id: &str) -> tokio::sync::mpsc::Receiver<JobBid> {
        let (tx, rx) = tokio::sync::mpsc::channel(32);
        self.waiters.write().expect("mutex poisoned").insert(job_id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, job_id: &str) {
        self.waiters.write().expect("mutex poisoned").remove(job_id);
    }

    /// Forwards a received `BID` to its waiting auction, if one is still open. Silently
    /// dropped otherwise (a late bid for a closed or unknown auction).
    pub fn dispatch(&self, bid: JobBid) {
        let sender = self.waiters.read().expect("mutex poisoned").get(&bid.job_id).cloned();
        if let Some(sender) = sender {
            let _ = sender.try_send(bid);
        }
    }
}
