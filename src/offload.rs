//! Offload controller (C8, §4.8): backpressure detection and peer selection.

use router_types::federation_proto::PeerRouter;

/// `loadFactor ≥ offloadThreshold` triggers offload of new inbound `/infer` requests.
pub fn should_offload(load_factor: f64, offload_threshold: f64) -> bool {
    load_factor >= offload_threshold
}

/// Direct peer selection: lowest `pricePerToken + 0.1·peer.loadFactor + jitter` (§4.8).
/// `jitter` is supplied by the caller so the function stays deterministic and testable;
/// production callers draw it from `rand` per attempt to break exact ties across routers.
pub fn pick_direct_peer<'a>(
    peers: &'a [PeerRouter],
    job_type: &str,
    jitter: impl Fn(&str) -> f64,
) -> Option<&'a PeerRouter> {
    peers
        .iter()
        .filter_map(|peer| {
            let price = peer
                .price_sheet
                .iter()
                .find(|entry| entry.job_type == job_type)?
                .price_per_token_msat;
            let load_factor = peer.load_summary.map(|s| s.load_factor).unwrap_or(1.0);
            let cost = price + 0.1 * load_factor + jitter(&peer.router_id);
            Some((peer, cost))
        })
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(peer, _)| peer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_types::federation_proto::{LoadSummary, PriceSheetEntry};

    fn peer(id: &str, price: f64, load: f64) -> PeerRouter {
        PeerRouter {
            router_id: id.into(),
            endpoint: format!("http://{id}.local"),
            capability_profile: None,
            price_sheet: vec![PriceSheetEntry {
                job_type: "chat".into(),
                price_per_token_msat: price,
            }],
            load_summary: Some(LoadSummary {
                load_factor: load,
                active_nodes: 1,
            }),
            last_seen_ms: 0,
            backoff_until_ms: 0,
            failures: 0,
        }
    }

    #[test]
    fn offload_triggers_at_threshold() {
        assert!(should_offload(0.75, 0.75));
        assert!(!should_offload(0.74, 0.75));
    }

    #[test]
    fn direct_selection_picks_cheapest_adjusted_peer() {
        let peers = vec![peer("r1", 10.0, 0.2), peer("r2", 9.0, 0.9)];
        let winner = pick_direct_peer(&peers, "chat", |_| 0.0).unwrap();
        assert_eq!(winner.router_id, "r1");
    }

    #[test]
    fn peer_without_job_type_is_skipped() {
        let peers = vec![peer("r1", 10.0, 0.2)];
        let winner = pick_direct_peer(&peers, "vision", |_| 0.0);
        assert!(winner.is_none());
    }
}
