//! The RFB → BID → AWARD auction protocol (§4.7).

use router_types::federation_proto::{Award, Bid, JobBid, RequestForBid};

pub const DEFAULT_LAMBDA: f64 = 1e-3;
pub const DEFAULT_AUCTION_TIMEOUT_MS: u64 = 500;

fn bid_cost(bid: &Bid, lambda: f64) -> f64 {
    bid.price_msat as f64 + lambda * bid.eta_ms as f64
}

/// Picks the winning bid: minimizes `priceMsat + λ·etaMs`, ties broken by higher peer
/// `trustScore` then lexicographically lower `routerId` (§4.7).
pub fn pick_winner(bids: &[JobBid], lambda: f64) -> Option<&JobBid> {
    bids.iter().min_by(|a, b| {
        let cost_a = bid_cost(&a.bid, lambda);
        let cost_b = bid_cost(&b.bid, lambda);
        cost_a
            .partial_cmp(&cost_b)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.trust_score
                    .unwrap_or(0.0)
                    .partial_cmp(&a.trust_score.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.router_id.cmp(&b.router_id))
    })
}

/// Builds an `Award` for the winning bid, validated against the RFB's price ceiling.
pub fn build_award(rfb: &RequestForBid, winner: &JobBid, now_at_publish_ms: i64, award_window_ms: i64) -> Award {
    let award = Award {
        job_id: rfb.job_id.clone(),
        winner_router_id: winner.router_id.clone(),
        accepted_price_msat: winner.bid.price_msat.min(rfb.max_price_msat),
        award_expiry: now_at_publish_ms + award_window_ms,
    };
    debug_assert!(award.is_valid_against(rfb, now_at_publish_ms));
    award
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_bid(router_id: &str, price: u64, eta: u64, trust: Option<f64>) -> JobBid {
        JobBid {
            job_id: "j1".into(),
            router_id: router_id.into(),
            bid: Bid {
                job_id: "j1".into(),
                price_msat: price,
                eta_ms: eta,
            },
            trust_score: trust,
        }
    }

    #[test]
    fn lowest_cost_wins() {
        let bids = vec![job_bid("r2", 1000, 40, None), job_bid("r1", 900, 40, None)];
        let winner = pick_winner(&bids, DEFAULT_LAMBDA).unwrap();
        assert_eq!(winner.router_id, "r1");
    }

    #[test]
    fn ties_break_by_trust_then_router_id() {
        let bids = vec![
            job_bid("r2", 1000, 0, Some(50.0)),
            job_bid("r1", 1000, 0, Some(90.0)),
        ];
        let winner = pick_winner(&bids, DEFAULT_LAMBDA).unwrap();
        assert_eq!(winner.router_id, "r1");
    }

    #[test]
    fn award_never_exceeds_rfb_ceiling() {
        let rfb = RequestForBid {
            job_id: "j1".into(),
            job_hash: "h".into(),
            job_type: "chat".into(),
            deadline_ms: 1_000,
            max_price_msat: 500,
            validation_mode: "none".into(),
        };
        let winner = job_bid("r1", 600, 10, None);
        let award = build_award(&rfb, &winner, 0, 30_000);
        assert_eq!(award.accepted_price_msat, 500);
        assert!(award.is_valid_against(&rfb, 0));
    }
}
