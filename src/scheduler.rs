//! Node-selection scheduler (C5, §4.5): filter candidates, score, pick.

use router_types::model::{Constraints, Node, PricingUnit};
use router_types::ErrorReason;

pub const EPSILON: f64 = 1e-9;
pub const DEFAULT_WEIGHTS: Weights = Weights {
    price: 1.0,
    load: 0.5,
    trust: 0.2,
};

#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub price: f64,
    pub load: f64,
    pub trust: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("no node supports the requested model")]
    NoCapableNode,
    #[error("all capable nodes are at capacity")]
    CapacityExhausted,
    #[error("no node satisfies the request's constraints")]
    ConstraintUnmet,
}

impl SchedulerError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            SchedulerError::NoCapableNode => ErrorReason::NoCapableNode,
            SchedulerError::CapacityExhausted => ErrorReason::CapacityExhausted,
            SchedulerError::ConstraintUnmet => ErrorReason::ConstraintUnmet,
        }
    }
}

/// Parameters the scheduler needs to price and size a candidate node for a request.
pub struct RequestShape<'a> {
    pub model_id: &'a str,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub constraints: Option<&'a Constraints>,
}

fn satisfies_constraints(node: &Node, constraints: Option<&Constraints>) -> bool {
    let Some(c) = constraints else { return true };
    if !c.regions.is_empty() {
        match &node.region {
            Some(region) if c.regions.contains(region) => {}
            _ => return false,
        }
    }
    if let Some(min_trust) = c.min_trust_score {
        if node.trust_score.unwrap_or(0.0) < min_trust {
            return false;
        }
    }
    true
}

fn price_for(node: &Node, request: &RequestShape) -> Option<f64> {
    let capability = node.capability_for(request.model_id)?;
    let price = match capability.pricing.unit {
        PricingUnit::Token => {
            capability.pricing.input_rate * request.input_tokens as f64
                + capability.pricing.output_rate * request.output_tokens as f64
        }
        PricingUnit::Second => {
            capability.pricing.input_rate
                * (capability.latency_estimate_ms.unwrap_or(0) as f64 / 1000.0)
        }
    };
    Some(price)
}

fn score(node: &Node, price: f64, weights: Weights) -> f64 {
    let load_factor = node.capacity.load_factor();
    let trust = node.trust_score.unwrap_or(0.0) / 100.0;
    weights.price * (1.0 / (price + EPSILON)) + weights.load * (1.0 - load_factor) + weights.trust * trust
}

/// Filters `nodes` to those eligible for `request`, scores them, and returns the
/// highest-scoring candidate. Ties break by lower `currentLoad`, then lexicographic
/// `nodeId` (§4.5).
pub fn select<'a>(
    nodes: &'a [Node],
    request: &RequestShape,
    weights: Weights,
) -> Result<(&'a Node, f64), SchedulerError> {
    let capable: Vec<&Node> = nodes.iter().filter(|n| n.supports_model(request.model_id)).collect();
    if capable.is_empty() {
        return Err(SchedulerError::NoCapableNode);
    }
    let constrained: Vec<&Node> = capable
        .iter()
        .copied()
        .filter(|n| satisfies_constraints(n, request.constraints))
        .collect();
    if constrained.is_empty() {
        return Err(SchedulerError::ConstraintUnmet);
    }
    let has_capacity: Vec<&Node> = constrained
        .iter()
        .copied()
        .filter(|n| n.capacity.current_load < n.capacity.max_concurrent)
        .collect();
    if has_capacity.is_empty() {
        return Err(SchedulerError::CapacityExhausted);
    }
    let priced: Vec<(&Node, f64)> = has_capacity
        .iter()
        .copied()
        .filter_map(|n| price_for(n, request).map(|p| (n, p)))
        .collect();
    let max_price = request.constraints.and_then(|c| c.max_price);
    let within_ceiling: Vec<(&Node, f64)> = match max_price {
        Some(max_price) => priced.into_iter().filter(|(_, p)| *p <= max_price).collect(),
        None => priced,
    };
    if within_ceiling.is_empty() {
        return Err(SchedulerError::ConstraintUnmet);
    }
    let mut scored: Vec<(&Node, f64, f64)> = within_ceiling
        .into_iter()
        .map(|(n, p)| (n, p, score(n, p, weights)))
        .collect();
    scored.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.capacity.current_load.cmp(&b.0.capacity.current_load))
            .then_with(|| a.0.node_id.cmp(&b.0.node_id))
    });
    let (node, price, _) = scored[0];
    Ok((node, price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_types::model::{Capability, Capacity, Pricing};

    fn node(id: &str, load: u32, max: u32, trust: Option<f64>) -> Node {
        Node {
            node_id: id.into(),
            key_id: "k".into(),
            endpoint: "http://x".into(),
            region: None,
            capacity: Capacity {
                max_concurrent: max,
                current_load: load,
            },
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
            trust_score: trust,
            last_heartbeat_ms: None,
        }
    }

    #[test]
    fn happy_quote_selects_only_candidate() {
        let nodes = vec![node("n1", 2, 10, None)];
        let request = RequestShape {
            model_id: "m",
            input_tokens: 100,
            output_tokens: 50,
            constraints: None,
        };
        let (selected, price) = select(&nodes, &request, DEFAULT_WEIGHTS).unwrap();
        assert_eq!(selected.node_id, "n1");
        assert!((price - 2.0).abs() < 1e-9);
    }

    #[test]
    fn zero_capacity_node_never_selected() {
        let nodes = vec![node("n1", 0, 0, None)];
        let request = RequestShape {
            model_id: "m",
            input_tokens: 1,
            output_tokens: 1,
            constraints: None,
        };
        let err = select(&nodes, &request, DEFAULT_WEIGHTS).unwrap_err();
        assert!(matches!(err, SchedulerError::CapacityExhausted));
    }

    #[test]
    fn no_nodes_returns_no_capable_node() {
        let nodes: Vec<Node> = vec![];
        let request = RequestShape {
            model_id: "m",
            input_tokens: 1,
            output_tokens: 1,
            constraints: None,
        };
        let err = select(&nodes, &request, DEFAULT_WEIGHTS).unwrap_err();
        assert!(matches!(err, SchedulerError::NoCapableNode));
    }

    #[test]
    fn ties_break_by_lower_load_then_node_id() {
        let nodes = vec![node("n2", 1, 10, None), node("n1", 1, 10, None)];
        let request = RequestShape {
            model_id: "m",
            input_tokens: 100,
            output_tokens: 50,
            constraints: None,
        };
        let (selected, _) = select(&nodes, &request, DEFAULT_WEIGHTS).unwrap();
        assert_eq!(selected.node_id, "n1");
    }
}
