//! Node registry wire types (§3): `Node`, `NodeManifest`, capability and pricing shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{require_non_empty_string, require_number, FieldError, Validate, ValidationResult};

/// A model a node can serve, with its pricing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub model_id: String,
    pub context_window: u32,
    pub max_tokens: u32,
    pub pricing: Pricing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_estimate_ms: Option<u64>,
}

/// Pricing unit for a capability; token-metered or wall-clock-metered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PricingUnit {
    Token,
    Second,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    pub unit: PricingUnit,
    pub input_rate: f64,
    pub output_rate: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    pub max_concurrent: u32,
    pub current_load: u32,
}

impl Capacity {
    /// Invariant from §3: `0 ≤ currentLoad ≤ maxConcurrent`.
    pub fn is_valid(&self) -> bool {
        self.current_load <= self.max_concurrent
    }

    pub fn load_factor(&self) -> f64 {
        if self.max_concurrent == 0 {
            1.0
        } else {
            self.current_load as f64 / self.max_concurrent as f64
        }
    }
}

/// A live node record, held by the node registry (C4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: String,
    pub key_id: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub capacity: Capacity,
    pub capabilities: Vec<Capability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_ms: Option<i64>,
}

impl Node {
    pub fn supports_model(&self, model_id: &str) -> bool {
        self.capabilities.iter().any(|c| c.model_id == model_id)
    }

    pub fn capability_for(&self, model_id: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.model_id == model_id)
    }
}

/// Operator-signed capability declaration submitted for admission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeManifest {
    pub node_id: String,
    pub key_id: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub max_concurrent: u32,
    pub capabilities: Vec<Capability>,
}

impl Validate for NodeManifest {
    fn validate(&self) -> ValidationResult {
        validate_node_manifest(&serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

/// Structural-only check of a raw `NodeManifest` payload (§4.3, §4.4). Each entry of
/// `capabilities`, if present, must itself be an object — per-field capability checks are
/// left to `serde`'s own decode, which already rejects malformed nested shapes.
pub fn validate_node_manifest(raw: &Value) -> ValidationResult {
    let mut errors = Vec::new();
    let Some(obj) = raw.as_object() else {
        return ValidationResult::errors(vec![FieldError::new("", "must be a JSON object")]);
    };
    errors.extend(require_non_empty_string(obj, "nodeId"));
    errors.extend(require_non_empty_string(obj, "keyId"));
    errors.extend(require_non_empty_string(obj, "endpoint"));
    errors.extend(require_number(obj, "maxConcurrent"));
    match obj.get("capabilities") {
        Some(Value::Array(entries)) => {
            for (i, entry) in entries.iter().enumerate() {
                if !entry.is_object() {
                    errors.push(FieldError::new(format!("capabilities[{i}]"), "must be an object"));
                }
            }
        }
        Some(_) => errors.push(FieldError::new("capabilities", "must be an array")),
        None => errors.push(FieldError::new("capabilities", "required field missing")),
    }
    ValidationResult::errors(errors)
}

/// The admission verdict produced for a `NodeManifest` (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeAdmission {
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl NodeAdmission {
    pub fn accepted() -> Self {
        NodeAdmission {
            eligible: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        NodeAdmission {
            eligible: false,
            reason: Some(reason.into()),
        }
    }
}

/// Per-request scheduling constraints (§4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_trust_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_validity() {
        let ok = Capacity {
            max_concurrent: 10,
            current_load: 10,
        };
        assert!(ok.is_valid());
        let bad = Capacity {
            max_concurrent: 10,
            current_load: 11,
        };
        assert!(!bad.is_valid());
    }

    #[test]
    fn zero_capacity_node_is_fully_loaded() {
        let cap = Capacity {
            max_concurrent: 0,
            current_load: 0,
        };
        assert_eq!(cap.load_factor(), 1.0);
    }

    #[test]
    fn validate_node_manifest_requires_capabilities_array() {
        let raw = serde_json::json!({
            "nodeId": "n1",
            "keyId": "deadbeef",
            "endpoint": "https://n1.example",
            "maxConcurrent": 4,
        });
        let result = validate_node_manifest(&raw);
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.field == "capabilities"));
    }

    #[test]
    fn validate_node_manifest_accepts_well_formed() {
        let raw = serde_json::json!({
            "nodeId": "n1",
            "keyId": "deadbeef",
            "endpoint": "https://n1.example",
            "maxConcurrent": 4,
            "capabilities": [],
        });
        let result = validate_node_manifest(&raw);
        assert!(result.ok, "{:?}", result.errors);
    }
}
