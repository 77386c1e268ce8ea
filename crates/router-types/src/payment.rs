//! Payment engine wire types (§3, §4.6): challenge/receipt and split settlement.
//!
//! The legacy `PaymentReceipt` shape keyed receipts by a bare `nodeId`; the current shape
//! keys them by `{payeeType, payeeId}`. Per the Open Question decision recorded in
//! `DESIGN.md`, only the current shape is accepted: `#[serde(deny_unknown_fields)]` makes a
//! legacy `nodeId` field a deserialize error, which callers map to `envelope-malformed`
//! rather than silently coercing it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{require_enum, require_non_empty_string, require_number, FieldError, Validate, ValidationResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PayeeType {
    Node,
    Router,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PaymentSplit {
    pub payee_type: PayeeType,
    pub payee_id: String,
    pub amount_sats: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PaymentRequest {
    pub request_id: String,
    pub amount_sats: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<String>,
    pub expires_at_ms: i64,
    pub splits: Vec<PaymentSplit>,
}

impl PaymentRequest {
    pub fn splits_sum(&self) -> u64 {
        self.splits.iter().map(|s| s.amount_sats).sum()
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

impl Validate for PaymentRequest {
    fn validate(&self) -> ValidationResult {
        validate_payment_request(&serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

/// Structural-only check of a raw `PaymentRequest` payload (§4.3, §4.6).
pub fn validate_payment_request(raw: &Value) -> ValidationResult {
    let mut errors = Vec::new();
    let Some(obj) = raw.as_object() else {
        return ValidationResult::errors(vec![FieldError::new("", "must be a JSON object")]);
    };
    errors.extend(require_non_empty_string(obj, "requestId"));
    errors.extend(require_number(obj, "amountSats"));
    errors.extend(require_number(obj, "expiresAtMs"));
    match obj.get("splits") {
        Some(Value::Array(_)) => {}
        Some(_) => errors.push(FieldError::new("splits", "must be an array")),
        None => errors.push(FieldError::new("splits", "required field missing")),
    }
    ValidationResult::errors(errors)
}

/// A settled receipt for one payee leg of a `PaymentRequest`.
///
/// Deliberately rejects the legacy `nodeId`-keyed shape: `deny_unknown_fields` turns a
/// stray `nodeId` field into a deserialize error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PaymentReceipt {
    pub request_id: String,
    pub payee_type: PayeeType,
    pub payee_id: String,
    pub amount_sats: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at_ms: Option<i64>,
}

impl Validate for PaymentReceipt {
    fn validate(&self) -> ValidationResult {
        validate_payment_receipt(&serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

/// Structural-only check of a raw `PaymentReceipt` payload (§4.3, §4.6). Rejects the
/// legacy `nodeId`-keyed shape the same way `deny_unknown_fields` does at decode time.
pub fn validate_payment_receipt(raw: &Value) -> ValidationResult {
    let mut errors = Vec::new();
    let Some(obj) = raw.as_object() else {
        return ValidationResult::errors(vec![FieldError::new("", "must be a JSON object")]);
    };
    errors.extend(require_non_empty_string(obj, "requestId"));
    errors.extend(require_enum(obj, "payeeType", &["node", "router"]));
    errors.extend(require_non_empty_string(obj, "payeeId"));
    errors.extend(require_number(obj, "amountSats"));
    if obj.contains_key("nodeId") {
        errors.push(FieldError::new("nodeId", "legacy field not accepted"));
    }
    ValidationResult::errors(errors)
}

/// The ledger key identifying one payee leg of one request (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaymentLedgerKey {
    pub request_id: String,
    pub payee_type: PayeeType,
    pub payee_id: String,
}

impl PaymentReceipt {
    pub fn ledger_key(&self) -> PaymentLedgerKey {
        PaymentLedgerKey {
            request_id: self.request_id.clone(),
            payee_type: self.payee_type,
            payee_id: self.payee_id.clone(),
        }
    }

    /// `paymentReceiptMatchesRequest` (§4.6): same key, equal amount, equal invoice (if
    /// both present), and equal `sum(splits)`.
    pub fn matches_request(&self, request: &PaymentRequest) -> bool {
        if self.request_id != request.request_id {
            return false;
        }
        if self.amount_sats != request.amount_sats {
            return false;
        }
        if let (Some(a), Some(b)) = (&self.invoice, &request.invoice) {
            if a != b {
                return false;
            }
        }
        self.amount_sats == request.splits_sum()
    }
}

/// Builds the default split for a challenge at issuance time (Open Question decision:
/// centralized here, never recomputed at receipt-acceptance time).
pub fn build_splits(amount_sats: u64, node_id: &str, router_id: &str, fee_bps: u32) -> Vec<PaymentSplit> {
    let router_amount = amount_sats.saturating_mul(fee_bps as u64) / 10_000;
    let node_amount = amount_sats.saturating_sub(router_amount);
    vec![
        PaymentSplit {
            payee_type: PayeeType::Node,
            payee_id: node_id.to_string(),
            amount_sats: node_amount,
        },
        PaymentSplit {
            payee_type: PayeeType::Router,
            payee_id: router_id.to_string(),
            amount_sats: router_amount,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_node_id_shape_is_rejected() {
        let raw = serde_json::json!({
            "requestId": "r1",
            "payeeType": "node",
            "payeeId": "n1",
            "amountSats": 10,
            "nodeId": "n1",
        });
        let result: Result<PaymentReceipt, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }

    #[test]
    fn splits_sum_matches_amount() {
        let splits = build_splits(1000, "n1", "r1", 1000);
        assert_eq!(splits.iter().map(|s| s.amount_sats).sum::<u64>(), 1000);
        assert_eq!(splits[1].amount_sats, 100);
        assert_eq!(splits[0].amount_sats, 900);
    }

    #[test]
    fn receipt_matches_request() {
        let request = PaymentRequest {
            request_id: "r1".into(),
            amount_sats: 10,
            invoice: Some("lnbc1".into()),
            expires_at_ms: 1000,
            splits: build_splits(10, "n1", "r1", 1000),
        };
        let receipt = PaymentReceipt {
            request_id: "r1".into(),
            payee_type: PayeeType::Node,
            payee_id: "n1".into(),
            amount_sats: 10,
            invoice: Some("lnbc1".into()),
            payment_hash: None,
            settled_at_ms: Some(500),
        };
        assert!(receipt.matches_request(&request));
    }

    #[test]
    fn validate_payment_receipt_rejects_legacy_node_id() {
        let raw = serde_json::json!({
            "requestId": "r1",
            "payeeType": "node",
            "payeeId": "n1",
            "amountSats": 10,
            "nodeId": "n1",
        });
        let result = validate_payment_receipt(&raw);
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.field == "nodeId"));
    }

    #[test]
    fn validate_payment_receipt_accepts_well_formed() {
        let raw = serde_json::json!({
            "requestId": "r1",
            "payeeType": "router",
            "payeeId": "r1",
            "amountSats": 10,
        });
        let result = validate_payment_receipt(&raw);
        assert!(result.ok, "{:?}", result.errors);
    }

    #[test]
    fn validate_payment_request_requires_splits_array() {
        let raw = serde_json::json!({
            "requestId": "r1",
            "amountSats": 10,
            "expiresAtMs": 1000,
        });
        let result = validate_payment_request(&raw);
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.field == "splits"));
    }
}
