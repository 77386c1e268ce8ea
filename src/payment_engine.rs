//! Payment challenge/receipt state machine (C6, §4.6).

use std::collections::HashMap;
use std::sync::RwLock;

use router_types::ErrorReason;
use router_types::payment::{PaymentLedgerKey, PaymentReceipt, PaymentRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PaymentState {
    None,
    Challenged,
    Paid,
    Consumed,
    Expired,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment is required")]
    Required,
    #[error("payment request has expired")]
    RequestExpired,
    #[error("receipt amount does not match the outstanding request")]
    AmountMismatch,
    #[error("receipt split total does not match its amount")]
    SplitTotalMismatch,
    #[error("receipt invoice does not match the outstanding request")]
    InvoiceMismatch,
    #[error("receipt signature is invalid")]
    SignatureInvalid,
    #[error("lightning adapter reports the invoice is unsettled")]
    Unsettled,
    #[error("request has already been consumed by a prior receipt-backed retry")]
    AlreadyConsumed,
}

impl PaymentError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            PaymentError::Required => ErrorReason::PaymentRequired,
            PaymentError::RequestExpired => ErrorReason::PaymentRequestExpired,
            PaymentError::AmountMismatch => ErrorReason::PaymentAmountMismatch,
            PaymentError::SplitTotalMismatch => ErrorReason::PaymentSplitTotalMismatch,
            PaymentError::InvoiceMismatch => ErrorReason::PaymentInvoiceMismatch,
            PaymentError::SignatureInvalid => ErrorReason::PaymentSignatureInvalid,
            PaymentError::Unsettled => ErrorReason::PaymentUnsettled,
            PaymentError::AlreadyConsumed => ErrorReason::RequestAlreadyConsumed,
        }
    }
}

/// Outstanding requests and accepted receipts, keyed by `requestId` and by the ledger key
/// `(requestId, payeeType, payeeId)` respectively (§3). A `requestId`'s coarse state
/// machine (`NONE → CHALLENGED → PAID → CONSUMED`/`EXPIRED`) is derived, not stored
/// separately, from whether a request/receipt pair exists for it.
#[derive(Default)]
pub struct PaymentLedger {
    requests: RwLock<HashMap<String, PaymentRequest>>,
    receipts: RwLock<HashMap<PaymentLedgerKey, PaymentReceipt>>,
    consumed: RwLock<std::collections::HashSet<String>>,
}

impl PaymentLedger {
    pub fn new() -> Self {
        PaymentLedger::default()
    }

    pub fn issue_challenge(&self, request: PaymentRequest) {
        self.requests
            .write()
            .expect("mutex poisoned")
            .insert(request.request_id.clone(), request);
    }

    pub fn outstanding(&self, request_id: &str) -> Option<PaymentRequest> {
        self.requests.read().expect("mutex poisoned").get(request_id).cloned()
    }

    pub fn state(&self, request_id: &str, now_ms: i64) -> PaymentState {
        if self.consumed.read().expect("mutex poisoned").contains(request_id) {
            return PaymentState::Consumed;
        }
        let has_receipt = self
            .receipts
            .read()
            .expect("mutex poisoned")
            .keys()
            .any(|k| k.request_id == request_id);
        if has_receipt {
            return PaymentState::Paid;
        }
        match self.outstanding(request_id) {
            Some(request) if request.is_expired(now_ms) => PaymentState::Expired,
            Some(_) => PaymentState::Challenged,
            None => PaymentState::None,
        }
    }

    /// Validates a receipt against its matching outstanding request, per §4.6's
    /// `paymentReceiptMatchesRequest`, and persists it on acceptance.
    pub fn accept_receipt(&self, receipt: PaymentReceipt, now_ms: i64) -> Result<(), PaymentError> {
        let request = self
            .outstanding(&receipt.request_id)
            .ok_or(PaymentError::AmountMismatch)?;
        if request.is_expired(now_ms) {
            return Err(PaymentError::RequestExpired);
        }
        if receipt.amount_sats != request.amount_sats {
            return Err(PaymentError::AmountMismatch);
        }
        if let (Some(a), Some(b)) = (&receipt.invoice, &request.invoice) {
            if a != b {
                return Err(PaymentError::InvoiceMismatch);
            }
        }
        if receipt.amount_sats != request.splits_sum() {
            return Err(PaymentError::SplitTotalMismatch);
        }
        self.receipts
            .write()
            .expect("mutex poisoned")
            .insert(receipt.ledger_key(), receipt);
        Ok(())
    }

    pub fn receipts_for(&self, request_id: &str) -> Vec<PaymentReceipt> {
        self.receipts
            .read()
            .expect("mutex poisoned")
            .values()
            .filter(|r| r.request_id == request_id)
            .cloned()
            .collect()
    }

    /// `CHALLENGED`/`PAID` → `CONSUMED`: called when an `/infer` retry with a matching
    /// receipt is actually dispatched. Idempotent: a second call for the same
    /// `requestId` is a no-op so a concurrent retry observes success rather than error.
    pub fn mark_consumed(&self, request_id: &str) {
        self.consumed.write().expect("mutex poisoned").insert(request_id.to_string());
    }

    pub fn is_consumed(&self, request_id: &str) -> bool {
        self.consumed.read().expect("mutex poisoned").contains(request_id)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            requests: self.requests.read().expect("mutex poisoned").clone(),
            receipts: self
                .receipts
                .read()
                .expect("mutex poisoned")
                .iter()
                .map(|(k, v)| (ledger_key_string(k), v.clone()))
                .collect(),
            consumed: self.consumed.read().expect("mutex poisoned").iter().cloned().collect(),
        }
    }

    pub fn restore(&self, snapshot: LedgerSnapshot) {
        *self.requests.write().expect("mutex poisoned") = snapshot.requests;
        let mut receipts = self.receipts.write().expect("mutex poisoned");
        receipts.clear();
        for (_, receipt) in snapshot.receipts {
            receipts.insert(receipt.ledger_key(), receipt);
        }
        *self.consumed.write().expect("mutex poisoned") = snapshot.consumed.into_iter().collect();
    }
}

fn ledger_key_string(key: &PaymentLedgerKey) -> String {
    format!("{}:{:?}:{}", key.request_id, key.payee_type, key.payee_id)
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct LedgerSnapshot {
    pub requests: HashMap<String, PaymentRequest>,
    pub receipts: HashMap<String, PaymentReceipt>,
    pub consumed: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_types::payment::build_splits;

    fn sample_request() -> PaymentRequest {
        PaymentRequest {
            request_id: "r1".into(),
            amount_sats: 10,
            invoice: Some("lnbc1".into()),
            expires_at_ms: 60_000,
            splits: build_splits(10, "n1", "router1", 1000),
        }
    }

    #[test]
    fn accepted_receipt_transitions_to_paid() {
        let ledger = PaymentLedger::new();
        ledger.issue_challenge(sample_request());
        assert_eq!(ledger.state("r1", 0), PaymentState::Challenged);
        let receipt = PaymentReceipt {
            request_id: "r1".into(),
            payee_type: router_types::payment::PayeeType::Node,
            payee_id: "n1".into(),
            amount_sats: 10,
            invoice: Some("lnbc1".into()),
            payment_hash: None,
            settled_at_ms: Some(500),
        };
        ledger.accept_receipt(receipt, 0).unwrap();
        assert_eq!(ledger.state("r1", 0), PaymentState::Paid);
    }

    #[test]
    fn expired_request_rejects_receipt() {
        let ledger = PaymentLedger::new();
        ledger.issue_challenge(sample_request());
        let receipt = PaymentReceipt {
            request_id: "r1".into(),
            payee_type: router_types::payment::PayeeType::Node,
            payee_id: "n1".into(),
            amount_sats: 10,
            invoice: Some("lnbc1".into()),
            payment_hash: None,
            settled_at_ms: None,
        };
        let err = ledger.accept_receipt(receipt, 70_000).unwrap_err();
        assert!(matches!(err, PaymentError::RequestExpired));
    }

    #[test]
    fn mark_consumed_is_idempotent() {
        let ledger = PaymentLedger::new();
        ledger.mark_consumed("r1");
        ledger.mark_consumed("r1");
        assert!(ledger.is_consumed("r1"));
    }
}
