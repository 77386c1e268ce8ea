//! The stable string error tags surfaced to clients in `{error, details?}` bodies (§7).
//!
//! Each variant serializes to exactly the tag named in the error taxonomy, so the wire
//! representation never drifts from a Rust-side rename.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorReason {
    EnvelopeMalformed,
    EnvelopeSignatureInvalid,
    EnvelopeKeyMismatch,
    NonceReused,
    TsOutOfWindow,

    NoCapableNode,
    CapacityExhausted,
    ConstraintUnmet,
    RouterSaturated,

    PaymentRequired,
    PaymentRequestExpired,
    PaymentAmountMismatch,
    PaymentSplitTotalMismatch,
    PaymentInvoiceMismatch,
    PaymentSignatureInvalid,
    PaymentUnsettled,
    RequestAlreadyConsumed,

    PeerUnreachable,
    AuctionNoBids,
    AwardExpired,
    FederationFailure,

    RunnerClientError,
    RunnerUnavailable,
    PersistFailed,
    Internal,
}

impl ErrorReason {
    /// The stable tag string, identical to its serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReason::EnvelopeMalformed => "envelope-malformed",
            ErrorReason::EnvelopeSignatureInvalid => "envelope-signature-invalid",
            ErrorReason::EnvelopeKeyMismatch => "envelope-key-mismatch",
            ErrorReason::NonceReused => "nonce-reused",
            ErrorReason::TsOutOfWindow => "ts-out-of-window",
            ErrorReason::NoCapableNode => "no-capable-node",
            ErrorReason::CapacityExhausted => "capacity-exhausted",
            ErrorReason::ConstraintUnmet => "constraint-unmet",
            ErrorReason::RouterSaturated => "router-saturated",
            ErrorReason::PaymentRequired => "payment-required",
            ErrorReason::PaymentRequestExpired => "payment-request-expired",
            ErrorReason::PaymentAmountMismatch => "payment-amount-mismatch",
            ErrorReason::PaymentSplitTotalMismatch => "payment-split-total-mismatch",
            ErrorReason::PaymentInvoiceMismatch => "payment-invoice-mismatch",
            ErrorReason::PaymentSignatureInvalid => "payment-signature-invalid",
            ErrorReason::PaymentUnsettled => "payment-unsettled",
            ErrorReason::RequestAlreadyConsumed => "request-already-consumed",
            ErrorReason::PeerUnreachable => "peer-unreachable",
            ErrorReason::AuctionNoBids => "auction-no-bids",
            ErrorReason::AwardExpired => "award-expired",
            ErrorReason::FederationFailure => "federation-failure",
            ErrorReason::RunnerClientError => "runner-client-error",
            ErrorReason::RunnerUnavailable => "runner-unavailable",
            ErrorReason::PersistFailed => "persist-failed",
            ErrorReason::Internal => "internal",
        }
    }

    /// The HTTP status this reason maps to at the edge of the HTTP surface (§7, §10.2).
    pub fn http_status(self) -> u16 {
        match self {
            ErrorReason::EnvelopeMalformed => 400,
            ErrorReason::EnvelopeSignatureInvalid
            | ErrorReason::EnvelopeKeyMismatch
            | ErrorReason::NonceReused
            | ErrorReason::TsOutOfWindow
            | ErrorReason::PaymentSignatureInvalid => 401,
            ErrorReason::PaymentRequired => 402,
            ErrorReason::PaymentRequestExpired
            | ErrorReason::PaymentAmountMismatch
            | ErrorReason::PaymentSplitTotalMismatch
            | ErrorReason::PaymentInvoiceMismatch
            | ErrorReason::PaymentUnsettled
            | ErrorReason::RequestAlreadyConsumed => 409,
            ErrorReason::NoCapableNode
            | ErrorReason::ConstraintUnmet
            | ErrorReason::CapacityExhausted => 422,
            ErrorReason::RouterSaturated => 503,
            ErrorReason::PeerUnreachable
            | ErrorReason::AuctionNoBids
            | ErrorReason::AwardExpired
            | ErrorReason::FederationFailure => 502,
            ErrorReason::RunnerClientError => 400,
            ErrorReason::RunnerUnavailable => 502,
            ErrorReason::PersistFailed | ErrorReason::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_serde() {
        for reason in [
            ErrorReason::EnvelopeMalformed,
            ErrorReason::NonceReused,
            ErrorReason::PaymentUnsettled,
            ErrorReason::FederationFailure,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn payment_required_maps_to_402() {
        assert_eq!(ErrorReason::PaymentRequired.http_status(), 402);
    }
}
