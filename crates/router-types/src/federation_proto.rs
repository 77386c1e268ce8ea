//! Inter-router federation wire types (§3, §4.7): control messages, auction payloads,
//! and peer directory records.

use serde::{Deserialize, Serialize};

use crate::envelope::{canonical_signing_bytes, SigningIdentity};

/// Nostr-style relay "kind" numbers the wire section assigns to each control message type.
pub mod kinds {
    pub const CAPS: u32 = 30020;
    pub const PRICE: u32 = 30021;
    pub const STATUS: u32 = 30022;
    pub const RECEIPT_SUMMARY: u32 = 30023;
    pub const RFB: u32 = 20020;
    pub const BID: u32 = 20021;
    pub const AWARD: u32 = 20022;
    pub const CANCEL: u32 = 20023;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessageType {
    CapsAnnounce,
    PriceAnnounce,
    StatusAnnounce,
    Rfb,
    Bid,
    Award,
    Cancel,
    ReceiptSummary,
}

impl ControlMessageType {
    pub fn relay_kind(self) -> u32 {
        match self {
            ControlMessageType::CapsAnnounce => kinds::CAPS,
            ControlMessageType::PriceAnnounce => kinds::PRICE,
            ControlMessageType::StatusAnnounce => kinds::STATUS,
            ControlMessageType::ReceiptSummary => kinds::RECEIPT_SUMMARY,
            ControlMessageType::Rfb => kinds::RFB,
            ControlMessageType::Bid => kinds::BID,
            ControlMessageType::Award => kinds::AWARD,
            ControlMessageType::Cancel => kinds::CANCEL,
        }
    }
}

/// A signed inter-router message, chained via `prevMessageId` for gap detection (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouterControlMessage<T> {
    #[serde(rename = "type")]
    pub message_type: ControlMessageType,
    pub version: u32,
    pub router_id: String,
    pub message_id: String,
    pub timestamp: i64,
    pub expiry: i64,
    pub payload: T,
    pub sig: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_message_id: Option<String>,
}

impl<T> RouterControlMessage<T> {
    /// §3 invariant: `timestamp ≤ now`, `expiry > now` on receipt.
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        self.timestamp <= now_ms && self.expiry > now_ms
    }
}

impl<T: Serialize> RouterControlMessage<T> {
    /// Signs a fresh control message. The signing input reuses the same canonical-JSON
    /// scheme as [`crate::envelope::Envelope`] (`{payload, nonce, ts, keyId}`), with
    /// `messageId` standing in for `nonce` and `timestamp` for `ts` — one signature
    /// discipline for every signed artifact on the wire (§4.1).
    pub fn sign(
        message_type: ControlMessageType,
        router_id: String,
        message_id: String,
        timestamp: i64,
        expiry: i64,
        payload: T,
        identity: &SigningIdentity,
        prev_message_id: Option<String>,
    ) -> Result<Self, crate::envelope::EnvelopeError> {
        let key_id = identity.key_id();
        let bytes = canonical_signing_bytes(&payload, &message_id, timestamp, &key_id)?;
        let sig = hex::encode(identity.sign_bytes(&bytes));
        Ok(RouterControlMessage {
            message_type,
            version: 1,
            router_id,
            message_id,
            timestamp,
            expiry,
            payload,
            sig,
            prev_message_id,
        })
    }

    /// Verifies the message's signature against its own `routerId`-derived `keyId`.
    /// Control messages don't carry a separate `keyId` field; by convention the signer's
    /// key is whatever key the relay/peer directory associates with `routerId`, passed
    /// in explicitly by the caller (the directory entry recorded at first announce, or
    /// the bootstrap-configured key for a peer this router has never seen).
    pub fn verify_against(&self, key_id: &str) -> bool {
        let bytes = match canonical_signing_bytes(&self.payload, &self.message_id, self.timestamp, key_id) {
            Ok(b) => b,
            Err(_) => return false,
        };
        let Ok(sig_bytes) = hex::decode(&self.sig) else { return false };
        let Ok(key) = crate::envelope::KeyMaterial::parse(key_id) else { return false };
        crate::envelope::verify_raw(&key, &bytes, &sig_bytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceSheetEntry {
    pub job_type: String,
    pub price_per_token_msat: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityProfile {
    pub router_id: String,
    /// The announcing router's signing key, in the same encoding `Envelope::keyId` uses.
    /// Carried here rather than as a separate `RouterControlMessage` field because a
    /// `CAPS_ANNOUNCE` is how a peer is first introduced at all — exactly how a `Node`
    /// carries its own `keyId` in its admission manifest (§3).
    pub key_id: String,
    pub endpoint: String,
    pub job_types: Vec<String>,
    pub price_sheet: Vec<PriceSheetEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    pub load_factor: f64,
    pub active_nodes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusAnnouncePayload {
    pub load_summary: LoadSummary,
}

/// A request-for-bid: a router publishing that it wants to offload a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestForBid {
    pub job_id: String,
    pub job_hash: String,
    pub job_type: String,
    pub deadline_ms: i64,
    pub max_price_msat: u64,
    pub validation_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub job_id: String,
    pub price_msat: u64,
    pub eta_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Award {
    pub job_id: String,
    pub winner_router_id: String,
    pub accepted_price_msat: u64,
    pub award_expiry: i64,
}

impl Award {
    /// §8 invariant 5: `acceptedPriceMsat ≤ RFB.maxPriceMsat` and `awardExpiry >
    /// now_at_publish`.
    pub fn is_valid_against(&self, rfb: &RequestForBid, now_at_publish_ms: i64) -> bool {
        self.accepted_price_msat <= rfb.max_price_msat && self.award_expiry > now_at_publish_ms
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cancel {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSummary {
    pub request_id: String,
    pub total_sats: u64,
}

/// A bid record tracked by `jobId`; at most one `Award` is ever issued per job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobBid {
    pub job_id: String,
    pub router_id: String,
    pub bid: Bid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_score: Option<f64>,
}

/// A peer router's last-known directory entry (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerRouter {
    pub router_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_profile: Option<CapabilityProfile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub price_sheet: Vec<PriceSheetEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_summary: Option<LoadSummary>,
    pub last_seen_ms: i64,
    pub backoff_until_ms: i64,
    pub failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_kind_mapping_matches_wire_table() {
        assert_eq!(ControlMessageType::CapsAnnounce.relay_kind(), 30020);
        assert_eq!(ControlMessageType::Rfb.relay_kind(), 20020);
        assert_eq!(ControlMessageType::Award.relay_kind(), 20022);
    }

    #[test]
    fn award_rejected_when_price_exceeds_ceiling() {
        let rfb = RequestForBid {
            job_id: "j1".into(),
            job_hash: "h".into(),
            job_type: "chat".into(),
            deadline_ms: 1000,
            max_price_msat: 500,
            validation_mode: "none".into(),
        };
        let award = Award {
            job_id: "j1".into(),
            winner_router_id: "r2".into(),
            accepted_price_msat: 600,
            award_expiry: 2000,
        };
        assert!(!award.is_valid_against(&rfb, 100));
    }

    #[test]
    fn message_freshness() {
        let msg = RouterControlMessage {
            message_type: ControlMessageType::StatusAnnounce,
            version: 1,
            router_id: "r1".into(),
            message_id: "m1".into(),
            timestamp: 100,
            expiry: 200,
            payload: StatusAnnouncePayload {
                load_summary: LoadSummary {
                    load_factor: 0.1,
                    active_nodes: 3,
                },
            },
            sig: "00".into(),
            prev_message_id: None,
        };
        assert!(msg.is_fresh(150));
        assert!(!msg.is_fresh(50));
        assert!(!msg.is_fresh(250));
    }
}
