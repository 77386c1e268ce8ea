//! Signed envelopes: the wire wrapper every actor (client, node, router) speaks.
//!
//! An [`Envelope<T>`] binds a payload to a nonce, a timestamp, and the signer's key,
//! and carries a signature over their canonical JSON encoding. Two signature schemes
//! are supported, distinguished by how `keyId` is encoded:
//!
//! - a 32-byte hex string (or `ed25519:`-prefixed hex) names an Ed25519 verifying key;
//! - a Bech32 `npub1...` string names a BIP-340 Schnorr public key over secp256k1.

use std::fmt;

use ed25519_dalek::{Signature as EdSignature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use secp256k1::schnorr::Signature as SchnorrSignature;
use secp256k1::{Keypair, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A canonically-serializable, signed wrapper around a payload.
///
/// Immutable once constructed. `sig` is computed over the canonical JSON of
/// `{payload, nonce, ts, keyId}` with object keys sorted lexicographically, as
/// specified in the envelope crypto invariants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub payload: T,
    pub nonce: String,
    pub ts: i64,
    pub key_id: String,
    pub sig: String,
}

/// Errors produced while signing or verifying an envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("keyId is not a recognized Ed25519 hex key or Bech32 npub/nsec: {0}")]
    UnrecognizedKeyEncoding(String),
    #[error("signature is not valid hex: {0}")]
    InvalidSignatureHex(#[from] hex::FromHexError),
    #[error("signature has the wrong length for the key's scheme")]
    InvalidSignatureLength,
    #[error("bech32 decoding failed: {0}")]
    Bech32(String),
    #[error("payload could not be canonicalized: {0}")]
    Canonicalize(#[from] serde_json::Error),
    #[error("underlying cryptographic key material is invalid")]
    InvalidKeyMaterial,
}

/// A parsed signing/verifying key, abstracting over the two supported schemes.
pub enum KeyMaterial {
    Ed25519(VerifyingKey),
    Schnorr(XOnlyPublicKey),
}

impl KeyMaterial {
    /// Parses a `keyId` string into its key material, per §4.1's encoding rule.
    pub fn parse(key_id: &str) -> Result<Self, EnvelopeError> {
        if let Some(rest) = key_id.strip_prefix("npub1") {
            let _ = rest; // bech32 decoding below re-parses the full string including hrp
            let (hrp, data) =
                bech32::decode(key_id).map_err(|e| EnvelopeError::Bech32(e.to_string()))?;
            if hrp.as_str() != "npub" {
                return Err(EnvelopeError::UnrecognizedKeyEncoding(key_id.to_string()));
            }
            let bytes: [u8; 32] = data
                .try_into()
                .map_err(|_| EnvelopeError::InvalidKeyMaterial)?;
            let xonly = XOnlyPublicKey::from_slice(&bytes)
                .map_err(|_| EnvelopeError::InvalidKeyMaterial)?;
            return Ok(KeyMaterial::Schnorr(xonly));
        }
        let hex_part = key_id.strip_prefix("ed25519:").unwrap_or(key_id);
        if hex_part.len() == 64 && hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            let bytes = hex::decode(hex_part)?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| EnvelopeError::InvalidKeyMaterial)?;
            let vk =
                VerifyingKey::from_bytes(&arr).map_err(|_| EnvelopeError::InvalidKeyMaterial)?;
            return Ok(KeyMaterial::Ed25519(vk));
        }
        Err(EnvelopeError::UnrecognizedKeyEncoding(key_id.to_string()))
    }
}

/// A signing identity: either an Ed25519 signing key or a secp256k1 keypair used for
/// BIP-340 Schnorr signatures. Constructed by node/router processes at startup from
/// `ROUTER_PRIVATE_KEY_PEM` or an equivalent node config; never serialized.
pub enum SigningIdentity {
    Ed25519(Box<SigningKey>),
    Schnorr(Box<Keypair>),
}

impl SigningIdentity {
    /// Loads a signing identity from the raw secret configured in `ROUTER_PRIVATE_KEY_PEM`
    /// (the name is inherited from the node-config convention; the value itself is a
    /// bech32 `nsec1...` secret for the Schnorr scheme or 64 hex chars, optionally
    /// `ed25519:`-prefixed, for the Ed25519 scheme).
    pub fn load(raw: &str) -> Result<Self, EnvelopeError> {
        let raw = raw.trim();
        if let Some(_rest) = raw.strip_prefix("nsec1") {
            let (hrp, data) = bech32::decode(raw).map_err(|e| EnvelopeError::Bech32(e.to_string()))?;
            if hrp.as_str() != "nsec" {
                return Err(EnvelopeError::UnrecognizedKeyEncoding(raw.to_string()));
            }
            let bytes: [u8; 32] = data.try_into().map_err(|_| EnvelopeError::InvalidKeyMaterial)?;
            let secp = Secp256k1::new();
            let secret = secp256k1::SecretKey::from_slice(&bytes)
                .map_err(|_| EnvelopeError::InvalidKeyMaterial)?;
            let keypair = Keypair::from_secret_key(&secp, &secret);
            return Ok(SigningIdentity::Schnorr(Box::new(keypair)));
        }
        let hex_part = raw.strip_prefix("ed25519:").unwrap_or(raw);
        if hex_part.len() == 64 && hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            let bytes = hex::decode(hex_part)?;
            let arr: [u8; 32] = bytes.try_into().map_err(|_| EnvelopeError::InvalidKeyMaterial)?;
            let sk = SigningKey::from_bytes(&arr);
            return Ok(SigningIdentity::Ed25519(Box::new(sk)));
        }
        Err(EnvelopeError::UnrecognizedKeyEncoding(raw.to_string()))
    }

    /// The `keyId` this identity signs as, in the same encoding [`KeyMaterial::parse`] expects.
    pub fn key_id(&self) -> String {
        match self {
            SigningIdentity::Ed25519(sk) => hex::encode(sk.verifying_key().to_bytes()),
            SigningIdentity::Schnorr(kp) => {
                let (xonly, _parity) = kp.x_only_public_key();
                bech32_npub(&xonly.serialize())
            }
        }
    }

    pub(crate) fn sign_bytes(&self, msg: &[u8]) -> Vec<u8> {
        match self {
            SigningIdentity::Ed25519(sk) => sk.sign(msg).to_bytes().to_vec(),
            SigningIdentity::Schnorr(kp) => {
                let secp = Secp256k1::signing_only();
                let digest: [u8; 32] = sha256(msg);
                let message = Message::from_digest(digest);
                let sig = secp.sign_schnorr(&message, kp);
                sig.as_ref().to_vec()
            }
        }
    }
}

/// Encodes a 32-byte x-only public key as a Bech32 `npub1...` string.
pub fn bech32_npub(xonly: &[u8; 32]) -> String {
    use bech32::{Bech32, Hrp};
    let hrp = Hrp::parse("npub").expect("valid hrp");
    bech32::encode::<Bech32>(hrp, xonly).expect("32 bytes encodes")
}

/// Minimal SHA-256, used only to digest the canonical signing input before a Schnorr sign,
/// matching BIP-340's requirement that the message be a 32-byte hash.
fn sha256(data: &[u8]) -> [u8; 32] {
    // secp256k1::Message::from_digest requires a pre-hashed 32-byte input; we reuse the
    // crate's bundled hash engine to avoid pulling in a second SHA-256 implementation.
    use secp256k1::hashes::{sha256::Hash as Sha256Hash, Hash as _};
    Sha256Hash::hash(data).to_byte_array()
}

/// Hex-encoded SHA-256 of arbitrary bytes, exposed for `jobHash`-style content digests
/// elsewhere on the wire so callers don't pull in a second hashing crate.
pub fn content_hash_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Produces the canonical JSON bytes signed/verified for an envelope: `{payload, nonce,
/// ts, keyId}` with object keys sorted lexicographically and numbers/strings reproduced
/// exactly. Relies on `serde_json::Value`'s default (non-`preserve_order`) map
/// representation, which is key-sorted.
pub fn canonical_signing_bytes<T: Serialize>(
    payload: &T,
    nonce: &str,
    ts: i64,
    key_id: &str,
) -> Result<Vec<u8>, EnvelopeError> {
    let payload_value = serde_json::to_value(payload)?;
    let mut map = serde_json::Map::new();
    map.insert("payload".to_string(), payload_value);
    map.insert("nonce".to_string(), Value::String(nonce.to_string()));
    map.insert("ts".to_string(), Value::from(ts));
    map.insert("keyId".to_string(), Value::String(key_id.to_string()));
    let value = Value::Object(map);
    Ok(serde_json::to_vec(&value)?)
}

impl<T: Serialize> Envelope<T> {
    /// Signs `payload` with `identity`, producing a new immutable envelope.
    pub fn sign(
        payload: T,
        nonce: impl Into<String>,
        ts: i64,
        identity: &SigningIdentity,
    ) -> Result<Self, EnvelopeError> {
        let nonce = nonce.into();
        let key_id = identity.key_id();
        let bytes = canonical_signing_bytes(&payload, &nonce, ts, &key_id)?;
        let sig = hex::encode(identity.sign_bytes(&bytes));
        Ok(Envelope {
            payload,
            nonce,
            ts,
            key_id,
            sig,
        })
    }
}

impl<T: Serialize> Envelope<T> {
    /// Verifies the envelope's signature against its own `keyId`. Returns only a
    /// boolean; a failed verification is never retried, per §4.1.
    pub fn verify(&self) -> bool {
        self.verify_against(&self.key_id)
    }

    /// Verifies the envelope's signature against an explicitly supplied `keyId`,
    /// so callers can reject a mismatch between the envelope's own `keyId` field
    /// and the identity they expected to see (`envelope-key-mismatch`).
    pub fn verify_against(&self, expected_key_id: &str) -> bool {
        if self.key_id != expected_key_id {
            return false;
        }
        let bytes = match canonical_signing_bytes(&self.payload, &self.nonce, self.ts, &self.key_id)
        {
            Ok(b) => b,
            Err(_) => return false,
        };
        let sig_bytes = match hex::decode(&self.sig) {
            Ok(b) => b,
            Err(_) => return false,
        };
        let key = match KeyMaterial::parse(&self.key_id) {
            Ok(k) => k,
            Err(_) => return false,
        };
        verify_raw(&key, &bytes, &sig_bytes)
    }
}

/// Verifies a raw signature over `bytes` against parsed key material. Shared by
/// [`Envelope::verify_against`] and [`crate::federation_proto::RouterControlMessage::verify_against`]
/// so every signed wire artifact goes through one verification path.
pub fn verify_raw(key: &KeyMaterial, bytes: &[u8], sig_bytes: &[u8]) -> bool {
    match key {
        KeyMaterial::Ed25519(vk) => {
            let sig = match <&[u8; 64]>::try_from(sig_bytes) {
                Ok(arr) => EdSignature::from_bytes(arr),
                Err(_) => return false,
            };
            vk.verify(bytes, &sig).is_ok()
        }
        KeyMaterial::Schnorr(xonly) => {
            let sig = match SchnorrSignature::from_slice(sig_bytes) {
                Ok(s) => s,
                Err(_) => return false,
            };
            let digest = sha256(bytes);
            let message = Message::from_digest(digest);
            Secp256k1::verification_only()
                .verify_schnorr(&sig, &message, xonly)
                .is_ok()
        }
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("key_id", &self.key_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u64,
    }

    #[test]
    fn load_ed25519_hex_secret_round_trips() {
        let mut csprng = rand::rngs::OsRng;
        let sk = SigningKey::generate(&mut csprng);
        let raw = hex::encode(sk.to_bytes());
        let identity = SigningIdentity::load(&raw).unwrap();
        assert_eq!(identity.key_id(), hex::encode(sk.verifying_key().to_bytes()));
    }

    #[test]
    fn load_rejects_garbage() {
        assert!(SigningIdentity::load("not-a-key").is_err());
    }

    #[test]
    fn ed25519_round_trip() {
        let mut csprng = rand::rngs::OsRng;
        let sk = SigningKey::generate(&mut csprng);
        let identity = SigningIdentity::Ed25519(Box::new(sk));
        let envelope = Envelope::sign(Ping { n: 42 }, "nonce-1", 1_700_000_000, &identity).unwrap();
        assert!(envelope.verify());
    }

    #[test]
    fn schnorr_round_trip() {
        let secp = Secp256k1::new();
        let kp = Keypair::new(&secp, &mut rand::rngs::OsRng);
        let identity = SigningIdentity::Schnorr(Box::new(kp));
        let envelope = Envelope::sign(Ping { n: 7 }, "nonce-2", 1_700_000_001, &identity).unwrap();
        assert!(envelope.verify());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let mut csprng = rand::rngs::OsRng;
        let sk = SigningKey::generate(&mut csprng);
        let identity = SigningIdentity::Ed25519(Box::new(sk));
        let mut envelope =
            Envelope::sign(Ping { n: 1 }, "nonce-3", 1_700_000_002, &identity).unwrap();
        envelope.payload.n = 2;
        assert!(!envelope.verify());
    }

    #[test]
    fn key_mismatch_is_rejected() {
        let mut csprng = rand::rngs::OsRng;
        let sk = SigningKey::generate(&mut csprng);
        let identity = SigningIdentity::Ed25519(Box::new(sk));
        let envelope = Envelope::sign(Ping { n: 1 }, "nonce-4", 1_700_000_003, &identity).unwrap();
        assert!(!envelope.verify_against("0000000000000000000000000000000000000000000000000000000000000000"));
    }
}
