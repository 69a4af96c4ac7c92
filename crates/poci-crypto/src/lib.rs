#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **poci-crypto** – Cryptographic primitives for POCI.
//!
//! This crate provides the two BLAKE2b-256 hash functions of the ledger wire
//! format (payload commitment and chain-contextual event hash) plus Ed25519
//! key generation, signing, and verification. All functions are pure; key
//! generation draws from the operating system RNG.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use poci_types::{HexDigest, Signature};

/// BLAKE2b with a 32-byte digest, the only hash used on the wire.
type Blake2b256 = Blake2b<U32>;

/// ASCII field delimiter of the event-hash preimage and signing bytes.
const DELIMITER: &[u8] = b"|";

//─────────────────────────────
//  Hashing
//─────────────────────────────

/// Commitment to the raw payload bytes.
///
/// This is *not* the chain hash, just a collision-resistant fingerprint of
/// the content, independent of any chain context.
pub fn commit(payload: &[u8]) -> HexDigest {
    let mut hasher = Blake2b256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Deterministic hash over all chain-contextual event fields.
///
/// `event_hash = H(model_id | index | prev_hash | payload | ts)` with a
/// single `|` byte between fields, integers in decimal, UTF-8 encoded.
/// The field list and order are frozen: a payload containing `|` is
/// unambiguous because delimiter placement is fixed by field order, not by
/// parsing.
pub fn event_hash(
    model_id: &str,
    index: u64,
    prev_hash: &str,
    payload: &str,
    ts: u64,
) -> HexDigest {
    let mut hasher = Blake2b256::new();
    hasher.update(model_id.as_bytes());
    hasher.update(DELIMITER);
    hasher.update(index.to_string().as_bytes());
    hasher.update(DELIMITER);
    hasher.update(prev_hash.as_bytes());
    hasher.update(DELIMITER);
    hasher.update(payload.as_bytes());
    hasher.update(DELIMITER);
    hasher.update(ts.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

//─────────────────────────────
//  Signatures
//─────────────────────────────

/// Generate a fresh Ed25519 keypair from the operating system RNG.
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let sk = SigningKey::generate(&mut OsRng);
    let vk = sk.verifying_key();
    (sk, vk)
}

/// Produce a detached signature over `message_bytes`.
pub fn sign(sk: &SigningKey, message_bytes: &[u8]) -> Signature {
    Signature(sk.sign(message_bytes).to_bytes())
}

/// Check `signature` against `message_bytes` under `vk`.
///
/// A bad signature is normal, expected data: every failure mode returns
/// `false`, never an error.
pub fn verify(vk: &VerifyingKey, message_bytes: &[u8], signature: &Signature) -> bool {
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    vk.verify(message_bytes, &sig).is_ok()
}

//─────────────────────────────
//  Wall clock
//─────────────────────────────

/// Integer Unix timestamp in seconds.
pub fn now_ts() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}
