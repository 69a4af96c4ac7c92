#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **poci-types** – Shared primitive data structures for POCI.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It defines the canonical [`Event`] record and its exact signing-byte form,
//! but makes no assumptions about I/O, cryptography, or storage.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

//─────────────────────────────
//  Core constants
//─────────────────────────────

/// Sentinel `prev_hash` for the first event in every per-model chain.
pub const GENESIS: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Byte length of an Ed25519 detached signature.
pub const SIGNATURE_LEN: usize = 64;

/// Character length of a lowercase-hex BLAKE2b-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

//─────────────────────────────
//  Core type aliases
//─────────────────────────────

/// A BLAKE2b-256 digest rendered as 64 lowercase hex characters.
///
/// All digest fields on [`Event`] (`payload_commit`, `event_hash`,
/// `payload_hash`, `prev_hash`) use this shape.
pub type HexDigest = String;

//─────────────────────────────
//  Signature newtype
//─────────────────────────────

/// Raw 64-byte Ed25519 detached signature.
///
/// Serde support is hand-written because the byte form must round-trip
/// through binary row encodings as exactly 64 raw bytes, never as a
/// re-encoded string.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Signature {
    /// Borrow the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = TypeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; SIGNATURE_LEN] = bytes
            .try_into()
            .map_err(|_| TypeError::InvalidSignatureLength { found: bytes.len() })?;
        Ok(Self(arr))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SigVisitor;

        impl<'de> de::Visitor<'de> for SigVisitor {
            type Value = Signature;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{SIGNATURE_LEN} raw signature bytes")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Signature, E> {
                Signature::try_from(v).map_err(E::custom)
            }

            // Self-describing formats (e.g. JSON) encode byte strings as
            // sequences of integers.
            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Signature, A::Error> {
                let mut bytes = [0u8; SIGNATURE_LEN];
                for (i, slot) in bytes.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                if seq.next_element::<u8>()?.is_some() {
                    return Err(de::Error::invalid_length(SIGNATURE_LEN + 1, &self));
                }
                Ok(Signature(bytes))
            }
        }

        deserializer.deserialize_bytes(SigVisitor)
    }
}

//─────────────────────────────
//  Canonical event record
//─────────────────────────────

/// A single ledger entry, immutable once created.
///
/// Events are produced by agents, persisted append-only, and never mutated
/// or deleted. Test harnesses that simulate corruption construct a *new*
/// event with altered fields rather than rewriting this one, so the
/// signing-byte form below can never desynchronize from stored state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Agent that produced the event.
    pub model_id: String,
    /// Global monotonic position across all agents, starting at 0.
    pub index: u64,
    /// Seconds since the Unix epoch, strictly increasing per agent.
    ///
    /// Monotonicity is enforced against restarts and clock regressions, so
    /// this value can run ahead of the wall clock. It orders a chain; it is
    /// not wall-clock truth for downstream consumers.
    pub ts: u64,
    /// Opaque content, stored as UTF-8 text.
    pub payload: String,
    /// Equals `event_hash`; stored separately for schema stability, any
    /// divergence is a detectable fault.
    pub payload_hash: HexDigest,
    /// BLAKE2b-256 of the raw payload bytes.
    pub payload_commit: HexDigest,
    /// `event_hash` of the previous event by the same `model_id`, or
    /// [`GENESIS`] if none.
    pub prev_hash: HexDigest,
    /// BLAKE2b-256 over `model_id|index|prev_hash|payload|ts`.
    pub event_hash: HexDigest,
    /// Ed25519 signature over [`Event::canonical_signing_bytes`].
    pub signature: Signature,
}

impl Event {
    /// The exact byte sequence that is signed and verified.
    ///
    /// `model_id | index | prev_hash | event_hash | payload_commit | ts`,
    /// `|`-joined, integers in decimal, UTF-8 encoded. Note the field set
    /// and order differ from the event-hash preimage: the signing bytes
    /// cover the derived digests instead of the raw payload.
    pub fn canonical_signing_bytes(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.model_id,
            self.index,
            self.prev_hash,
            self.event_hash,
            self.payload_commit,
            self.ts
        )
        .into_bytes()
    }
}

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors produced while decoding primitive values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypeError {
    /// Signature byte slice was not exactly 64 bytes long.
    #[error("invalid signature length: expected {SIGNATURE_LEN} bytes, found {found}")]
    InvalidSignatureLength {
        /// Length of the rejected slice.
        found: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            model_id: "model_a".to_string(),
            index: 7,
            ts: 1_700_000_000,
            payload: "hello".to_string(),
            payload_hash: "aa".repeat(32),
            payload_commit: "bb".repeat(32),
            prev_hash: GENESIS.to_string(),
            event_hash: "aa".repeat(32),
            signature: Signature([0x42; SIGNATURE_LEN]),
        }
    }

    #[test]
    fn test_genesis_shape() {
        assert_eq!(GENESIS.len(), DIGEST_HEX_LEN);
        assert!(GENESIS.chars().all(|c| c == '0'));
    }

    #[test]
    fn test_canonical_signing_bytes_layout() {
        let ev = sample_event();
        let expected = format!(
            "model_a|7|{}|{}|{}|1700000000",
            GENESIS,
            "aa".repeat(32),
            "bb".repeat(32)
        );
        assert_eq!(ev.canonical_signing_bytes(), expected.into_bytes());
    }

    #[test]
    fn test_signing_bytes_differ_from_hash_preimage_fields() {
        // The signing bytes must cover the derived digests, not the payload.
        let ev = sample_event();
        let bytes = String::from_utf8(ev.canonical_signing_bytes()).unwrap();
        assert!(bytes.contains(&ev.event_hash));
        assert!(bytes.contains(&ev.payload_commit));
        assert!(!bytes.contains(&ev.payload));
    }

    #[test]
    fn test_signature_roundtrip_msgpack() {
        let sig = Signature([0xAB; SIGNATURE_LEN]);
        let bytes = rmp_serde::to_vec(&sig).unwrap();
        let decoded: Signature = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, sig);
    }

    #[test]
    fn test_signature_roundtrip_json() {
        let sig = Signature([0x17; SIGNATURE_LEN]);
        let json = serde_json::to_string(&sig).unwrap();
        let decoded: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, sig);
    }

    #[test]
    fn test_signature_rejects_wrong_length() {
        let short = [0u8; 63];
        let err = Signature::try_from(&short[..]).unwrap_err();
        assert_eq!(err, TypeError::InvalidSignatureLength { found: 63 });
    }

    #[test]
    fn test_event_roundtrip_msgpack() {
        let ev = sample_event();
        let bytes = rmp_serde::to_vec_named(&ev).unwrap();
        let decoded: Event = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, ev);
    }
}
