#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **poci-verifier** – Full event verification and reputation control for POCI.
//!
//! Verification re-derives everything the store took on trust: the payload
//! commitment, the chain-contextual event hash, and the Ed25519 signature
//! over the canonical signing bytes. The three checks are independent, the
//! overall verdict is their conjunction, and none of them is ever an error:
//! fraud is a normal result, surfaced as `ok = false` and folded into the
//! [`ReputationController`].

use std::collections::HashMap;

use ed25519_dalek::VerifyingKey;
use serde::Serialize;
use tracing::debug;

use poci_crypto::{commit, event_hash, verify};
use poci_types::Event;

mod controller;
pub use controller::{
    Reputation, ReputationController, THETA_MAX, THETA_MIN, WEIGHT_MAX, WEIGHT_MIN,
};

//─────────────────────────────
//  Verdicts
//─────────────────────────────

/// Outcome of the three independent verification checks for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    /// Signature verifies over the canonical signing bytes.
    pub sig_ok: bool,
    /// Recomputed payload commitment matches `payload_commit`.
    pub commit_ok: bool,
    /// Recomputed event hash matches `event_hash`, and `payload_hash` has
    /// not diverged from it.
    pub hash_ok: bool,
}

impl Verdict {
    /// Overall verdict: the conjunction of all three checks.
    pub fn ok(&self) -> bool {
        self.sig_ok && self.commit_ok && self.hash_ok
    }
}

/// Run full verification of one event under the agent's public key.
///
/// Pure: reads only the event and the key, and never fails — a bad
/// signature or digest is expected data, reported in the verdict.
pub fn verify_event(event: &Event, vk: &VerifyingKey) -> Verdict {
    let sig_ok = verify(vk, &event.canonical_signing_bytes(), &event.signature);
    let commit_ok = commit(event.payload.as_bytes()) == event.payload_commit;
    let recomputed = event_hash(
        &event.model_id,
        event.index,
        &event.prev_hash,
        &event.payload,
        event.ts,
    );
    let hash_ok = recomputed == event.event_hash && event.payload_hash == event.event_hash;
    Verdict {
        sig_ok,
        commit_ok,
        hash_ok,
    }
}

//─────────────────────────────
//  Anomaly counters
//─────────────────────────────

/// Running tallies of verification failures, for observability.
///
/// `bad_events` counts events failing *any* check, so it is not the sum of
/// the three per-check counters (one event can fail several).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnomalyCounters {
    /// Events whose signature did not verify.
    pub sig_invalid: u64,
    /// Events whose payload commitment did not match the payload.
    pub commit_mismatch: u64,
    /// Events whose event hash did not recompute (or whose `payload_hash`
    /// diverged from `event_hash`).
    pub eventhash_mismatch: u64,
    /// Events failing at least one check.
    pub bad_events: u64,
    /// Bad-event tally per model id.
    pub bad_by_model: HashMap<String, u64>,
}

impl AnomalyCounters {
    fn record(&mut self, model_id: &str, verdict: &Verdict) {
        if !verdict.sig_ok {
            self.sig_invalid += 1;
        }
        if !verdict.commit_ok {
            self.commit_mismatch += 1;
        }
        if !verdict.hash_ok {
            self.eventhash_mismatch += 1;
        }
        if !verdict.ok() {
            self.bad_events += 1;
            *self.bad_by_model.entry(model_id.to_string()).or_default() += 1;
        }
    }
}

//─────────────────────────────
//  Stateful verifier
//─────────────────────────────

/// [`verify_event`] plus running [`AnomalyCounters`].
///
/// The counters are the only state; the verdict for any single event is
/// identical to the pure function's.
#[derive(Debug, Default)]
pub struct Verifier {
    counters: AnomalyCounters,
}

impl Verifier {
    /// Verifier with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify one event, updating the anomaly counters.
    pub fn verify(&mut self, event: &Event, vk: &VerifyingKey) -> Verdict {
        let verdict = verify_event(event, vk);
        self.counters.record(&event.model_id, &verdict);
        if !verdict.ok() {
            debug!(
                model_id = %event.model_id,
                index = event.index,
                sig_ok = verdict.sig_ok,
                commit_ok = verdict.commit_ok,
                hash_ok = verdict.hash_ok,
                "event failed verification"
            );
        }
        verdict
    }

    /// Current counter values.
    pub fn counters(&self) -> &AnomalyCounters {
        &self.counters
    }
}
