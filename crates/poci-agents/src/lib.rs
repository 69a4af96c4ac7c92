#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **poci-agents** – Signing agents for POCI.
//!
//! A [`ModelAgent`] owns a stable `model_id`, an Ed25519 keypair generated at
//! construction, and a private monotonic timestamp counter. It emits ledger
//! events against a [`LineageStore`] following the canonical protocol: global
//! index and chain tip come from the store, timestamps are strictly
//! increasing per agent even across restarts and clock regressions.
//!
//! Adversarial variants are data, not subclasses: a [`Behavior`] tag
//! interpreted by the single emit path. Every adversarial branch *produces*
//! a new event from the honest one, so the honest construction never sees a
//! mutable field.

use anyhow::Result;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::Rng;
use tracing::debug;

use poci_crypto::{commit, event_hash, generate_keypair, now_ts, sign};
use poci_store_core::LineageStore;
use poci_types::{Event, Signature};

//─────────────────────────────
//  Drift sentinels
//─────────────────────────────

/// Fixed value written over `payload_commit` by the commit-drift behavior.
pub const DRIFT_COMMIT_SENTINEL: &str =
    "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

/// Fixed value written over `event_hash` (and `payload_hash`, which must
/// track it) by the commit-drift behavior.
pub const DRIFT_HASH_SENTINEL: &str =
    "feedfacefeedfacefeedfacefeedfacefeedfacefeedfacefeedfacefeedface";

/// Suffix appended to the payload by the slow-drip behavior after the
/// hashes were computed.
pub const SLOW_DRIP_SUFFIX: &str = "_shadow";

//─────────────────────────────
//  Agent behaviors
//─────────────────────────────

/// How an agent treats the events it emits.
///
/// The adversarial variants each leave `model_id`, `index`, `prev_hash`,
/// and `ts` untouched, so their events still pass store-level continuity
/// checks and fraud surfaces only at verify time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    /// Emits exactly per the protocol.
    Honest,
    /// With probability `rate`, signs the byte-reversed canonical bytes.
    /// The event is structurally valid but its signature does not verify.
    SigCheat {
        /// Probability in `[0, 1]` of cheating on any given emission.
        rate: f64,
    },
    /// With probability `rate`, overwrites `payload_commit` and/or
    /// `event_hash` with fixed sentinels (uniform choice of commit-only,
    /// hash-only, or both) and signs the drifted values, vouching for
    /// digests that do not match the payload.
    CommitDrift {
        /// Probability in `[0, 1]` of drifting on any given emission.
        rate: f64,
    },
    /// With probability `rate`, appends a suffix to the payload after its
    /// commitment and event hash were computed, leaving both stale. The
    /// signature covers only the stale digests, so it still verifies.
    SlowDrip {
        /// Probability in `[0, 1]` of dripping on any given emission.
        rate: f64,
    },
}

impl Behavior {
    fn triggered(rate: f64) -> bool {
        rate > 0.0 && rand::thread_rng().gen_bool(rate.clamp(0.0, 1.0))
    }
}

//─────────────────────────────
//  Model agent
//─────────────────────────────

/// An independently keyed entity emitting signed events under a stable id.
///
/// Agents are process-local: nothing about them is persisted beyond the
/// events they emit. The keypair lives for the lifetime of the value.
pub struct ModelAgent {
    model_id: String,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    behavior: Behavior,
    last_ts: u64,
}

impl std::fmt::Debug for ModelAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The signing key stays out of debug output.
        f.debug_struct("ModelAgent")
            .field("model_id", &self.model_id)
            .field("behavior", &self.behavior)
            .field("last_ts", &self.last_ts)
            .finish_non_exhaustive()
    }
}

impl ModelAgent {
    /// Honest agent with a fresh keypair.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self::with_behavior(model_id, Behavior::Honest)
    }

    /// Agent with a fresh keypair and the given behavior.
    pub fn with_behavior(model_id: impl Into<String>, behavior: Behavior) -> Self {
        let (signing_key, verifying_key) = generate_keypair();
        Self {
            model_id: model_id.into(),
            signing_key,
            verifying_key,
            behavior,
            last_ts: 0,
        }
    }

    /// The agent's stable identifier.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Public half of the agent's keypair, for verification.
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// The agent's current behavior.
    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    /// Swap the behavior for subsequent emissions. Harnesses use this to
    /// alternate honest and adversarial phases on one identity.
    pub fn set_behavior(&mut self, behavior: Behavior) {
        self.behavior = behavior;
    }

    /// Monotonic timestamp per agent.
    ///
    /// `max(wall clock, own counter + 1, persisted chain tip + 1)`: a fresh
    /// process consults the store's last `ts` for this model, so restarts
    /// cannot go backwards even when the wall clock does. After a
    /// regression the value runs ahead of real time; that is the point.
    async fn next_ts(&mut self, store: &dyn LineageStore) -> Result<u64> {
        let now = now_ts();
        let last_db_ts = store.last_ts(&self.model_id).await?;
        let candidate = now
            .max(self.last_ts + 1)
            .max(last_db_ts.map_or(0, |ts| ts + 1));
        self.last_ts = candidate;
        Ok(candidate)
    }

    /// Create the next event for this agent.
    ///
    /// Reads the store for the global index, the model's chain tip, and the
    /// persisted timestamp floor, then assembles, hashes, and signs the
    /// event. The behavior tag decides whether the result is the honest
    /// event or an adversarial variant of it. The caller appends the result;
    /// emission itself does not write.
    pub async fn make_event(
        &mut self,
        store: &dyn LineageStore,
        payload: impl Into<String>,
    ) -> Result<Event> {
        let payload = payload.into();
        let index = store.next_index().await?;
        let prev_hash = store.last_hash(&self.model_id).await?;
        let ts = self.next_ts(store).await?;

        let payload_commit = commit(payload.as_bytes());
        let eh = event_hash(&self.model_id, index, &prev_hash, &payload, ts);

        // Assembled unsigned; every branch below signs exactly once.
        let unsigned = Event {
            model_id: self.model_id.clone(),
            index,
            ts,
            payload,
            payload_hash: eh.clone(),
            payload_commit,
            prev_hash,
            event_hash: eh,
            signature: Signature([0u8; 64]),
        };

        let event = match self.behavior {
            Behavior::SigCheat { rate } if Behavior::triggered(rate) => {
                self.sign_event(unsigned, true)
            }
            Behavior::CommitDrift { rate } if Behavior::triggered(rate) => {
                self.drift_digests(unsigned)
            }
            Behavior::SlowDrip { rate } if Behavior::triggered(rate) => {
                Self::drip_payload(self.sign_event(unsigned, false))
            }
            _ => self.sign_event(unsigned, false),
        };

        debug!(
            model_id = %self.model_id,
            index = event.index,
            ts = event.ts,
            behavior = ?self.behavior,
            "event emitted"
        );
        Ok(event)
    }

    /// Sign `event`'s canonical bytes, or their byte-reversed form for the
    /// signature cheat.
    fn sign_event(&self, event: Event, reversed: bool) -> Event {
        let canonical = event.canonical_signing_bytes();
        let message: Vec<u8> = if reversed {
            canonical.iter().rev().copied().collect()
        } else {
            canonical
        };
        Event {
            signature: sign(&self.signing_key, &message),
            ..event
        }
    }

    /// Commit-drift variant: replace `payload_commit` and/or `event_hash`
    /// with sentinels, keep `payload_hash == event_hash`, and sign the
    /// drifted canonical bytes so the signature itself stays valid.
    fn drift_digests(&self, honest: Event) -> Event {
        let (drift_commit, drift_hash) = match rand::thread_rng().gen_range(0..3u8) {
            0 => (true, false),
            1 => (false, true),
            _ => (true, true),
        };

        let payload_commit = if drift_commit {
            DRIFT_COMMIT_SENTINEL.to_string()
        } else {
            honest.payload_commit.clone()
        };
        let event_hash = if drift_hash {
            DRIFT_HASH_SENTINEL.to_string()
        } else {
            honest.event_hash.clone()
        };

        let drifted = Event {
            payload_hash: event_hash.clone(),
            payload_commit,
            event_hash,
            ..honest
        };
        self.sign_event(drifted, false)
    }

    /// Slow-drip variant: extend the payload after commitment and event
    /// hash were computed. Digests and signature are left stale; the
    /// signature still verifies because the canonical signing bytes cover
    /// the digests, not the payload.
    fn drip_payload(honest: Event) -> Event {
        let mut payload = honest.payload.clone();
        payload.push_str(SLOW_DRIP_SUFFIX);
        Event { payload, ..honest }
    }
}
