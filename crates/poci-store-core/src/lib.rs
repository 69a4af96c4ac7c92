#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **poci-store-core** – Core storage abstraction for POCI.
//!
//! This crate defines the contract every lineage-store driver must honor:
//! a durable, append-only event log with a dense global index and per-model
//! prev-hash chains. Drivers (sled, in-memory, …) implement [`LineageStore`]
//! in separate crates that depend on this core abstraction.
//!
//! The store enforces *structural* continuity only. Signatures, commitments,
//! and event-hash recomputation are verifier concerns: a fraudulent event
//! that is structurally continuous still appends successfully and is caught
//! at verify time.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use poci_types::{Event, HexDigest, GENESIS};

//─────────────────────────────
//  Store configuration
//─────────────────────────────

/// Default backing path, relative to the process working directory.
pub const DEFAULT_DB_PATH: &str = "poc_integrity.db";

/// Maximum number of appends between durability flushes.
pub const DEFAULT_FLUSH_EVERY: usize = 1000;

/// Construction parameters for durable store drivers.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Location of the backing database.
    pub path: PathBuf,
    /// Force a durability flush after every `flush_every` uncommitted
    /// appends. A flush is also forced on explicit close.
    pub flush_every: usize,
    /// When set, every append flushes immediately and `flush_every` is
    /// irrelevant.
    pub autocommit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DB_PATH)
    }
}

impl StoreConfig {
    /// Config with the given backing path and default batching policy.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            flush_every: DEFAULT_FLUSH_EVERY,
            autocommit: false,
        }
    }

    /// Override the batched-commit interval.
    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every.max(1);
        self
    }

    /// Toggle flush-per-append mode.
    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }
}

//─────────────────────────────
//  Structural errors
//─────────────────────────────

/// Continuity violations raised by [`LineageStore::append`].
///
/// Both variants indicate a programming error or a race on the caller's
/// side; the append is rejected and the store is left unchanged. They are
/// unrelated to fraud detection, which happens at verify time and is never
/// an error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// The event's global index is not the next free position.
    #[error("index mismatch: expected {expected}, found {found}")]
    IndexMismatch {
        /// The store's `next_index()` at append time.
        expected: u64,
        /// The index carried by the rejected event.
        found: u64,
    },
    /// The event's prev-hash does not extend its model's chain tip.
    #[error("prev-hash mismatch for {model_id}: expected {expected}, found {found}")]
    PrevHashMismatch {
        /// Model whose chain the event claimed to extend.
        model_id: String,
        /// The chain tip hash (or GENESIS) the store expected.
        expected: HexDigest,
        /// The prev-hash carried by the rejected event.
        found: HexDigest,
    },
}

/// Validate an event against the store's current continuity state.
///
/// Shared by drivers so that both enforce identical semantics: the index
/// check runs first, then the per-model prev-hash check.
pub fn check_continuity(
    event: &Event,
    expected_index: u64,
    expected_prev: &str,
) -> Result<(), StoreError> {
    if event.index != expected_index {
        return Err(StoreError::IndexMismatch {
            expected: expected_index,
            found: event.index,
        });
    }
    if event.prev_hash != expected_prev {
        return Err(StoreError::PrevHashMismatch {
            model_id: event.model_id.clone(),
            expected: expected_prev.to_string(),
            found: event.prev_hash.clone(),
        });
    }
    Ok(())
}

//─────────────────────────────
//  Chain tips
//─────────────────────────────

/// Cached tail of one model's chain.
///
/// Drivers rebuild tips from the event log at open, so a tip never outlives
/// or disagrees with the durable prefix it summarizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    /// Global index of the model's most recent event.
    pub index: u64,
    /// `event_hash` of the model's most recent event.
    pub event_hash: HexDigest,
    /// `ts` of the model's most recent event.
    pub ts: u64,
}

impl ChainTip {
    /// Tip summarizing `event` as the model's latest entry.
    pub fn of(event: &Event) -> Self {
        Self {
            index: event.index,
            event_hash: event.event_hash.clone(),
            ts: event.ts,
        }
    }
}

//─────────────────────────────
//  Row codec
//─────────────────────────────

/// Serialize an event into its on-disk row form (MessagePack, named fields).
pub fn encode_event(event: &Event) -> anyhow::Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(event)?)
}

/// Decode an on-disk row back into an event.
pub fn decode_event(bytes: &[u8]) -> anyhow::Result<Event> {
    Ok(rmp_serde::from_slice(bytes)?)
}

//─────────────────────────────
//  Lineage store trait
//─────────────────────────────

/// Abstraction over the append-only lineage ledger.
///
/// A store instance presumes a single writer; `append` must not be invoked
/// concurrently on the same instance. Multiple readers opening the same
/// backing file see a snapshot at least as recent as the last flush.
#[async_trait]
pub trait LineageStore: Send + Sync {
    /// Next free global index: `0` if the log is empty, else `max(index)+1`.
    async fn next_index(&self) -> anyhow::Result<u64>;

    /// `event_hash` of the model's most recent event, or [`GENESIS`] if the
    /// model has no events yet.
    async fn last_hash(&self, model_id: &str) -> anyhow::Result<HexDigest>;

    /// `ts` of the model's most recent event, if any.
    async fn last_ts(&self, model_id: &str) -> anyhow::Result<Option<u64>>;

    /// Persist one event after validating structural continuity.
    ///
    /// Fails with [`StoreError::IndexMismatch`] or
    /// [`StoreError::PrevHashMismatch`] (recoverable via
    /// `err.downcast_ref::<StoreError>()`) without mutating the store.
    /// Signature, commitment, and event-hash validity are *not* checked.
    async fn append(&self, event: &Event) -> anyhow::Result<()>;

    /// All events for one model, ascending by global index.
    async fn chain(&self, model_id: &str) -> anyhow::Result<Vec<Event>>;

    /// Every event in the log, ascending by global index.
    async fn all_events(&self) -> anyhow::Result<Vec<Event>>;

    /// Force a durability flush of all uncommitted appends.
    async fn flush(&self) -> anyhow::Result<()>;

    /// Backing location for display, `None` for non-persistent drivers.
    fn path(&self) -> Option<&Path>;
}

/// `last_hash` fallback shared by drivers: a model with no tip starts its
/// chain at [`GENESIS`].
pub fn tip_hash_or_genesis(tip: Option<&ChainTip>) -> HexDigest {
    tip.map(|t| t.event_hash.clone())
        .unwrap_or_else(|| GENESIS.to_string())
}
