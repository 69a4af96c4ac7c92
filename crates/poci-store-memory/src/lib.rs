#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **poci-store-memory** – In-memory lineage store driver for POCI.
//!
//! This crate provides a fast, non-persistent store suitable for testing,
//! development, and scenarios where durability is not required. All data is
//! lost when the process terminates. Continuity semantics are identical to
//! the durable drivers: the same dense-index and prev-hash checks run on
//! every append.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use poci_store_core::{check_continuity, tip_hash_or_genesis, ChainTip, LineageStore};
use poci_types::{Event, HexDigest};

/// Default buffer size for the live event broadcast channel.
const DEFAULT_BUFFER: usize = 1024;

//─────────────────────────────
//  In-memory lineage store
//─────────────────────────────

/// Log plus chain-tip cache behind one lock, so an append is atomic with
/// respect to readers.
#[derive(Debug, Default)]
struct Inner {
    events: Vec<Event>,
    tips: HashMap<String, ChainTip>,
}

/// An in-memory, non-persistent lineage store.
///
/// The global index is implicit in the vector position: the log is dense by
/// construction, so `next_index` is simply the current length. The store
/// also provides a live event stream via a broadcast channel.
#[derive(Debug)]
pub struct MemoryLineageStore {
    inner: RwLock<Inner>,
    broadcast_tx: broadcast::Sender<Event>,
}

impl Default for MemoryLineageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLineageStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER)
    }

    /// Creates a store with a custom broadcast buffer size.
    ///
    /// The buffer size determines how many events can be queued for slow
    /// subscribers before older events are dropped from the live stream.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(buffer_size);
        Self {
            inner: RwLock::new(Inner::default()),
            broadcast_tx,
        }
    }

    /// Subscribe to the live event stream.
    ///
    /// Returns a receiver that will receive copies of all events appended
    /// after the subscription was created. Subscribers that fall behind may
    /// miss events if the broadcast buffer overflows.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.broadcast_tx.subscribe()
    }

    /// Current number of stored events.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }

    /// Drop all stored events and chain tips.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.events.clear();
        inner.tips.clear();
    }
}

#[async_trait]
impl LineageStore for MemoryLineageStore {
    async fn next_index(&self) -> Result<u64> {
        Ok(self.inner.read().await.events.len() as u64)
    }

    async fn last_hash(&self, model_id: &str) -> Result<HexDigest> {
        let inner = self.inner.read().await;
        Ok(tip_hash_or_genesis(inner.tips.get(model_id)))
    }

    async fn last_ts(&self, model_id: &str) -> Result<Option<u64>> {
        let inner = self.inner.read().await;
        Ok(inner.tips.get(model_id).map(|tip| tip.ts))
    }

    async fn append(&self, event: &Event) -> Result<()> {
        let mut inner = self.inner.write().await;

        let expected_index = inner.events.len() as u64;
        let expected_prev = tip_hash_or_genesis(inner.tips.get(&event.model_id));
        check_continuity(event, expected_index, &expected_prev)?;

        inner.events.push(event.clone());
        inner
            .tips
            .insert(event.model_id.clone(), ChainTip::of(event));
        drop(inner);

        // Broadcast live update (ignore errors if no subscribers)
        let _ = self.broadcast_tx.send(event.clone());

        Ok(())
    }

    async fn chain(&self, model_id: &str) -> Result<Vec<Event>> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .filter(|ev| ev.model_id == model_id)
            .cloned()
            .collect())
    }

    async fn all_events(&self) -> Result<Vec<Event>> {
        Ok(self.inner.read().await.events.clone())
    }

    async fn flush(&self) -> Result<()> {
        // Nothing to make durable.
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poci_store_core::StoreError;
    use poci_types::{Signature, GENESIS};

    async fn next_event(store: &MemoryLineageStore, model_id: &str, payload: &str) -> Event {
        let index = store.next_index().await.unwrap();
        let prev_hash = store.last_hash(model_id).await.unwrap();
        let ts = store.last_ts(model_id).await.unwrap().map_or(1000, |t| t + 1);
        let payload_commit = poci_crypto::commit(payload.as_bytes());
        let event_hash = poci_crypto::event_hash(model_id, index, &prev_hash, payload, ts);
        Event {
            model_id: model_id.to_string(),
            index,
            ts,
            payload: payload.to_string(),
            payload_hash: event_hash.clone(),
            payload_commit,
            prev_hash,
            event_hash,
            signature: Signature([0u8; 64]),
        }
    }

    #[tokio::test]
    async fn test_genesis_append() {
        let store = MemoryLineageStore::new();
        let ev = next_event(&store, "model_a", "hello").await;

        assert_eq!(ev.index, 0);
        assert_eq!(ev.prev_hash, GENESIS);
        store.append(&ev).await.unwrap();

        assert_eq!(store.next_index().await.unwrap(), 1);
        assert_eq!(store.last_hash("model_a").await.unwrap(), ev.event_hash);
        assert_eq!(store.last_ts("model_a").await.unwrap(), Some(ev.ts));
    }

    #[tokio::test]
    async fn test_interleaved_chains() {
        let store = MemoryLineageStore::new();

        let a0 = next_event(&store, "a", "x").await;
        store.append(&a0).await.unwrap();
        let b1 = next_event(&store, "b", "y").await;
        store.append(&b1).await.unwrap();
        let a2 = next_event(&store, "a", "z").await;
        store.append(&a2).await.unwrap();

        let chain_a = store.chain("a").await.unwrap();
        assert_eq!(
            chain_a.iter().map(|ev| ev.index).collect::<Vec<_>>(),
            vec![0, 2]
        );
        assert_eq!(chain_a[1].prev_hash, chain_a[0].event_hash);

        let chain_b = store.chain("b").await.unwrap();
        assert_eq!(chain_b.len(), 1);
        assert_eq!(chain_b[0].index, 1);
        assert_eq!(chain_b[0].prev_hash, GENESIS);

        let all = store.all_events().await.unwrap();
        assert_eq!(all.iter().map(|ev| ev.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_index_mismatch_rejected_without_mutation() {
        let store = MemoryLineageStore::new();
        let mut ev = next_event(&store, "a", "x").await;
        ev.index += 1;

        let err = store.append(&ev).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::IndexMismatch { expected: 0, found: 1 })
        );
        assert_eq!(store.next_index().await.unwrap(), 0);
        assert!(store.all_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prev_hash_mismatch_rejected() {
        let store = MemoryLineageStore::new();
        let a0 = next_event(&store, "a", "x").await;
        store.append(&a0).await.unwrap();

        // Second event for "a" claiming a genesis link skips the chain tip.
        let mut a1 = next_event(&store, "a", "y").await;
        a1.prev_hash = GENESIS.to_string();
        let err = store.append(&a1).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::PrevHashMismatch { .. })
        ));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_live_event_stream() {
        let store = MemoryLineageStore::new();
        let mut rx = store.subscribe();

        let ev = next_event(&store, "a", "live").await;
        store.append(&ev).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, ev);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryLineageStore::new();
        let ev = next_event(&store, "a", "x").await;
        store.append(&ev).await.unwrap();

        store.clear().await;
        assert_eq!(store.next_index().await.unwrap(), 0);
        assert_eq!(store.last_hash("a").await.unwrap(), GENESIS);
        assert_eq!(store.last_ts("a").await.unwrap(), None);
    }
}
