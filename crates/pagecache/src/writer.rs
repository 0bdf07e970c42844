//! Write-behind persistence
//!
//! Evicted records wait in the pending map until a background job writes
//! them. Every store mutation for a tag runs under that tag's shard lock, so
//! an eviction write, a forced write, a scroll reset and a clear for the same
//! tag never interleave, while different tags proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::{Mutex, MutexGuard};
use pagestore::PersistentStore;
use tracing::warn;

use crate::error::Result;
use crate::record::StateRecord;
use crate::stats::CacheStats;

/// Shards per background worker
const SHARDS_PER_WORKER: usize = 8;

pub(crate) struct WriteBehind {
    store: Arc<dyn PersistentStore>,
    pending: Mutex<HashMap<String, StateRecord, RandomState>>,
    shards: Vec<Mutex<()>>,
    hasher: RandomState,
    stats: Arc<CacheStats>,
}

impl WriteBehind {
    pub(crate) fn new(store: Arc<dyn PersistentStore>, workers: usize, stats: Arc<CacheStats>) -> Self {
        let shards = (0..workers.max(1) * SHARDS_PER_WORKER)
            .map(|_| Mutex::new(()))
            .collect();

        Self {
            store,
            pending: Mutex::new(HashMap::default()),
            shards,
            hasher: RandomState::new(),
            stats,
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.store
    }

    fn shard(&self, tag: &str) -> MutexGuard<'_, ()> {
        let idx = (self.hasher.hash_one(tag) % self.shards.len() as u64) as usize;
        self.shards[idx].lock()
    }

    /// Queue `record` for a background write; an already pending newer
    /// record for the same tag is kept
    pub(crate) fn enqueue(&self, record: StateRecord) {
        let mut pending = self.pending.lock();
        match pending.get(&record.tag) {
            Some(existing) if existing.last_active > record.last_active => {}
            _ => {
                pending.insert(record.tag.clone(), record);
            }
        }
    }

    pub(crate) fn peek_pending(&self, tag: &str) -> Option<StateRecord> {
        self.pending.lock().get(tag).cloned()
    }

    pub(crate) fn is_pending(&self, tag: &str) -> bool {
        self.pending.lock().contains_key(tag)
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Write the pending record for `tag`, if one is still waiting
    pub(crate) fn write_pending(&self, tag: &str) -> Result<()> {
        let _shard = self.shard(tag);

        let record = match self.pending.lock().remove(tag) {
            Some(record) => record,
            None => return Ok(()),
        };

        match self.store.upsert(&record.to_page_record()) {
            Ok(()) => {
                self.stats.record_persisted();
                Ok(())
            }
            Err(e) => {
                warn!("Background write for '{}' failed: {}", tag, e);
                self.stats.record_persist_failure();
                // Keep it in memory so the run loses nothing; a newer
                // record that arrived meanwhile takes precedence.
                self.pending
                    .lock()
                    .entry(tag.to_string())
                    .or_insert(record);
                Err(e.into())
            }
        }
    }

    /// Write `record` on the caller's thread
    pub(crate) fn write_now(&self, record: &StateRecord) -> Result<()> {
        let _shard = self.shard(&record.tag);

        {
            let mut pending = self.pending.lock();
            if let Some(existing) = pending.get(&record.tag) {
                if existing.last_active <= record.last_active {
                    pending.remove(&record.tag);
                }
            }
        }

        match self.store.upsert(&record.to_page_record()) {
            Ok(()) => {
                self.stats.record_persisted();
                Ok(())
            }
            Err(e) => {
                warn!("Write for '{}' failed: {}", record.tag, e);
                self.stats.record_persist_failure();
                Err(e.into())
            }
        }
    }

    /// Zero the scroll anchor of the pending and stored copies of `tag`
    pub(crate) fn reset_scroll(&self, tag: &str) -> Result<()> {
        let _shard = self.shard(tag);

        if let Some(record) = self.pending.lock().get_mut(tag) {
            record.reset_scroll();
        }

        if let Some(stored) = self.store.get(tag)? {
            if stored.scroll_position != 0 || stored.scroll_offset != 0 {
                self.store.upsert(&stored.with_scroll_reset())?;
            }
        }
        Ok(())
    }

    /// Drop the pending and stored copies of `tag`
    pub(crate) fn delete(&self, tag: &str) -> Result<()> {
        let _shard = self.shard(tag);
        self.pending.lock().remove(tag);
        self.store.delete(tag)?;
        Ok(())
    }

    /// Drop everything pending and everything stored
    pub(crate) fn delete_all(&self) -> Result<()> {
        let _shards: Vec<_> = self.shards.iter().map(|shard| shard.lock()).collect();
        self.pending.lock().clear();
        self.store.delete_all()?;
        Ok(())
    }

    /// Write every pending record and wait for in-flight writers
    pub(crate) fn flush(&self) -> Result<()> {
        let tags: Vec<String> = self.pending.lock().keys().cloned().collect();

        let mut result = Ok(());
        for tag in tags {
            if let Err(e) = self.write_pending(&tag) {
                result = Err(e);
            }
        }

        // Barrier: writers that took their record before we looked are
        // still inside their shard.
        for shard in &self.shards {
            drop(shard.lock());
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ScrollPosition;
    use pagestore::MemoryStore;

    fn writer() -> (Arc<MemoryStore>, WriteBehind) {
        let store = Arc::new(MemoryStore::new());
        let writer = WriteBehind::new(store.clone(), 1, Arc::new(CacheStats::new()));
        (store, writer)
    }

    fn record(tag: &str, last_active: i64) -> StateRecord {
        let mut record = StateRecord::new(tag).with_scroll(ScrollPosition::new(3, 9));
        record.last_active = last_active;
        record
    }

    #[test]
    fn test_write_pending() {
        let (store, writer) = writer();

        writer.enqueue(record("a", 10));
        assert!(writer.is_pending("a"));

        writer.write_pending("a").unwrap();
        assert!(!writer.is_pending("a"));
        assert_eq!(store.get("a").unwrap().unwrap().scroll_position, 3);

        // Nothing left to write.
        writer.write_pending("a").unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_enqueue_keeps_newer() {
        let (_, writer) = writer();

        writer.enqueue(record("a", 20));
        writer.enqueue(record("a", 10));

        assert_eq!(writer.peek_pending("a").unwrap().last_active, 20);
    }

    #[test]
    fn test_failed_write_stays_pending() {
        let (store, writer) = writer();
        store.set_fail_writes(true);

        writer.enqueue(record("a", 10));
        assert!(writer.write_pending("a").is_err());
        assert!(writer.is_pending("a"));

        store.set_fail_writes(false);
        writer.flush().unwrap();
        assert_eq!(writer.pending_len(), 0);
        assert!(store.get("a").unwrap().is_some());
    }

    #[test]
    fn test_write_now_supersedes_pending() {
        let (store, writer) = writer();

        writer.enqueue(record("a", 10));
        writer.write_now(&record("a", 20)).unwrap();

        assert!(!writer.is_pending("a"));
        assert_eq!(store.get("a").unwrap().unwrap().last_active, 20);
    }

    #[test]
    fn test_stale_background_write_loses() {
        let (store, writer) = writer();

        writer.write_now(&record("a", 20)).unwrap();
        writer.enqueue(record("a", 10));
        writer.flush().unwrap();

        assert_eq!(store.get("a").unwrap().unwrap().last_active, 20);
    }

    #[test]
    fn test_reset_scroll() {
        let (store, writer) = writer();

        writer.write_now(&record("a", 10)).unwrap();
        writer.enqueue(record("b", 10));
        writer.reset_scroll("a").unwrap();
        writer.reset_scroll("b").unwrap();

        let stored = store.get("a").unwrap().unwrap();
        assert_eq!((stored.scroll_position, stored.scroll_offset), (0, 0));
        assert!(writer.peek_pending("b").unwrap().scroll.is_top());
    }

    #[test]
    fn test_delete() {
        let (store, writer) = writer();

        writer.write_now(&record("a", 10)).unwrap();
        writer.enqueue(record("a", 11));
        writer.delete("a").unwrap();

        writer.flush().unwrap();
        assert!(store.get("a").unwrap().is_none());
    }
}
