//! In-memory store for tests and ephemeral sessions

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use ahash::RandomState;
use parking_lot::RwLock;

use crate::backend::PersistentStore;
use crate::error::{Error, Result};
use crate::record::PageRecord;

/// HashMap-backed [`PersistentStore`] with failure injection
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, PageRecord, RandomState>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    read_delay_ms: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `get` fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent mutation fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Block every subsequent `get` for `delay`, simulating a slow disk
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of upserts that reached the table
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, tag: &str) -> Result<Option<PageRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("reads disabled".to_string()));
        }
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        Ok(self.records.read().get(tag).cloned())
    }

    fn upsert(&self, record: &PageRecord) -> Result<()> {
        self.check_writable()?;

        let mut records = self.records.write();
        if let Some(existing) = records.get(&record.tag) {
            if !record.supersedes(existing) {
                return Ok(());
            }
        }
        records.insert(record.tag.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, tag: &str) -> Result<()> {
        self.check_writable()?;
        self.records.write().remove(tag);
        Ok(())
    }

    fn delete_all(&self) -> Result<()> {
        self.check_writable()?;
        self.records.write().clear();
        Ok(())
    }

    fn tags(&self) -> Result<Vec<String>> {
        Ok(self.records.read().keys().cloned().collect())
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }
}
