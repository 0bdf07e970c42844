//! TieredCache: keep-alive map + bounded LRU + persistent store
//!
//! Lookup order is keep-alive, bounded, pending writes, store. A tag lives
//! in at most one of the two memory tiers; the store is a write-behind copy
//! and may hold a tag that is also in memory.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use pagestore::{PageRecord, PersistentStore};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::codec::{Codec, JsonCodec, Payload, Schema};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::lru::LruCache;
use crate::record::StateRecord;
use crate::stats::CacheStats;
use crate::writer::WriteBehind;

macro_rules! tier_log {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            debug!($($arg)+);
        } else {
            trace!($($arg)+);
        }
    };
}

/// Where a tag currently lives in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Non-evictable tier
    KeepAlive,
    /// Bounded LRU tier
    Bounded,
    /// Evicted, waiting for its background write
    Pending,
}

/// A restored record together with its decoded payload
#[derive(Debug, Clone, PartialEq)]
pub struct Restored<T> {
    /// Record as handed back by the cache
    pub record: StateRecord,
    /// Decoded business data, if the record carried any
    pub data: Option<T>,
}

/// Process-wide page state cache
pub struct TieredCache<C: Codec = JsonCodec> {
    config: CacheConfig,

    /// Tags that are never evicted
    keep_alive: RwLock<HashMap<String, StateRecord, RandomState>>,

    /// Recency-ordered tier
    bounded: Mutex<LruCache<String, StateRecord>>,

    /// Write-behind path to the store
    writer: Arc<WriteBehind>,

    /// Dedicated runtime for background writes and store reads
    io: RwLock<Option<Runtime>>,

    /// Tags bound to a live helper
    attached: Mutex<HashSet<String, RandomState>>,

    stats: Arc<CacheStats>,
    codec: C,
    clock: Arc<dyn Clock>,
    process_start: i64,

    /// Last `last_active` handed out; stamps never go backwards
    last_stamp: AtomicI64,
}

impl TieredCache<JsonCodec> {
    /// Create a cache with the JSON codec and the system clock
    pub fn init(config: CacheConfig, store: Arc<dyn PersistentStore>) -> Result<Self> {
        Self::init_with(config, store, JsonCodec, Arc::new(SystemClock))
    }
}

impl<C: Codec> TieredCache<C> {
    /// Create a cache with an explicit codec and clock
    pub fn init_with(
        config: CacheConfig,
        store: Arc<dyn PersistentStore>,
        codec: C,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let io = Builder::new_multi_thread()
            .worker_threads(config.io_workers)
            .max_blocking_threads(config.io_workers)
            .thread_name("pagecache-io")
            .build()
            .map_err(|e| Error::InvalidConfig(format!("cannot start io runtime: {}", e)))?;

        let stats = Arc::new(CacheStats::new());
        let writer = Arc::new(WriteBehind::new(store, config.io_workers, Arc::clone(&stats)));
        let process_start = config.process_start.unwrap_or_else(|| clock.now_millis());

        tier_log!(
            config.debug,
            "Page cache ready: capacity {}, process start {}",
            config.capacity,
            process_start
        );

        Ok(Self {
            bounded: Mutex::new(LruCache::new(config.capacity)),
            keep_alive: RwLock::new(HashMap::default()),
            writer,
            io: RwLock::new(Some(io)),
            attached: Mutex::new(HashSet::default()),
            stats,
            codec,
            clock,
            process_start,
            last_stamp: AtomicI64::new(i64::MIN),
            config,
        })
    }

    /// Save a page's state
    ///
    /// The record fully replaces any previous one for `tag`. Only the forced
    /// write can fail; background writes triggered by eviction report
    /// through logs and stats.
    pub fn save(
        &self,
        tag: &str,
        mut record: StateRecord,
        keep_alive: bool,
        force_persist: bool,
    ) -> Result<()> {
        record.tag = tag.to_string();
        record.last_active = self.next_stamp();
        let forced = force_persist.then(|| record.clone());

        let evicted = {
            let mut keep = self.keep_alive.write();
            let mut bounded = self.bounded.lock();
            if keep_alive {
                bounded.remove(tag);
                keep.insert(tag.to_string(), record);
                None
            } else {
                keep.remove(tag);
                bounded.put(tag.to_string(), record)
            }
        };
        self.stats.record_insert();
        tier_log!(
            self.config.debug,
            "Saved '{}' to {} tier",
            tag,
            if keep_alive { "keep-alive" } else { "bounded" }
        );

        if let Some((evicted_tag, evicted_record)) = evicted {
            self.demote(evicted_tag, evicted_record);
        }

        match forced {
            Some(record) => self.writer.write_now(&record),
            None => Ok(()),
        }
    }

    /// Wall-clock time, bumped past the previous stamp if the clock stepped
    /// back so newest-wins at the store keeps holding
    fn next_stamp(&self) -> i64 {
        let now = self.clock.now_millis();
        let mut last = self.last_stamp.load(Ordering::Acquire);
        loop {
            let stamp = now.max(last.saturating_add(1));
            match self
                .last_stamp
                .compare_exchange_weak(last, stamp, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return stamp,
                Err(current) => last = current,
            }
        }
    }

    /// Encode `value` and save it with the given cursors
    pub fn save_value<T: Serialize + Schema>(
        &self,
        tag: &str,
        value: &T,
        record: StateRecord,
        keep_alive: bool,
        force_persist: bool,
    ) -> Result<()> {
        let payload = self.encode(value)?;
        self.save(tag, record.with_payload(payload), keep_alive, force_persist)
    }

    /// Restore a page's state
    ///
    /// Memory hits return immediately and unmodified. Store hits from a
    /// previous run come back with the scroll anchor zeroed and are
    /// re-cached in the bounded tier.
    pub async fn restore(&self, tag: &str) -> Option<StateRecord> {
        if let Some(record) = self.keep_alive.read().get(tag) {
            self.stats.record_keep_alive_hit();
            tier_log!(self.config.debug, "Restored '{}' from keep-alive tier", tag);
            return Some(record.clone());
        }

        if let Some(record) = self.bounded.lock().get(tag) {
            self.stats.record_bounded_hit();
            tier_log!(self.config.debug, "Restored '{}' from bounded tier", tag);
            return Some(record.clone());
        }

        let record = match self.writer.peek_pending(tag) {
            Some(record) => record,
            None => StateRecord::from(self.load_from_store(tag).await?),
        };

        Some(self.rehydrate(record))
    }

    /// Restore and decode as `T`; undecodable payloads count as a miss
    pub async fn restore_as<T: DeserializeOwned + Schema>(&self, tag: &str) -> Option<Restored<T>> {
        let record = self.restore(tag).await?;

        let data = match &record.payload {
            Some(payload) => match payload.decode::<C, T>(&self.codec) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("Discarding undecodable state for '{}': {}", tag, e);
                    self.stats.record_decode_failure();
                    return None;
                }
            },
            None => None,
        };

        Some(Restored { record, data })
    }

    async fn load_from_store(&self, tag: &str) -> Option<PageRecord> {
        let store = Arc::clone(self.writer.store());
        let job = {
            let io = self.io.read();
            io.as_ref().map(|rt| {
                let store = Arc::clone(&store);
                let tag = tag.to_string();
                rt.spawn_blocking(move || store.get(&tag))
            })
        };

        let loaded = match job {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Store read for '{}' was cancelled: {}", tag, e);
                    self.stats.record_miss();
                    return None;
                }
            },
            None => store.get(tag),
        };

        match loaded {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                self.stats.record_miss();
                tier_log!(self.config.debug, "No state for '{}'", tag);
                None
            }
            Err(e) => {
                warn!("Store read for '{}' failed: {}", tag, e);
                self.stats.record_miss();
                None
            }
        }
    }

    /// Apply cross-run rules to a record coming from outside memory and
    /// cache it in the bounded tier
    fn rehydrate(&self, mut record: StateRecord) -> StateRecord {
        let cross_run = record.last_active < self.process_start;
        if cross_run {
            record.reset_scroll();
        }

        let evicted = {
            let keep = self.keep_alive.read();
            if let Some(newer) = keep.get(&record.tag) {
                // Saved while the store read was in flight.
                self.stats.record_keep_alive_hit();
                return newer.clone();
            }
            let mut bounded = self.bounded.lock();
            if let Some(newer) = bounded.get(&record.tag) {
                self.stats.record_bounded_hit();
                return newer.clone();
            }
            bounded.put(record.tag.clone(), record.clone())
        };

        self.stats.record_store_hit();
        if cross_run {
            tier_log!(
                self.config.debug,
                "Cross-run restore for '{}', resetting scroll position",
                record.tag
            );
            self.stats.record_cross_run_reset();
        } else {
            tier_log!(self.config.debug, "Restored '{}' from store", record.tag);
        }

        if let Some((evicted_tag, evicted_record)) = evicted {
            self.demote(evicted_tag, evicted_record);
        }
        record
    }

    fn demote(&self, tag: String, record: StateRecord) {
        self.stats.record_eviction();
        tier_log!(self.config.debug, "Evicted '{}' from bounded tier, persisting", tag);

        self.writer.enqueue(record);

        let writer = Arc::clone(&self.writer);
        let scheduled = match self.io.read().as_ref() {
            Some(rt) => {
                let tag = tag.clone();
                rt.spawn_blocking(move || {
                    let _ = writer.write_pending(&tag);
                });
                true
            }
            None => false,
        };

        if !scheduled {
            let _ = self.writer.write_pending(&tag);
        }
    }

    /// Zero the scroll anchor of `tag` wherever it is held, keeping the
    /// payload and page index
    pub fn reset_scroll(&self, tag: &str) -> Result<()> {
        if let Some(record) = self.keep_alive.write().get_mut(tag) {
            record.reset_scroll();
        }
        if let Some(record) = self.bounded.lock().get_mut(tag) {
            record.reset_scroll();
        }
        tier_log!(self.config.debug, "Reset scroll position for '{}'", tag);

        self.writer.reset_scroll(tag)
    }

    /// Remove `tag` from every tier
    pub fn clear(&self, tag: &str) -> Result<()> {
        {
            let mut keep = self.keep_alive.write();
            let mut bounded = self.bounded.lock();
            keep.remove(tag);
            bounded.remove(tag);
        }
        tier_log!(self.config.debug, "Cleared '{}'", tag);

        self.writer.delete(tag)
    }

    /// Remove everything from every tier, including the store
    pub fn clear_all(&self) -> Result<()> {
        {
            let mut keep = self.keep_alive.write();
            let mut bounded = self.bounded.lock();
            keep.clear();
            bounded.clear();
        }
        tier_log!(self.config.debug, "Cleared all page state");

        self.writer.delete_all()
    }

    /// Write pending evictions and wait for in-flight background writes
    pub fn flush(&self) -> Result<()> {
        self.writer.flush()
    }

    /// Write every record held in memory to the store
    ///
    /// For use when the process is about to be torn down.
    pub fn persist_all(&self) -> Result<()> {
        let mut records: Vec<StateRecord> = self.keep_alive.read().values().cloned().collect();
        {
            let bounded = self.bounded.lock();
            for tag in bounded.keys_by_recency() {
                if let Some(record) = bounded.peek(&tag) {
                    records.push(record.clone());
                }
            }
        }

        let mut result = self.writer.flush();
        for record in &records {
            if let Err(e) = self.writer.write_now(record) {
                result = Err(e);
            }
        }
        result
    }

    /// Flush pending writes and stop the background runtime
    ///
    /// Evictions after shutdown are written on the caller's thread.
    pub fn shutdown(&self) -> Result<()> {
        let runtime = self.io.write().take();
        match runtime {
            Some(rt) => {
                rt.shutdown_background();
                tier_log!(self.config.debug, "Page cache shutting down");
                self.writer.flush()
            }
            None => Ok(()),
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    pub fn is_shut_down(&self) -> bool {
        self.io.read().is_none()
    }

    /// Bind `tag` to a live helper
    pub fn attach_tag(&self, tag: &str) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        if !self.attached.lock().insert(tag.to_string()) {
            error!("Tag '{}' attached twice; page tags must be unique", tag);
            return Err(Error::AlreadyAttached(tag.to_string()));
        }
        Ok(())
    }

    /// Release a tag bound by [`attach_tag`](Self::attach_tag)
    pub fn detach_tag(&self, tag: &str) {
        self.attached.lock().remove(tag);
    }

    /// Encode `value` with this cache's codec
    pub fn encode<T: Serialize + Schema>(&self, value: &T) -> Result<Payload> {
        Payload::encode(&self.codec, value)
    }

    /// Decode `payload` with this cache's codec
    pub fn decode<T: DeserializeOwned + Schema>(&self, payload: &Payload) -> Result<T> {
        payload.decode(&self.codec)
    }

    /// Memory tier currently holding `tag`
    pub fn tier_of(&self, tag: &str) -> Option<Tier> {
        if self.keep_alive.read().contains_key(tag) {
            return Some(Tier::KeepAlive);
        }
        if self.bounded.lock().contains(tag) {
            return Some(Tier::Bounded);
        }
        if self.writer.is_pending(tag) {
            return Some(Tier::Pending);
        }
        None
    }

    /// Whether `tag` is held by either memory tier
    pub fn contains_in_memory(&self, tag: &str) -> bool {
        matches!(self.tier_of(tag), Some(Tier::KeepAlive | Tier::Bounded))
    }

    /// Bounded-tier tags from most to least recently used
    pub fn bounded_tags(&self) -> Vec<String> {
        self.bounded.lock().keys_by_recency()
    }

    /// Number of records in the bounded tier
    pub fn bounded_len(&self) -> usize {
        self.bounded.lock().len()
    }

    /// Number of records in the keep-alive tier
    pub fn keep_alive_len(&self) -> usize {
        self.keep_alive.read().len()
    }

    /// Number of evicted records still waiting for their write
    pub fn pending_len(&self) -> usize {
        self.writer.pending_len()
    }

    /// Bounded-tier capacity
    pub fn capacity(&self) -> usize {
        self.bounded.lock().capacity()
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Timestamp separating this run's records from earlier runs
    pub fn process_start(&self) -> i64 {
        self.process_start
    }

    /// Clock used to stamp records
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Underlying persistent store
    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        self.writer.store()
    }
}

impl<C: Codec> Drop for TieredCache<C> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Flushing page cache on drop failed: {}", e);
        }
    }
}
