//! File-backed storage engine
//!
//! File layout:
//! - `pages.db`: header + append-only log of upsert/delete frames
//!
//! The in-memory index maps each live tag to the frame holding its latest
//! record. It is rebuilt on open by replaying the memory-mapped log.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ahash::RandomState;
use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};

use crate::backend::PersistentStore;
use crate::error::{Error, Result};
use crate::parser::{
    create_header, encode_delete, encode_upsert, parse_frame, parse_header, Frame, FORMAT_VERSION,
    HEADER_LEN, STORE_MAGIC,
};
use crate::record::PageRecord;

/// Maximum frame size (1 MB)
const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Maximum store file size (1 GB)
const MAX_DB_SIZE: u64 = 1024 * 1024 * 1024;

/// Dead bytes tolerated before an automatic compaction
const COMPACT_MIN_DEAD: u64 = 1024 * 1024;

const DATA_FILE: &str = "pages.db";
const COMPACT_FILE: &str = "pages.db.compact";

/// Location of a live record in the log
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    len: u64,
    last_active: i64,
}

type Index = HashMap<String, Slot, RandomState>;

struct Log {
    file: File,
    index: Index,
    size: u64,
    dead_bytes: u64,
}

/// Size and fragmentation figures for a [`FileStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreUsage {
    /// Live records
    pub records: usize,
    /// Total file size in bytes
    pub file_bytes: u64,
    /// Bytes held by superseded or deleted frames
    pub dead_bytes: u64,
}

/// FileStore is the durable page state table
pub struct FileStore {
    /// Path to the store directory
    dir: PathBuf,

    /// Log file, index and bookkeeping
    log: Mutex<Log>,

    /// Is the store closed?
    closed: RwLock<bool>,
}

impl FileStore {
    /// Open or create a store in the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let dir = path.as_ref();
        fs::create_dir_all(dir)?;

        let data_path = dir.join(DATA_FILE);
        let log = if data_path.exists() {
            Self::open_existing(&data_path)?
        } else {
            Self::create_new(&data_path)?
        };

        Ok(FileStore {
            dir: dir.to_path_buf(),
            log: Mutex::new(log),
            closed: RwLock::new(false),
        })
    }

    fn open_existing(data_path: &Path) -> Result<Log> {
        let mut file = OpenOptions::new().read(true).write(true).open(data_path)?;
        let file_len = file.metadata()?.len();

        if file_len < HEADER_LEN as u64 {
            // Died while writing the header; nothing to recover.
            return Self::reset(file);
        }

        // SAFETY: the file is owned by this process for the lifetime of the
        // mapping and is not written until the map is dropped below.
        let map = unsafe { Mmap::map(&file)? };
        let header = parse_header(&map[..HEADER_LEN])?;
        if header.version != FORMAT_VERSION {
            return Err(Error::Parse(format!(
                "Unsupported store version {}",
                header.version
            )));
        }

        let (index, valid_end, dead_bytes) = replay(&map);
        drop(map);

        if valid_end < file_len {
            file.set_len(valid_end)?;
        }
        let size = file.seek(SeekFrom::End(0))?;

        Ok(Log {
            file,
            index,
            size,
            dead_bytes,
        })
    }

    fn create_new(data_path: &Path) -> Result<Log> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(data_path)?;
        Self::reset(file)
    }

    fn reset(mut file: File) -> Result<Log> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&create_header(FORMAT_VERSION, 0))?;

        Ok(Log {
            file,
            index: Index::default(),
            size: HEADER_LEN as u64,
            dead_bytes: 0,
        })
    }

    fn check_open(&self) -> Result<()> {
        if *self.closed.read() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Current size and fragmentation
    pub fn usage(&self) -> StoreUsage {
        let log = self.log.lock();
        StoreUsage {
            records: log.index.len(),
            file_bytes: log.size,
            dead_bytes: log.dead_bytes,
        }
    }

    /// Rewrite the log keeping only live records
    pub fn compact(&self) -> Result<()> {
        self.check_open()?;
        let mut log = self.log.lock();
        self.compact_locked(&mut log)
    }

    fn compact_locked(&self, log: &mut Log) -> Result<()> {
        let data_path = self.dir.join(DATA_FILE);
        let tmp_path = self.dir.join(COMPACT_FILE);

        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&create_header(FORMAT_VERSION, log.index.len() as u32))?;

        let mut offset = HEADER_LEN as u64;
        let mut index = Index::default();
        for (tag, slot) in log.index.iter() {
            let frame = read_slot(&mut log.file, slot)?;
            tmp.write_all(&frame)?;
            index.insert(
                tag.clone(),
                Slot {
                    offset,
                    ..*slot
                },
            );
            offset += slot.len;
        }
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &data_path)?;
        log.file = OpenOptions::new().read(true).write(true).open(&data_path)?;
        log.index = index;
        log.size = offset;
        log.dead_bytes = 0;

        Ok(())
    }

    fn maybe_compact(&self, log: &mut Log) -> Result<()> {
        if log.dead_bytes >= COMPACT_MIN_DEAD && log.dead_bytes * 2 >= log.size {
            self.compact_locked(log)?;
        }
        Ok(())
    }

    fn append(log: &mut Log, frame: &[u8]) -> Result<u64> {
        if frame.len() > MAX_VALUE_SIZE {
            return Err(Error::ValueTooLarge(frame.len()));
        }
        if log.size + frame.len() as u64 > MAX_DB_SIZE {
            return Err(Error::DatabaseFull(log.size));
        }

        let offset = log.file.seek(SeekFrom::End(0))?;
        log.file.write_all(frame)?;
        log.size = offset + frame.len() as u64;
        Ok(offset)
    }

    /// Close the store and fsync all changes
    pub fn close(&mut self) -> Result<()> {
        if *self.closed.read() {
            return Ok(());
        }

        let mut log = self.log.lock();
        let row_count = log.index.len() as u32;
        log.file.seek(SeekFrom::Start(STORE_MAGIC.len() as u64 + 4))?;
        log.file.write_all(&row_count.to_le_bytes())?;
        log.file.sync_all()?;

        *self.closed.write() = true;

        Ok(())
    }
}

/// Replay the log, returning the index, the end of the last valid frame and
/// the number of dead bytes
fn replay(map: &[u8]) -> (Index, u64, u64) {
    let mut index = Index::default();
    let mut dead_bytes = 0u64;
    let mut pos = HEADER_LEN;
    let mut rest = &map[HEADER_LEN..];

    while !rest.is_empty() {
        let (next, frame) = match parse_frame(rest) {
            Ok(parsed) => parsed,
            // Torn or corrupt tail: everything from here on is dropped.
            Err(_) => break,
        };
        let len = (rest.len() - next.len()) as u64;

        match frame {
            Frame::Upsert(record) => {
                let slot = Slot {
                    offset: pos as u64,
                    len,
                    last_active: record.last_active,
                };
                if let Some(old) = index.insert(record.tag, slot) {
                    dead_bytes += old.len;
                }
            }
            Frame::Delete(tag) => {
                if let Some(old) = index.remove(&tag) {
                    dead_bytes += old.len;
                }
                dead_bytes += len;
            }
        }

        pos += len as usize;
        rest = next;
    }

    (index, pos as u64, dead_bytes)
}

fn read_slot(file: &mut File, slot: &Slot) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(slot.offset))?;
    let mut frame = vec![0u8; slot.len as usize];
    file.read_exact(&mut frame)?;
    Ok(frame)
}

impl PersistentStore for FileStore {
    fn get(&self, tag: &str) -> Result<Option<PageRecord>> {
        self.check_open()?;

        let mut log = self.log.lock();
        let slot = match log.index.get(tag) {
            Some(slot) => *slot,
            None => return Ok(None),
        };

        let bytes = read_slot(&mut log.file, &slot)?;
        match parse_frame(&bytes)? {
            (_, Frame::Upsert(record)) => Ok(Some(record)),
            (_, Frame::Delete(_)) => Err(Error::Parse(format!(
                "Index for '{}' points at a delete frame",
                tag
            ))),
        }
    }

    fn upsert(&self, record: &PageRecord) -> Result<()> {
        self.check_open()?;
        let frame = encode_upsert(record)?;

        let mut log = self.log.lock();
        let previous = log.index.get(&record.tag).copied();
        if let Some(existing) = previous {
            if record.last_active < existing.last_active {
                return Ok(());
            }
        }

        let offset = Self::append(&mut log, &frame)?;
        log.index.insert(
            record.tag.clone(),
            Slot {
                offset,
                len: frame.len() as u64,
                last_active: record.last_active,
            },
        );
        if let Some(old) = previous {
            log.dead_bytes += old.len;
        }

        self.maybe_compact(&mut log)
    }

    fn delete(&self, tag: &str) -> Result<()> {
        self.check_open()?;

        let mut log = self.log.lock();
        if !log.index.contains_key(tag) {
            return Ok(());
        }

        let frame = encode_delete(tag)?;
        Self::append(&mut log, &frame)?;
        if let Some(old) = log.index.remove(tag) {
            log.dead_bytes += old.len + frame.len() as u64;
        }

        self.maybe_compact(&mut log)
    }

    fn delete_all(&self) -> Result<()> {
        self.check_open()?;

        let mut log = self.log.lock();
        log.file.set_len(0)?;
        log.file.seek(SeekFrom::Start(0))?;
        log.file.write_all(&create_header(FORMAT_VERSION, 0))?;
        log.index.clear();
        log.size = HEADER_LEN as u64;
        log.dead_bytes = 0;

        Ok(())
    }

    fn tags(&self) -> Result<Vec<String>> {
        self.check_open()?;
        Ok(self.log.lock().index.keys().cloned().collect())
    }

    fn len(&self) -> usize {
        self.log.lock().index.len()
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(tag: &str, last_active: i64) -> PageRecord {
        let mut record = PageRecord::new(tag, last_active);
        record.payload = Some(format!("payload for {}", tag).into_bytes());
        record.schema = "test::Payload".to_string();
        record.format_version = 1;
        record.scroll_position = 4;
        record.scroll_offset = 18;
        record
    }

    #[test]
    fn test_create_and_open() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.len(), 0);
        assert!(store.is_empty());

        store.close().unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_upsert_and_get() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let original = record("tab/1", 100);
        store.upsert(&original).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("tab/1").unwrap(), Some(original));
        assert_eq!(store.get("tab/2").unwrap(), None);
    }

    #[test]
    fn test_upsert_replaces() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.upsert(&record("tab/1", 100)).unwrap();
        let mut newer = record("tab/1", 200);
        newer.page_index = 5;
        store.upsert(&newer).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("tab/1").unwrap().unwrap().page_index, 5);
        assert!(store.usage().dead_bytes > 0);
    }

    #[test]
    fn test_older_write_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut newer = record("tab/1", 200);
        newer.page_index = 2;
        store.upsert(&newer).unwrap();
        store.upsert(&record("tab/1", 100)).unwrap();

        assert_eq!(store.get("tab/1").unwrap().unwrap().page_index, 2);
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.upsert(&record("tab/1", 100)).unwrap();
        store.delete("tab/1").unwrap();
        store.delete("missing").unwrap();

        assert_eq!(store.get("tab/1").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();

        {
            let mut store = FileStore::open(dir.path()).unwrap();
            store.upsert(&record("a", 1)).unwrap();
            store.upsert(&record("b", 2)).unwrap();
            store.upsert(&record("c", 3)).unwrap();
            store.delete("b").unwrap();
            store.close().unwrap();
        }

        {
            let store = FileStore::open(dir.path()).unwrap();
            assert_eq!(store.len(), 2);
            assert_eq!(store.get("a").unwrap(), Some(record("a", 1)));
            assert_eq!(store.get("b").unwrap(), None);
            assert_eq!(store.get("c").unwrap(), Some(record("c", 3)));
        }
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = TempDir::new().unwrap();

        {
            let mut store = FileStore::open(dir.path()).unwrap();
            store.upsert(&record("a", 1)).unwrap();
            store.close().unwrap();
        }

        // Simulate a crash halfway through appending a frame.
        let data_path = dir.path().join(DATA_FILE);
        let partial = encode_upsert(&record("b", 2)).unwrap();
        let mut file = OpenOptions::new().append(true).open(&data_path).unwrap();
        file.write_all(&partial[..partial.len() / 2]).unwrap();
        drop(file);

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap(), Some(record("a", 1)));

        store.upsert(&record("b", 2)).unwrap();
        assert_eq!(store.get("b").unwrap(), Some(record("b", 2)));
    }

    #[test]
    fn test_compact() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        for i in 0..10 {
            store.upsert(&record("a", i)).unwrap();
        }
        store.upsert(&record("b", 1)).unwrap();
        let before = store.usage();

        store.compact().unwrap();
        let after = store.usage();

        assert_eq!(after.records, 2);
        assert_eq!(after.dead_bytes, 0);
        assert!(after.file_bytes < before.file_bytes);
        assert_eq!(store.get("a").unwrap(), Some(record("a", 9)));
        assert_eq!(store.get("b").unwrap(), Some(record("b", 1)));
    }

    #[test]
    fn test_delete_all() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.upsert(&record("a", 1)).unwrap();
        store.upsert(&record("b", 1)).unwrap();
        store.delete_all().unwrap();

        assert!(store.is_empty());
        assert_eq!(store.usage().file_bytes, HEADER_LEN as u64);
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_record_too_large() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut large = record("big", 1);
        large.payload = Some(vec![b'x'; MAX_VALUE_SIZE + 1]);
        assert!(matches!(store.upsert(&large), Err(Error::ValueTooLarge(_))));
    }

    #[test]
    fn test_close_twice() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();

        store.close().unwrap();
        store.close().unwrap();
    }

    #[test]
    fn test_upsert_after_close() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();

        store.close().unwrap();

        assert!(matches!(store.upsert(&record("a", 1)), Err(Error::Closed)));
    }
}
