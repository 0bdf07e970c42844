//! Persistent store contract consumed by the cache layer

use crate::error::Result;
use crate::record::PageRecord;

/// Durable tag -> record table
///
/// Writes follow newest-wins: an `upsert` whose `last_active` is strictly
/// older than the stored copy is accepted but has no effect.
pub trait PersistentStore: Send + Sync {
    /// Fetch the record stored for `tag`
    fn get(&self, tag: &str) -> Result<Option<PageRecord>>;

    /// Insert or replace the record for `record.tag`
    fn upsert(&self, record: &PageRecord) -> Result<()>;

    /// Remove `tag` (no-op if absent)
    fn delete(&self, tag: &str) -> Result<()>;

    /// Remove every record
    fn delete_all(&self) -> Result<()>;

    /// All stored tags, in no particular order
    fn tags(&self) -> Result<Vec<String>>;

    /// Number of stored records
    fn len(&self) -> usize;

    /// Check if the store holds no records
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
