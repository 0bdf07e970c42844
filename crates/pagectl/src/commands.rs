//! Store maintenance commands
//!
//! Each command returns the text to print so it can be tested without a
//! terminal.

use std::fmt::Write;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use pagecache::{Codec, JsonCodec};
use pagestore::{FileStore, PageRecord, PersistentStore};
use tracing::info;

fn format_millis(millis: i64) -> String {
    if millis == 0 {
        return "-".to_string();
    }
    match Utc.timestamp_millis_opt(millis).single() {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
        None => millis.to_string(),
    }
}

/// One line per stored page, most recently active first
pub fn list(store: &FileStore) -> Result<String> {
    let mut records = Vec::new();
    for tag in store.tags()? {
        if let Some(record) = store.get(&tag)? {
            records.push(record);
        }
    }
    records.sort_by(|a, b| b.last_active.cmp(&a.last_active).then_with(|| a.tag.cmp(&b.tag)));

    let mut out = String::new();
    for record in &records {
        let bytes = record.payload.as_ref().map_or(0, Vec::len);
        writeln!(
            out,
            "{:<32} page {:<4} scroll {}/{:<6} {:>8} B  {}",
            record.tag,
            record.page_index,
            record.scroll_position,
            record.scroll_offset,
            bytes,
            format_millis(record.last_active)
        )?;
    }
    writeln!(out, "{} page(s)", records.len())?;
    Ok(out)
}

/// Full dump of one page's record
pub fn show(store: &FileStore, tag: &str) -> Result<String> {
    let record = match store.get(tag)? {
        Some(record) => record,
        None => bail!("no state stored for '{}'", tag),
    };

    let mut out = String::new();
    writeln!(out, "tag:          {}", record.tag)?;
    writeln!(out, "page index:   {}", record.page_index)?;
    writeln!(
        out,
        "scroll:       {} (offset {})",
        record.scroll_position, record.scroll_offset
    )?;
    writeln!(out, "last active:  {}", format_millis(record.last_active))?;
    writeln!(out, "last hidden:  {}", format_millis(record.last_hidden))?;
    write_payload(&mut out, &record)?;
    Ok(out)
}

fn write_payload(out: &mut String, record: &PageRecord) -> Result<()> {
    let bytes = match &record.payload {
        Some(bytes) => bytes,
        None => {
            writeln!(out, "payload:      none")?;
            return Ok(());
        }
    };

    writeln!(
        out,
        "payload:      {} ({} bytes, format v{})",
        record.schema,
        bytes.len(),
        record.format_version
    )?;

    // Only JSON payloads can be rendered without the page's own types.
    if record.format_version == JsonCodec.format_version() {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) {
            writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        }
    }
    Ok(())
}

/// Remove one page
pub fn delete(store: &FileStore, tag: &str) -> Result<String> {
    if store.get(tag)?.is_none() {
        bail!("no state stored for '{}'", tag);
    }
    store
        .delete(tag)
        .with_context(|| format!("Failed to delete '{}'", tag))?;
    info!("Deleted '{}'", tag);
    Ok(format!("deleted {}\n", tag))
}

/// Remove every page
pub fn purge(store: &FileStore) -> Result<String> {
    let count = store.len();
    store.delete_all().context("Failed to purge store")?;
    info!("Purged {} page(s)", count);
    Ok(format!("purged {} page(s)\n", count))
}

/// Rewrite the log without dead records
pub fn compact(store: &FileStore) -> Result<String> {
    let before = store.usage();
    store.compact().context("Failed to compact store")?;
    let after = store.usage();
    info!(
        "Compacted store: {} -> {} bytes",
        before.file_bytes, after.file_bytes
    );
    Ok(format!(
        "compacted {} -> {} bytes ({} reclaimed)\n",
        before.file_bytes,
        after.file_bytes,
        before.file_bytes.saturating_sub(after.file_bytes)
    ))
}

/// Record count and file usage
pub fn stats(store: &FileStore) -> Result<String> {
    let usage = store.usage();
    let live = usage.file_bytes.saturating_sub(usage.dead_bytes);
    let dead_pct = if usage.file_bytes == 0 {
        0.0
    } else {
        usage.dead_bytes as f64 * 100.0 / usage.file_bytes as f64
    };

    let mut out = String::new();
    writeln!(out, "pages:       {}", usage.records)?;
    writeln!(out, "file bytes:  {}", usage.file_bytes)?;
    writeln!(out, "live bytes:  {}", live)?;
    writeln!(out, "dead bytes:  {} ({:.1}%)", usage.dead_bytes, dead_pct)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(tags: &[&str]) -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        for (n, tag) in tags.iter().enumerate() {
            let mut record = PageRecord::new(*tag, 1_700_000_000_000 + n as i64);
            record.payload = Some(br#"{"items":[1,2]}"#.to_vec());
            record.schema = "feed::Feed".to_string();
            record.format_version = 1;
            record.page_index = 2;
            store.upsert(&record).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn test_list_newest_first() {
        let (_dir, store) = store_with(&["old", "new"]);

        let out = list(&store).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("new"));
        assert!(lines[1].starts_with("old"));
        assert_eq!(lines[2], "2 page(s)");
    }

    #[test]
    fn test_show_renders_json() {
        let (_dir, store) = store_with(&["feed"]);

        let out = show(&store, "feed").unwrap();
        assert!(out.contains("page index:   2"));
        assert!(out.contains("feed::Feed"));
        assert!(out.contains("\"items\""));

        assert!(show(&store, "missing").is_err());
    }

    #[test]
    fn test_delete_and_purge() {
        let (_dir, store) = store_with(&["a", "b", "c"]);

        delete(&store, "a").unwrap();
        assert!(delete(&store, "a").is_err());
        assert_eq!(store.len(), 2);

        assert_eq!(purge(&store).unwrap(), "purged 2 page(s)\n");
        assert!(store.is_empty());
    }

    #[test]
    fn test_compact_and_stats() {
        let (_dir, store) = store_with(&["a", "a", "a"]);

        assert!(store.usage().dead_bytes > 0);
        compact(&store).unwrap();
        assert_eq!(store.usage().dead_bytes, 0);

        let out = stats(&store).unwrap();
        assert!(out.starts_with("pages:       1"));
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "-");
        assert_eq!(format_millis(1_000), "1970-01-01 00:00:01.000 UTC");
    }
}
