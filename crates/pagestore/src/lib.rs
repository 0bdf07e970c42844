//! # pagestore
//!
//! Durable tag-keyed table of page state records.
//!
//! ## Design
//! - Single append-only log file with an in-memory index
//! - Memory-mapped replay on open; torn tails are truncated
//! - Newest-wins upserts keyed by `last_active`
//! - Operations: GET, UPSERT, DELETE, DELETE ALL, COMPACT

#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod parser;
mod record;
mod storage;

pub use backend::PersistentStore;
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use record::PageRecord;
pub use storage::{FileStore, StoreUsage};
