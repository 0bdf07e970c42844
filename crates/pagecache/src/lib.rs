//! # pagecache
//!
//! Tiered state cache for pages that get recreated often.
//!
//! ## Architecture
//! - **Keep-alive tier**: never evicted
//! - **Bounded tier**: LRU over a slab; evicted records are written behind
//!   to the persistent store, never dropped
//! - **Persistent store**: any [`pagestore::PersistentStore`]; records from a
//!   previous run come back with their scroll anchor reset
//! - **Helper**: [`PageStateHelper`] maps one page's lifecycle onto the cache

#![warn(missing_docs)]

mod broadcast;
mod clock;
mod codec;
mod config;
mod error;
mod gate;
mod helper;
mod lru;
mod manager;
mod page;
mod record;
mod stats;
mod writer;

pub use broadcast::{ContainerVisibility, VisibilityBroadcast};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, JsonCodec, Payload, Schema};
pub use config::{CacheConfig, DEFAULT_CAPACITY, DEFAULT_IO_WORKERS, DEFAULT_REFRESH_THRESHOLD};
pub use error::{Error, Result};
pub use gate::ReplayGate;
pub use helper::{PageStateHelper, Phase};
pub use lru::LruCache;
pub use manager::{Restored, TieredCache, Tier};
pub use page::{LifecycleEvent, Page, ScrollSurface};
pub use record::{ScrollPosition, StateRecord};
pub use stats::{CacheStats, StatsSnapshot};
