//! Cache configuration

use std::time::Duration;

use crate::error::{Error, Result};

/// Default number of records held by the bounded tier
pub const DEFAULT_CAPACITY: usize = 5;

/// Default stale-background threshold (2 minutes)
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_millis(120_000);

/// Default number of background persistence workers
pub const DEFAULT_IO_WORKERS: usize = 2;

/// Tunables for a [`TieredCache`](crate::TieredCache)
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of records in the bounded tier
    pub capacity: usize,

    /// Log tier traffic at `debug` instead of `trace`
    pub debug: bool,

    /// Background time after which a resumed page is told it went stale
    pub refresh_threshold: Duration,

    /// Worker threads of the persistence runtime
    pub io_workers: usize,

    /// Override for the process start time (epoch millis)
    pub process_start: Option<i64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            debug: false,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            io_workers: DEFAULT_IO_WORKERS,
            process_start: None,
        }
    }
}

impl CacheConfig {
    /// Config with the given bounded-tier capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Enable or disable verbose tier logging
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the default stale-background threshold
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Set the number of persistence workers
    pub fn with_io_workers(mut self, workers: usize) -> Self {
        self.io_workers = workers;
        self
    }

    /// Pin the process start time used for cross-run detection
    pub fn with_process_start(mut self, millis: i64) -> Self {
        self.process_start = Some(millis);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("capacity must be greater than 0".to_string()));
        }
        if self.io_workers == 0 {
            return Err(Error::InvalidConfig("io_workers must be greater than 0".to_string()));
        }
        Ok(())
    }
}
