//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::logger::LogLevel;

/// Configuration consumed by [`Store::new`](crate::Store::new).
///
/// # Example
///
/// ```no_run
/// use emberkv::{Config, LogLevel};
/// use std::time::Duration;
///
/// let config = Config::default()
///     .with_shard_count(16)
///     .with_cleanup_interval(Duration::from_millis(250))
///     .with_logging(true)
///     .with_min_level(LogLevel::Info);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of keyspace shards. Values below 1 are raised to 1.
    pub shard_count: usize,

    /// Period of the background expiration reaper. `Duration::ZERO`
    /// disables the reaper entirely; expired keys are then removed only
    /// lazily, on access.
    pub cleanup_interval: Duration,

    /// Enables the asynchronous logger collaborator.
    pub enable_logging: bool,

    /// File path for the log sink; `None` writes to stdout.
    pub log_file: Option<PathBuf>,

    /// Capacity of the logger's bounded record buffer.
    pub log_buffer_size: usize,

    /// Minimum severity that is actually written.
    pub min_level: LogLevel,

    /// Capacity of each subscriber's bounded message buffer.
    pub pubsub_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shard_count: 1,
            cleanup_interval: Duration::from_secs(1),
            enable_logging: false,
            log_file: None,
            log_buffer_size: 1000,
            min_level: LogLevel::Debug,
            pubsub_buffer_size: 10_000,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_log_buffer_size(mut self, size: usize) -> Self {
        self.log_buffer_size = size;
        self
    }

    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_pubsub_buffer_size(mut self, size: usize) -> Self {
        self.pubsub_buffer_size = size;
        self
    }

    /// Applies the silent corrections the store performs at construction.
    pub(crate) fn normalized(mut self) -> Self {
        if self.shard_count < 1 {
            self.shard_count = 1;
        }
        if self.log_buffer_size == 0 {
            self.log_buffer_size = 1000;
        }
        if self.pubsub_buffer_size == 0 {
            self.pubsub_buffer_size = 10_000;
        }
        self
    }
}
