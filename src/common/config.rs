use std::env;
use std::path::PathBuf;

use super::error::{Result, StrataError};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Default number of buffer slots in the pool
pub const DEFAULT_SLOT_COUNT: usize = 1024;

/// Default number of full clock rounds before eviction gives up
pub const DEFAULT_EVICTION_ROUNDS: usize = 16;

/// Upper bound for a slot's usage count
pub const MAX_USAGE_COUNT: u32 = 5;

/// Busy-spin iterations before a lock waiter starts sleeping
pub const DEFAULT_SPIN_INTERVAL: u32 = 10;

/// First sleep of a lock waiter, in microseconds
pub const MIN_BACKOFF_MICROS: u64 = 1;

/// Cap of the lock waiter backoff, in microseconds
pub const MAX_BACKOFF_MICROS: u64 = 1000;

/// Maximum number of workers in one parallel compute
pub const MAX_WORKER_NUM: usize = 100;

/// Default data directory
pub const DEFAULT_DATA_DIR: &str = "data";

/// Runtime configuration of the storage core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Directory holding one file per table object
    pub data_dir: PathBuf,
    /// Number of page slots in the buffer pool
    pub slot_count: usize,
    /// Full clock rounds the eviction scan may make before failing
    pub eviction_rounds: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            slot_count: DEFAULT_SLOT_COUNT,
            eviction_rounds: DEFAULT_EVICTION_ROUNDS,
        }
    }
}

impl StorageConfig {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    pub fn with_eviction_rounds(mut self, rounds: usize) -> Self {
        self.eviction_rounds = rounds;
        self
    }

    /// Builds a config from `STRATA_DATA_DIR`, `STRATA_SLOT_COUNT` and
    /// `STRATA_EVICTION_ROUNDS`, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = env::var("STRATA_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(n) = parse_env_usize("STRATA_SLOT_COUNT")? {
            config.slot_count = n;
        }
        if let Some(n) = parse_env_usize("STRATA_EVICTION_ROUNDS")? {
            config.eviction_rounds = n;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(StrataError::Config("data_dir must not be empty".into()));
        }
        if self.slot_count == 0 {
            return Err(StrataError::Config("slot_count must be positive".into()));
        }
        if self.slot_count > u32::MAX as usize {
            return Err(StrataError::Config(format!(
                "slot_count {} exceeds the buffer handle range",
                self.slot_count
            )));
        }
        if self.eviction_rounds == 0 {
            return Err(StrataError::Config(
                "eviction_rounds must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env_usize(key: &str) -> Result<Option<usize>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| StrataError::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}
