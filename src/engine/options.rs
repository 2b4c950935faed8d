//! Engine and column family options
//!
//! Both accept `key=value` entries from option strings; `set` reports whether
//! the key was understood so callers can layer their own keys on top.

use crate::config::{parse_bool, split_option_string, WalSyncStrategy};
use crate::error::{Result, StoreError};

/// Tuning knobs that apply to one column family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFamilyOptions {
    /// Memtable size (bytes) that triggers a flush
    pub write_buffer_size: usize,

    /// Table count at which the family is compacted after a flush
    pub level0_file_num_compaction_trigger: usize,

    /// Never compact automatically; explicit compactions still run
    pub disable_auto_compactions: bool,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        Self {
            write_buffer_size: 64 * 1024 * 1024,
            level0_file_num_compaction_trigger: 4,
            disable_auto_compactions: false,
        }
    }
}

impl ColumnFamilyOptions {
    /// Apply one entry; `Ok(false)` if the key is not a column family option
    pub fn set(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "write_buffer_size" => self.write_buffer_size = parse_size(key, value)?,
            "level0_file_num_compaction_trigger" => {
                self.level0_file_num_compaction_trigger = parse_size(key, value)?.max(1)
            }
            "disable_auto_compactions" => {
                self.disable_auto_compactions = parse_bool(value)
                    .ok_or_else(|| StoreError::InvalidOption(format!("{}={}", key, value)))?
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Layer an option string over `base`; unknown keys are rejected
    pub fn parse(base: &ColumnFamilyOptions, text: &str) -> Result<Self> {
        let mut options = base.clone();
        for (key, value) in split_option_string(text)? {
            if !options.set(&key, &value)? {
                return Err(StoreError::InvalidOption(format!(
                    "unknown column family option '{}'",
                    key
                )));
            }
        }
        Ok(options)
    }
}

/// Options for opening an engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Create the directory and a fresh manifest when none exists
    pub create_if_missing: bool,

    pub wal_sync_strategy: WalSyncStrategy,

    /// Families compacted concurrently by a full compaction
    pub compaction_threads: usize,

    /// Families flushed concurrently
    pub flusher_threads: usize,

    /// Options for the default family and the base for all others
    pub default_cf: ColumnFamilyOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            compaction_threads: 1,
            flusher_threads: 1,
            default_cf: ColumnFamilyOptions::default(),
        }
    }
}

impl EngineOptions {
    /// Apply one entry; `Ok(false)` if the engine does not know the key
    pub fn set(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "create_if_missing" => {
                self.create_if_missing = parse_bool(value)
                    .ok_or_else(|| StoreError::InvalidOption(format!("{}={}", key, value)))?;
                Ok(true)
            }
            _ => self.default_cf.set(key, value),
        }
    }
}

fn parse_size(key: &str, value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| StoreError::InvalidOption(format!("{}={}", key, value)))
}
