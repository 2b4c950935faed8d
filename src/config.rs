//! Configuration for ShardKV
//!
//! Centralized configuration with sensible defaults, plus the option-string
//! interpreter that splits tuning knobs between the engine and the store.

use std::path::PathBuf;

use crate::engine::EngineOptions;
use crate::error::{Result, StoreError};

/// Main configuration for a ShardKV store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── MANIFEST         (column family catalog)
    ///     ├── wal.log          (write-ahead log, shared by all families)
    ///     ├── cf/{id}/         (SSTable files per column family)
    ///     └── sharding/        (persisted sharding definition + recreate marker)
    pub data_dir: PathBuf,

    /// Opaque option string, e.g. `"write_buffer_size=1048576;compact_on_mount=true"`
    pub options: String,

    // -------------------------------------------------------------------------
    // Transaction Configuration
    // -------------------------------------------------------------------------
    /// At this many keys, prefix/range removal switches from per-key
    /// deletes to a single range delete; 0 never switches
    pub delete_range_threshold: u64,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy for non-durable submits
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Default per-family memtable size before flush (in bytes)
    pub memtable_size_limit: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./shardkv_data"),
            options: String::new(),
            delete_range_threshold: 1024 * 1024,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            memtable_size_limit: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Interpret the option string into engine options and store overrides
    pub fn store_options(&self) -> Result<StoreOptions> {
        let mut engine = EngineOptions {
            wal_sync_strategy: self.wal_sync_strategy,
            ..EngineOptions::default()
        };
        engine.default_cf.write_buffer_size = self.memtable_size_limit;

        let mut store = StoreOptions {
            engine,
            compact_on_mount: false,
            disable_wal: false,
        };

        for (key, value) in split_option_string(&self.options)? {
            if store.engine.set(&key, &value)? {
                tracing::debug!(option = %key, value = %value, "set engine option");
                continue;
            }
            store.interpret(&key, &value)?;
            tracing::debug!(option = %key, value = %value, "set store option");
        }

        Ok(store)
    }
}

/// Options after the option string has been split between engine and store
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Everything the engine understood, plus thread counts the store set on it
    pub engine: EngineOptions,

    /// Run a full compaction at the end of open
    pub compact_on_mount: bool,

    /// Skip the WAL entirely; durable submits then cannot request a sync
    pub disable_wal: bool,
}

impl StoreOptions {
    /// Named overrides the store intercepts itself
    pub const INTERCEPTED: [&'static str; 4] = [
        "compaction_threads",
        "flusher_threads",
        "compact_on_mount",
        "disable_wal",
    ];

    fn interpret(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "compaction_threads" => {
                self.engine.compaction_threads = parse_thread_count(key, value)?;
            }
            "flusher_threads" => {
                self.engine.flusher_threads = parse_thread_count(key, value)?;
            }
            "compact_on_mount" => {
                self.compact_on_mount = parse_bool(value).ok_or_else(|| invalid(key, value))?;
            }
            "disable_wal" | "disableWAL" => {
                self.disable_wal = parse_bool(value).ok_or_else(|| invalid(key, value))?;
            }
            _ => return Err(invalid(key, value)),
        }
        Ok(())
    }
}

/// Split `k=v` entries separated by `,`, `;` or newlines
pub fn split_option_string(text: &str) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    for item in text.split([',', ';', '\n']) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| StoreError::InvalidOption(format!("missing '=' in '{}'", item)))?;
        entries.push((key.trim().to_string(), value.trim().to_string()));
    }
    Ok(entries)
}

/// `true`/`false` in any case, or an integer where non-zero means true
pub fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        value.parse::<i64>().ok().map(|v| v != 0)
    }
}

fn parse_thread_count(key: &str, value: &str) -> Result<usize> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(key, value)),
    }
}

fn invalid(key: &str, value: &str) -> StoreError {
    StoreError::InvalidOption(format!("{}={}", key, value))
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the opaque option string
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.config.options = options.into();
        self
    }

    /// Set the per-call key count above which removals become range deletes
    pub fn delete_range_threshold(mut self, threshold: u64) -> Self {
        self.config.delete_range_threshold = threshold;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
