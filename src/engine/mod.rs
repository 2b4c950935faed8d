//! Engine Module
//!
//! The embedded ordered key-value engine: column families over one shared
//! write-ahead log.
//!
//! ## Responsibilities
//! - Catalog column families in the MANIFEST
//! - Apply write batches atomically (one WAL record per batch)
//! - Resolve merges through each family's operator
//! - Flush memtables, truncate the WAL, compact tables
//! - Recover from the WAL on open; repair damaged directories
//!
//! ## On-disk layout
//! ```text
//! {path}/
//!   ├── MANIFEST      (families: id, name, merge operator identity)
//!   ├── wal.log       (batches not yet flushed, all families)
//!   └── cf/
//!       ├── 0/        (default family tables)
//!       └── {id}/     (one directory per family)
//! ```

mod batch;
mod column_family;
mod cursor;
mod manifest;
mod merge;
mod options;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, StoreError};
use crate::storage::StorageManager;
use crate::wal::{Operation, WalRecovery, WalWriter};

pub use batch::{WriteBatch, WriteOptions};
pub use column_family::{ColumnFamilyDescriptor, ColumnFamilyHandle};
pub use cursor::{CfCursor, RawCursor};
pub use manifest::DEFAULT_COLUMN_FAMILY;
pub use merge::AssociativeMerge;
pub use options::{ColumnFamilyOptions, EngineOptions};

use column_family::ColumnFamilyData;
use manifest::{FamilyRecord, Manifest, DEFAULT_CF_ID, MANIFEST_FILENAME};

/// The embedded storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (write/flush/create_column_family): serialized by `write_lock`
///   - Must acquire: write_lock → WAL → memtables → storage
/// - **Reads** (get/cursors): concurrent, through each family's swap lock;
///   a batch holds the swap locks of the families it touches while it applies
/// - **Compactions**: per family, outside `write_lock`
pub struct Engine {
    path: PathBuf,

    options: EngineOptions,

    manifest: Mutex<Manifest>,

    /// Open families by id
    families: RwLock<BTreeMap<u32, Arc<ColumnFamilyData>>>,

    default_cf: Arc<ColumnFamilyData>,

    /// Shared by every family (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// Serializes write operations
    write_lock: Mutex<()>,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const CF_DIR: &'static str = "cf";

    /// Open or create an engine
    ///
    /// Every family in the MANIFEST needs a descriptor (the default family may
    /// be omitted); descriptors for families that do not exist are an error.
    ///
    /// On startup:
    /// 1. Load or create the MANIFEST
    /// 2. Match descriptors to persisted families, checking merge operators
    /// 3. Load each family's tables
    /// 4. Replay the WAL, flush what it held, truncate it
    pub fn open(
        path: &Path,
        options: EngineOptions,
        descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<Self> {
        if !path.join(MANIFEST_FILENAME).exists() {
            if !options.create_if_missing {
                return Err(StoreError::Engine(format!(
                    "{} does not exist (create_if_missing is false)",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
            Manifest::new().store(path)?;
            tracing::info!(path = %path.display(), "created new engine");
        }

        let mut manifest = Manifest::load(path)?;
        let mut by_name: HashMap<String, ColumnFamilyDescriptor> = HashMap::new();
        for desc in descriptors {
            if manifest.find(&desc.name).is_none() {
                return Err(StoreError::Engine(format!(
                    "column family '{}' does not exist",
                    desc.name
                )));
            }
            by_name.insert(desc.name.clone(), desc);
        }

        let mut manifest_dirty = false;
        let mut families = BTreeMap::new();
        for record in manifest.families.iter_mut() {
            let desc = match by_name.remove(&record.name) {
                Some(desc) => desc,
                None if record.id == DEFAULT_CF_ID => ColumnFamilyDescriptor::new(
                    DEFAULT_COLUMN_FAMILY,
                    options.default_cf.clone(),
                ),
                None => {
                    return Err(StoreError::Engine(format!(
                        "column family '{}' must be opened",
                        record.name
                    )))
                }
            };
            manifest_dirty |= check_merge_operator(record, &desc)?;

            let dir = path.join(Self::CF_DIR).join(record.id.to_string());
            let data = ColumnFamilyData::open(
                record.id,
                record.name.clone(),
                desc.options,
                desc.merge_operator,
                &dir,
            )?;
            families.insert(record.id, Arc::new(data));
        }
        if manifest_dirty {
            manifest.store(path)?;
        }

        let default_cf = families
            .get(&DEFAULT_CF_ID)
            .cloned()
            .ok_or_else(|| StoreError::Engine("default column family missing".to_string()))?;

        let wal_path = path.join(Self::WAL_FILENAME);
        let (entries, recovery) = if wal_path.exists() {
            WalRecovery::recover(&wal_path)?
        } else {
            (Vec::new(), Default::default())
        };
        if recovery.entries_recovered > 0 || recovery.entries_corrupted > 0 {
            tracing::info!(
                recovered = recovery.entries_recovered,
                corrupted = recovery.entries_corrupted,
                last_lsn = recovery.last_lsn,
                "WAL recovery"
            );
        }
        for entry in entries {
            for op in entry.operations {
                match families.get(&op.cf()) {
                    Some(cf) => apply_operation(cf, op)?,
                    None => tracing::warn!(cf = op.cf(), lsn = entry.lsn, "skipping WAL operation for unknown column family"),
                }
            }
        }
        let wal = WalWriter::open(&wal_path, options.wal_sync_strategy, recovery.last_lsn)?;

        let engine = Self {
            path: path.to_path_buf(),
            options,
            manifest: Mutex::new(manifest),
            families: RwLock::new(families),
            default_cf,
            wal: Mutex::new(wal),
            write_lock: Mutex::new(()),
        };

        // Recovered data goes to tables right away so the WAL can start empty
        if recovery.entries_recovered > 0 {
            engine.flush()?;
        }

        tracing::debug!(
            path = %engine.path.display(),
            families = engine.families.read().len(),
            "engine opened"
        );
        Ok(engine)
    }

    /// Names of the families persisted in the MANIFEST at `path`, in id order
    pub fn list_column_families(path: &Path) -> Result<Vec<String>> {
        let manifest = Manifest::load(path)?;
        let mut families = manifest.families;
        families.sort_by_key(|f| f.id);
        Ok(families.into_iter().map(|f| f.name).collect())
    }

    /// Create and open a new family
    pub fn create_column_family(&self, desc: ColumnFamilyDescriptor) -> Result<ColumnFamilyHandle> {
        let _write_guard = self.write_lock.lock();
        let mut manifest = self.manifest.lock();

        if manifest.find(&desc.name).is_some() {
            return Err(StoreError::Engine(format!(
                "column family '{}' already exists",
                desc.name
            )));
        }
        let id = manifest.next_cf_id;
        let dir = self.path.join(Self::CF_DIR).join(id.to_string());
        let merge_name = desc.merge_operator.as_ref().map(|m| m.name());
        let data = Arc::new(ColumnFamilyData::open(
            id,
            desc.name.clone(),
            desc.options,
            desc.merge_operator,
            &dir,
        )?);

        manifest.families.push(FamilyRecord {
            id,
            name: desc.name.clone(),
            merge_operator: merge_name,
        });
        manifest.next_cf_id = id + 1;
        manifest.store(&self.path)?;

        self.families.write().insert(id, data.clone());
        tracing::info!(name = %desc.name, id, "created column family");
        Ok(ColumnFamilyHandle { data })
    }

    /// Handle for an open family
    pub fn cf_handle(&self, name: &str) -> Option<ColumnFamilyHandle> {
        self.families
            .read()
            .values()
            .find(|cf| cf.name == name)
            .map(|data| ColumnFamilyHandle { data: data.clone() })
    }

    pub fn default_cf(&self) -> ColumnFamilyHandle {
        ColumnFamilyHandle {
            data: self.default_cf.clone(),
        }
    }

    /// Names of the open families, in id order
    pub fn column_family_names(&self) -> Vec<String> {
        self.families.read().values().map(|cf| cf.name.clone()).collect()
    }

    /// Release a handle; the family and its data stay in the engine
    pub fn destroy_column_family_handle(&self, handle: ColumnFamilyHandle) {
        tracing::trace!(name = %handle.name(), "released column family handle");
        drop(handle);
    }

    // =========================================================================
    // Reads and writes
    // =========================================================================

    pub fn get(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<Option<Bytes>> {
        cf.data.get(key)
    }

    pub fn cursor(&self, cf: &ColumnFamilyHandle) -> CfCursor {
        CfCursor::new(cf.data.clone())
    }

    /// Apply a batch atomically
    ///
    /// Steps:
    /// 1. Acquire write lock
    /// 2. Validate every target family (merges need an operator)
    /// 3. Append one WAL record, unless disabled
    /// 4. Apply to memtables in order, readers of the touched families held off
    /// 5. Flush if a memtable is full, then compact crowded families
    pub fn write(&self, batch: WriteBatch, opts: WriteOptions) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let crowded: Vec<Arc<ColumnFamilyData>> = {
            let _write_guard = self.write_lock.lock();
            let families = self.families.read();

            for op in batch.operations() {
                let cf = families.get(&op.cf()).ok_or_else(|| {
                    StoreError::Engine(format!("unknown column family id {}", op.cf()))
                })?;
                if matches!(op, Operation::Merge { .. }) && cf.merge_operator.is_none() {
                    return Err(StoreError::Engine(format!(
                        "merge on column family '{}' without a merge operator",
                        cf.name
                    )));
                }
            }

            if !opts.disable_wal {
                self.wal.lock().append(batch.operations(), opts.sync)?;
            }

            let touched: BTreeSet<u32> = batch.operations().iter().map(Operation::cf).collect();
            let mut full = false;
            {
                // id order
                let _readers_blocked: Vec<_> = touched
                    .iter()
                    .filter_map(|id| families.get(id))
                    .map(|cf| cf.block_readers())
                    .collect();
                for op in batch.into_operations() {
                    if let Some(cf) = families.get(&op.cf()) {
                        apply_operation(cf, op)?;
                        full |= cf.needs_flush();
                    }
                }
            }

            if full {
                self.flush_locked(&families)?;
            }
            families
                .values()
                .filter(|cf| cf.needs_compaction())
                .cloned()
                .collect()
        };

        for cf in crowded {
            cf.storage.compact(None)?;
        }
        Ok(())
    }

    // =========================================================================
    // Flush and compaction
    // =========================================================================

    /// Flush every non-empty memtable, then truncate the WAL
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        let families = self.families.read();
        self.flush_locked(&families)
    }

    /// Called with the write lock held
    fn flush_locked(&self, families: &BTreeMap<u32, Arc<ColumnFamilyData>>) -> Result<()> {
        let dirty: Vec<&Arc<ColumnFamilyData>> = families
            .values()
            .filter(|cf| !cf.memtable.is_empty())
            .collect();
        if dirty.is_empty() {
            return Ok(());
        }

        run_parallel(self.options.flusher_threads, &dirty, |cf| {
            cf.flush().map(|_| ())
        })?;
        self.wal.lock().truncate()?;

        tracing::debug!(families = dirty.len(), "flushed memtables");
        Ok(())
    }

    /// Merge a family's tables into one when any overlaps `[start, end)`
    ///
    /// Both bounds `None` compacts unconditionally. Memtables are flushed first.
    pub fn compact_range(
        &self,
        cf: &ColumnFamilyHandle,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        self.flush()?;
        let range = match (start, end) {
            (None, None) => None,
            (start, end) => Some((start.unwrap_or(&[]), end)),
        };
        let meta = cf.data.storage.compact(range)?;
        tracing::debug!(
            cf = %cf.name(),
            compacted = meta.is_some(),
            "compact_range finished"
        );
        Ok(())
    }

    /// Compact every family, `compaction_threads` at a time
    pub fn compact_all(&self) -> Result<()> {
        self.flush()?;
        let families: Vec<Arc<ColumnFamilyData>> =
            self.families.read().values().cloned().collect();
        run_parallel(self.options.compaction_threads, &families, |cf| {
            cf.storage.compact(None).map(|_| ())
        })
    }

    /// Bytes of table data covering `[start, end)`
    pub fn approximate_size(&self, cf: &ColumnFamilyHandle, start: &[u8], end: Option<&[u8]>) -> u64 {
        cf.data.storage.approximate_size(start, end)
    }

    /// Number of tables a family currently has (for testing/debugging)
    pub fn sstable_count(&self, cf: &ColumnFamilyHandle) -> usize {
        cf.data.storage.sstable_count()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Flush everything and sync the WAL; the engine stays usable
    pub fn shutdown(&self) -> Result<()> {
        self.flush()?;
        self.wal.lock().sync()
    }

    /// Close the engine gracefully
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    /// Bring a damaged directory back to an openable state
    ///
    /// 1. Truncate a torn WAL tail
    /// 2. Rebuild an unreadable MANIFEST with only the default family
    /// 3. Drop table files that fail validation
    /// 4. Delete every file and directory the engine does not recognise
    pub fn repair(path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(StoreError::Engine(format!("{} does not exist", path.display())));
        }
        tracing::warn!(path = %path.display(), "repairing engine directory");

        let wal_path = path.join(Self::WAL_FILENAME);
        let mut wal_max_cf = 0;
        if wal_path.exists() {
            let (entries, result) = WalRecovery::recover(&wal_path)?;
            wal_max_cf = entries
                .iter()
                .flat_map(|e| e.operations.iter().map(Operation::cf))
                .max()
                .unwrap_or(0);
            tracing::info!(
                recovered = result.entries_recovered,
                truncated = result.was_truncated,
                "repair checked WAL"
            );
        }

        let cf_root = path.join(Self::CF_DIR);
        fs::create_dir_all(&cf_root)?;

        let manifest = match Manifest::load(path) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(error = %e, "rebuilding MANIFEST with the default family only");
                let mut manifest = Manifest::new();
                // ids already used on disk or in the WAL must not be handed out again
                let max_dir_id = fs::read_dir(&cf_root)?
                    .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse::<u32>().ok())
                    .max()
                    .unwrap_or(0);
                manifest.next_cf_id = max_dir_id.max(wal_max_cf).max(DEFAULT_CF_ID) + 1;
                manifest
            }
        };

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name();
            let known = [MANIFEST_FILENAME, Self::WAL_FILENAME, Self::CF_DIR]
                .iter()
                .any(|k| name == *k);
            if !known {
                remove_path(&entry.path())?;
            }
        }

        let mut removed_tables = 0;
        for entry in fs::read_dir(&cf_root)? {
            let entry = entry?;
            let dir = entry.path();
            let id = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok());
            let known = dir.is_dir() && id.is_some_and(|id| manifest.families.iter().any(|f| f.id == id));
            if known {
                removed_tables += StorageManager::repair(&dir)?;
            } else {
                remove_path(&dir)?;
            }
        }

        manifest.store(path)?;
        tracing::info!(
            families = manifest.families.len(),
            removed_tables,
            "repair finished"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Apply one logged operation to a family's memtable
///
/// Reads only through the `*_locked` accessors.
fn apply_operation(cf: &ColumnFamilyData, op: Operation) -> Result<()> {
    match op {
        Operation::Put { key, value, .. } => {
            cf.memtable.put(key, value);
        }
        Operation::Delete { key, .. } | Operation::SingleDelete { key, .. } => {
            cf.memtable.delete(key);
        }
        Operation::DeleteRange { start, end, .. } => {
            for key in cf.keys_in_range_locked(&start, end.as_deref()) {
                cf.memtable.delete(key);
            }
        }
        Operation::Merge { key, value, .. } => {
            let operator = cf.merge_operator.as_ref().ok_or_else(|| {
                StoreError::Engine(format!("no merge operator on column family '{}'", cf.name))
            })?;
            let existing = cf.get_locked(&key)?;
            if let Some(merged) = operator.merge(&key, existing.as_deref(), &value) {
                cf.memtable.put(key, merged);
            }
        }
    }
    Ok(())
}

/// Record or check the merge operator identity; returns whether the record changed
fn check_merge_operator(record: &mut FamilyRecord, desc: &ColumnFamilyDescriptor) -> Result<bool> {
    let supplied = desc.merge_operator.as_ref().map(|m| m.name());
    match (&record.merge_operator, supplied) {
        (Some(stored), Some(supplied)) if *stored == supplied => Ok(false),
        (None, None) => Ok(false),
        (None, Some(supplied)) => {
            record.merge_operator = Some(supplied);
            Ok(true)
        }
        (Some(stored), supplied) => Err(StoreError::Engine(format!(
            "merge operator for column family '{}' changed from '{}' to '{}'",
            record.name,
            stored,
            supplied.as_deref().unwrap_or("<none>")
        ))),
    }
}

/// Run `f` over `items`, split across at most `threads` scoped threads
fn run_parallel<T, F>(threads: usize, items: &[T], f: F) -> Result<()>
where
    T: Sync,
    F: Fn(&T) -> Result<()> + Sync,
{
    if threads <= 1 || items.len() <= 1 {
        return items.iter().try_for_each(&f);
    }

    let chunk = (items.len() + threads - 1) / threads;
    let f = &f;
    crossbeam::thread::scope(|s| {
        let workers: Vec<_> = items
            .chunks(chunk)
            .map(|part| s.spawn(move |_| part.iter().try_for_each(f)))
            .collect();
        workers.into_iter().try_for_each(|worker| -> Result<()> {
            worker
                .join()
                .map_err(|_| StoreError::Engine("worker thread panicked".to_string()))?
        })
    })
    .map_err(|_| StoreError::Engine("worker thread panicked".to_string()))?
}

fn remove_path(path: &Path) -> Result<()> {
    tracing::warn!(path = %path.display(), "repair removing unrecognised entry");
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}
