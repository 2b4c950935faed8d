//! Store lifecycle: create, open, repair
//!
//! Merge operators can only be registered on the builder; opening consumes
//! it, so an open store never sees a new registration.
//!
//! ## Markers
//! ```text
//! {data_dir}/sharding/
//!   ├── def               (sharding text the store was created with)
//!   └── recreate_columns  ("1" while missing families may be recreated)
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::config::StoreOptions;
use crate::engine::{
    ColumnFamilyDescriptor, ColumnFamilyHandle, ColumnFamilyOptions, Engine, DEFAULT_COLUMN_FAMILY,
};
use crate::error::{Result, StoreError};

use super::compaction::CompactionQueue;
use super::directory::PartitionDirectory;
use super::merge::{MergeLinker, MergeOperator, MergeRegistrations, MergeRouter};
use super::sharding::{ColumnFamilySpec, ShardingDefinition};
use super::{EngineCompactor, Store};

const MARKER_DIR: &str = "sharding";
const DEFINITION_MARKER: &str = "def";
const RECREATE_MARKER: &str = "recreate_columns";

/// Configures and opens a [`Store`]
pub struct StoreBuilder {
    config: Config,
    merge_operators: MergeRegistrations,
}

impl StoreBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            merge_operators: Vec::new(),
        }
    }

    /// Register `operator` for every key under `prefix`
    pub fn merge_operator(mut self, prefix: impl Into<String>, operator: Arc<dyn MergeOperator>) -> Self {
        self.merge_operators.push((prefix.into(), operator));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a fresh store laid out by `sharding`
    pub fn create_and_open(self, sharding: &str) -> Result<Store> {
        let definition = ShardingDefinition::parse(sharding)?;
        let mut options = self.config.store_options()?;
        options.engine.create_if_missing = true;

        let data_dir = self.config.data_dir.clone();
        fs::create_dir_all(&data_dir)?;
        let engine = Engine::open(
            &data_dir,
            options.engine.clone(),
            vec![self.default_descriptor(&definition, &options)],
        )?;

        let mut handles = Vec::new();
        for spec in definition.specs() {
            for (index, name) in spec.shard_names().into_iter().enumerate() {
                let handle = engine.create_column_family(self.shard_descriptor(spec, name, &options)?)?;
                handles.push((spec.clone(), index, handle));
            }
        }
        write_definition(&data_dir, sharding.trim())?;

        tracing::info!(
            path = %data_dir.display(),
            sharding = %definition,
            "created store"
        );
        self.assemble(engine, definition, handles, options)
    }

    /// Open a store created earlier with the same shard layout
    ///
    /// Fails with `ShardingMismatch` if `sharding` differs structurally from
    /// the stored definition, `ExtraColumnFamilies` if the engine holds
    /// families the definition does not declare, and `MissingColumnFamily`
    /// if declared families are absent outside recreation mode.
    pub fn open_existing(self, sharding: &str) -> Result<Store> {
        let definition = ShardingDefinition::parse(sharding)?;
        let mut options = self.config.store_options()?;
        options.engine.create_if_missing = false;
        let data_dir = self.config.data_dir.clone();

        let stored_text = read_marker(&data_dir, DEFINITION_MARKER)?.unwrap_or_default();
        let stored = ShardingDefinition::parse(&stored_text)?;
        if !definition.same_layout(&stored) {
            return Err(StoreError::ShardingMismatch {
                requested: sharding.trim().to_string(),
                stored: stored_text.trim().to_string(),
            });
        }
        // per-family options come from the stored definition
        let definition = stored;

        let engine_families = Engine::list_column_families(&data_dir)?;
        let declared = definition.column_names();
        let (existing, missing): (Vec<String>, Vec<String>) = declared
            .iter()
            .cloned()
            .partition(|name| engine_families.contains(name));
        if existing.len() + 1 != engine_families.len() {
            let extra: Vec<String> = engine_families
                .into_iter()
                .filter(|name| name != DEFAULT_COLUMN_FAMILY && !declared.contains(name))
                .collect();
            return Err(StoreError::ExtraColumnFamilies(extra));
        }

        let recreate = read_marker(&data_dir, RECREATE_MARKER)?.as_deref() == Some("1");
        if !missing.is_empty() && !recreate {
            return Err(StoreError::MissingColumnFamily(missing));
        }

        let mut descriptors = vec![self.default_descriptor(&definition, &options)];
        for spec in definition.specs() {
            for name in spec.shard_names() {
                if existing.contains(&name) {
                    descriptors.push(self.shard_descriptor(spec, name, &options)?);
                }
            }
        }
        let engine = Engine::open(&data_dir, options.engine.clone(), descriptors)?;

        let mut handles = Vec::new();
        for spec in definition.specs() {
            for (index, name) in spec.shard_names().into_iter().enumerate() {
                let handle = match engine.cf_handle(&name) {
                    Some(handle) => handle,
                    None => {
                        tracing::warn!(column = %name, "recreating missing column family");
                        engine.create_column_family(self.shard_descriptor(spec, name, &options)?)?
                    }
                };
                handles.push((spec.clone(), index, handle));
            }
        }
        if !missing.is_empty() {
            remove_marker(&data_dir, RECREATE_MARKER)?;
            tracing::info!(recreated = ?missing, "finished column family recreation");
        }

        tracing::info!(
            path = %data_dir.display(),
            sharding = %definition,
            "opened store"
        );
        self.assemble(engine, definition, handles, options)
    }

    /// Repair the engine, then restore the sharding markers it removes
    ///
    /// The recreation marker is set whenever a definition exists, so the next
    /// open may recreate families that repair dropped.
    pub fn repair(&self) -> Result<()> {
        let data_dir = &self.config.data_dir;
        let definition = read_marker(data_dir, DEFINITION_MARKER)?.unwrap_or_default();

        let result = Engine::repair(data_dir);
        if let Err(e) = &result {
            tracing::error!(error = %e, "engine repair failed");
        }

        if !definition.is_empty() {
            write_definition(data_dir, &definition)?;
            write_marker(data_dir, RECREATE_MARKER, "1")?;
            tracing::info!("sharding markers restored, recreation enabled");
        }
        result
    }

    fn default_descriptor(&self, definition: &ShardingDefinition, options: &StoreOptions) -> ColumnFamilyDescriptor {
        let router = MergeRouter::new(
            self.merge_operators.clone(),
            definition.specs().iter().map(|spec| spec.name.as_str()),
        );
        ColumnFamilyDescriptor::new(DEFAULT_COLUMN_FAMILY, options.engine.default_cf.clone())
            .with_merge_operator(Arc::new(router))
    }

    fn shard_descriptor(
        &self,
        spec: &ColumnFamilySpec,
        name: String,
        options: &StoreOptions,
    ) -> Result<ColumnFamilyDescriptor> {
        let cf_options = ColumnFamilyOptions::parse(&options.engine.default_cf, &spec.options)?;
        let descriptor = ColumnFamilyDescriptor::new(name, cf_options);
        let operator = self
            .merge_operators
            .iter()
            .find(|(prefix, _)| *prefix == spec.name)
            .map(|(_, op)| op.clone());
        Ok(match operator {
            Some(op) => descriptor.with_merge_operator(Arc::new(MergeLinker::new(op))),
            None => descriptor,
        })
    }

    fn assemble(
        self,
        engine: Engine,
        definition: ShardingDefinition,
        handles: Vec<(ColumnFamilySpec, usize, ColumnFamilyHandle)>,
        options: StoreOptions,
    ) -> Result<Store> {
        let mut directory = PartitionDirectory::new();
        for (spec, index, handle) in handles {
            directory.register(&spec.name, spec.hash_low, spec.hash_high, index, handle)?;
        }

        let engine = Arc::new(engine);
        let default_cf = engine.default_cf();
        let compactions = CompactionQueue::new(Arc::new(EngineCompactor {
            engine: Arc::clone(&engine),
            shared: default_cf.clone(),
        }));

        let store = Store {
            engine,
            default_cf,
            directory,
            sharding: definition,
            delete_range_threshold: self.config.delete_range_threshold,
            disable_wal: options.disable_wal,
            compactions,
            data_dir: self.config.data_dir,
            closed: false,
        };

        if options.compact_on_mount {
            tracing::info!("compacting on mount");
            store.compact_now()?;
        }
        Ok(store)
    }
}

fn marker_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(MARKER_DIR).join(name)
}

fn read_marker(data_dir: &Path, name: &str) -> Result<Option<String>> {
    match fs::read_to_string(marker_path(data_dir, name)) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_marker(data_dir: &Path, name: &str, contents: &str) -> Result<()> {
    fs::create_dir_all(data_dir.join(MARKER_DIR))?;
    let path = marker_path(data_dir, name);
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

fn remove_marker(data_dir: &Path, name: &str) -> Result<()> {
    match fs::remove_file(marker_path(data_dir, name)) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// An empty definition is stored as no marker at all
fn write_definition(data_dir: &Path, text: &str) -> Result<()> {
    if text.is_empty() {
        remove_marker(data_dir, DEFINITION_MARKER)
    } else {
        write_marker(data_dir, DEFINITION_MARKER, text)
    }
}
