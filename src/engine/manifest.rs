//! Column family catalog
//!
//! ## File Format
//! ```text
//! ┌──────────┬──────────┬──────────────────────────┐
//! │ CRC (4)  │ Len (4)  │ bincode(Manifest)        │
//! └──────────┴──────────┴──────────────────────────┘
//! ```
//! Rewritten whole through a temporary file and a rename.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub(crate) const MANIFEST_FILENAME: &str = "MANIFEST";
const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// Name and id of the family every engine has
pub const DEFAULT_COLUMN_FAMILY: &str = "default";
pub(crate) const DEFAULT_CF_ID: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FamilyRecord {
    pub id: u32,
    pub name: String,
    /// Identity of the merge operator the family was opened with, if any
    pub merge_operator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Manifest {
    pub next_cf_id: u32,
    pub families: Vec<FamilyRecord>,
}

impl Manifest {
    /// A catalog holding only the default family
    pub fn new() -> Self {
        Self {
            next_cf_id: DEFAULT_CF_ID + 1,
            families: vec![FamilyRecord {
                id: DEFAULT_CF_ID,
                name: DEFAULT_COLUMN_FAMILY.to_string(),
                merge_operator: None,
            }],
        }
    }

    pub fn find(&self, name: &str) -> Option<&FamilyRecord> {
        self.families.iter().find(|f| f.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut FamilyRecord> {
        self.families.iter_mut().find(|f| f.name == name)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILENAME);
        let data = fs::read(&path)?;
        if data.len() < 8 {
            return Err(StoreError::Engine(format!("{} is truncated", path.display())));
        }
        let crc = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let payload = &data[8..];
        if payload.len() != len || crc32fast::hash(payload) != crc {
            return Err(StoreError::Engine(format!("{} is corrupt", path.display())));
        }
        let manifest: Manifest = bincode::deserialize(payload)
            .map_err(|e| StoreError::Engine(format!("{} is corrupt: {}", path.display(), e)))?;
        if manifest.find(DEFAULT_COLUMN_FAMILY).is_none() {
            return Err(StoreError::Engine(format!(
                "{} has no default column family",
                path.display()
            )));
        }
        Ok(manifest)
    }

    pub fn store(&self, dir: &Path) -> Result<()> {
        let payload = bincode::serialize(self)?;
        let mut data = Vec::with_capacity(8 + payload.len());
        data.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(&payload);

        let tmp = dir.join(MANIFEST_TMP_FILENAME);
        fs::write(&tmp, &data)?;
        fs::File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, dir.join(MANIFEST_FILENAME))?;
        Ok(())
    }
}
