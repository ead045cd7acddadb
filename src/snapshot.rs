//! Checkpoints of generated types.
//!
//! A [`Snapshot`] holds the storage mode, the hierarchy table and every
//! generated type spec, as JSON. Restoring it with
//! [`Composer::from_snapshot`](crate::Composer::from_snapshot) keeps
//! hierarchy codes stable and loads the stored specs instead of calling the
//! code generator.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;
use crate::codegen::ExecutableTypeSpec;
use crate::hierarchy::HierarchyTable;
use crate::storage::StorageMode;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeSnapshot {
    pub key: CacheKey,
    pub spec: ExecutableTypeSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperSnapshot {
    pub core_type: String,
    pub spec: ExecutableTypeSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub storage_mode: StorageMode,
    pub hierarchy: HierarchyTable,
    pub recipes: Vec<RecipeSnapshot>,
    pub wrappers: Vec<WrapperSnapshot>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}
