//! # Hierarchy Encoder
//!
//! Assigns every view type a bit code such that subsumption is a bitwise
//! containment test:
//!
//! ```text
//! is_ancestor(a, b)  ⇔  (code(a) & code(b)) == code(a)
//! ```
//!
//! Each type gets the next unused bit when first declared and its code is
//! that bit OR-ed with its parents' codes. Because a type's parents are
//! fixed at declaration, codes issued earlier never change as the hierarchy
//! grows, and bit indices are never reused. Multiple inheritance is allowed;
//! every type implicitly descends from [`ROOT_VIEW`], whose code is the
//! bottom code.

pub mod bitcode;

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use bitcode::BitCode;

/// The implicit root of every view hierarchy ("no declared trait").
pub const ROOT_VIEW: &str = "Thing";

// ============================================================================
// Code table
// ============================================================================

/// One declared type. Its bit index is its position in the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyEntry {
    pub name: String,
    pub parents: Vec<String>,
    pub code: BitCode,
}

/// The append-only code arena. Serializable so a running configuration
/// can be checkpointed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyTable {
    pub entries: Vec<HierarchyEntry>,
}

impl HierarchyTable {
    fn rooted() -> Self {
        Self {
            entries: vec![HierarchyEntry {
                name: ROOT_VIEW.to_string(),
                parents: Vec::new(),
                code: BitCode::from_bits([0]),
            }],
        }
    }

    /// Check that the table could have been produced by `declare`: the root
    /// first, unique names, parents declared earlier, and every code equal to
    /// its own bit plus its parents' codes.
    pub fn validate(&self) -> Result<()> {
        let corrupt = |name: &str, message: String| Error::HierarchyConflict {
            name: name.to_string(),
            message,
        };

        match self.entries.first() {
            Some(root) if root.name == ROOT_VIEW && root.parents.is_empty() => {}
            _ => return Err(corrupt(ROOT_VIEW, "checkpointed table does not start at the root".into())),
        }

        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(self.entries.len());
        for (i, entry) in self.entries.iter().enumerate() {
            if seen.insert(entry.name.as_str(), i).is_some() {
                return Err(corrupt(&entry.name, "declared twice in checkpointed table".into()));
            }

            let mut expected = BitCode::from_bits([i]);
            for parent in &entry.parents {
                let Some(&p) = seen.get(parent.as_str()).filter(|&&p| p < i) else {
                    return Err(corrupt(&entry.name, format!("parent {parent} is not declared before it")));
                };
                expected.union_with(&self.entries[p].code);
            }
            if i > 0 && entry.parents.is_empty() {
                expected.union_with(&self.entries[0].code);
            }
            if entry.code != expected {
                return Err(corrupt(&entry.name, format!("code {} should be {expected}", entry.code)));
            }
        }
        Ok(())
    }
}

struct EncoderState {
    table: HierarchyTable,
    /// name → bit index
    index: HashMap<String, usize>,
}

impl EncoderState {
    fn from_table(table: HierarchyTable) -> Self {
        let index = table
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        Self { table, index }
    }

    fn code(&self, name: &str) -> Result<&BitCode> {
        self.index
            .get(name)
            .map(|&i| &self.table.entries[i].code)
            .ok_or_else(|| Error::UnknownViewType(name.to_string()))
    }
}

// ============================================================================
// HierarchyEncoder
// ============================================================================

/// Thread-safe, append-only hierarchy encoder.
pub struct HierarchyEncoder {
    state: RwLock<EncoderState>,
}

impl HierarchyEncoder {
    pub fn new() -> Self {
        Self { state: RwLock::new(EncoderState::from_table(HierarchyTable::rooted())) }
    }

    /// Declare `name` under `parents` (empty means directly under the root)
    /// and return its code.
    ///
    /// Re-declaring with the same parents returns the existing code; with
    /// different parents it is a `HierarchyConflict`.
    pub fn declare(&self, name: &str, parents: &[String]) -> Result<BitCode> {
        if name == ROOT_VIEW {
            if !parents.is_empty() {
                return Err(Error::HierarchyConflict {
                    name: name.to_string(),
                    message: format!("the root cannot have parents, got {parents:?}"),
                });
            }
            return Ok(self.bottom_code());
        }

        let mut parents: Vec<String> = if parents.is_empty() {
            vec![ROOT_VIEW.to_string()]
        } else {
            parents.to_vec()
        };
        parents.sort();
        parents.dedup();

        let mut state = self.state.write();

        if let Some(&i) = state.index.get(name) {
            let entry = &state.table.entries[i];
            let mut existing = entry.parents.clone();
            if existing.is_empty() {
                existing.push(ROOT_VIEW.to_string());
            }
            existing.sort();
            if existing == parents {
                return Ok(entry.code.clone());
            }
            return Err(Error::HierarchyConflict {
                name: name.to_string(),
                message: format!("already declared under {:?}, not {:?}", entry.parents, parents),
            });
        }

        let id = state.table.entries.len();
        let mut code = BitCode::from_bits([id]);
        for parent in &parents {
            code.union_with(state.code(parent)?);
        }

        state.table.entries.push(HierarchyEntry {
            name: name.to_string(),
            parents,
            code: code.clone(),
        });
        state.index.insert(name.to_string(), id);

        tracing::debug!(view = name, %code, "hierarchy code assigned");
        Ok(code)
    }

    /// Code of a declared type. Never allocates.
    pub fn code_for(&self, name: &str) -> Result<BitCode> {
        self.state.read().code(name).cloned()
    }

    /// The code of the root, contained in every other code.
    pub fn bottom_code(&self) -> BitCode {
        BitCode::from_bits([0])
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.state.read().index.contains_key(name)
    }

    /// True if `a` subsumes `b` (reflexive).
    pub fn is_ancestor(&self, a: &str, b: &str) -> Result<bool> {
        let state = self.state.read();
        Ok(Self::subsumes(state.code(a)?, state.code(b)?))
    }

    /// Code-level subsumption test.
    pub fn subsumes(ancestor: &BitCode, descendant: &BitCode) -> bool {
        ancestor.is_subset_of(descendant)
    }

    /// Strict ancestors of `name`, in declaration order.
    pub fn ancestors(&self, name: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        let code = state.code(name)?;
        Ok(state
            .table
            .entries
            .iter()
            .filter(|e| e.name != name && e.code.is_subset_of(code))
            .map(|e| e.name.clone())
            .collect())
    }

    /// Strict descendants of `name`, in declaration order.
    pub fn descendants(&self, name: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        let code = state.code(name)?;
        Ok(state
            .table
            .entries
            .iter()
            .filter(|e| e.name != name && code.is_subset_of(&e.code))
            .map(|e| e.name.clone())
            .collect())
    }

    pub fn len(&self) -> usize {
        self.state.read().table.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> HierarchyTable {
        self.state.read().table.clone()
    }

    /// Replace the table with a checkpointed one. Only valid while nothing
    /// beyond the root has been declared, otherwise issued codes could move.
    pub fn restore(&self, table: HierarchyTable) -> Result<()> {
        let mut state = self.state.write();
        if state.table.entries.len() > 1 {
            return Err(Error::HierarchyConflict {
                name: ROOT_VIEW.to_string(),
                message: "cannot restore over a hierarchy that already issued codes".into(),
            });
        }
        table.validate()?;
        *state = EncoderState::from_table(table);
        Ok(())
    }
}

impl Default for HierarchyEncoder {
    fn default() -> Self {
        Self::new()
    }
}
