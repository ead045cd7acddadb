//! View and host type definitions, and the per-pair field mask.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hierarchy::BitCode;
use crate::model::{FieldType, HostField, ViewField};

// ============================================================================
// ViewTypeDefinition
// ============================================================================

/// A declared view (trait) type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewTypeDefinition {
    pub name: String,
    pub parents: Vec<String>,
    /// Inherited fields first, then own fields, once declared.
    pub fields: Vec<ViewField>,
    /// Assigned by the registry at declaration.
    pub code: Option<BitCode>,
}

impl ViewTypeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), parents: Vec::new(), fields: Vec::new(), code: None }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(ViewField::new(name, ty));
        self
    }

    pub fn with_aliased_field(
        mut self,
        name: impl Into<String>,
        ty: FieldType,
        alias: impl Into<String>,
    ) -> Self {
        self.fields.push(ViewField::aliased(name, ty, alias));
        self
    }

    pub fn field(&self, name: &str) -> Option<&ViewField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

// ============================================================================
// HostTypeDefinition
// ============================================================================

/// A declared host type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTypeDefinition {
    pub name: String,
    pub fields: Vec<HostField>,
    /// Instances carry their own soft storage slot and view table.
    pub composable: bool,
    /// Relaxed binding: any non-primitive view field binds to a same-named host field.
    pub fully_composable: bool,
    /// Attachments to this type are always logical.
    pub logical: bool,
    /// Set on synthesized wrapper types: the core type they wrap.
    pub wrapper_of: Option<String>,
}

impl HostTypeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            composable: false,
            fully_composable: false,
            logical: false,
            wrapper_of: None,
        }
    }

    pub fn composable(mut self) -> Self {
        self.composable = true;
        self
    }

    pub fn fully_composable(mut self) -> Self {
        self.fully_composable = true;
        self
    }

    pub fn logical(mut self) -> Self {
        self.logical = true;
        self
    }

    /// Add a field whose accessors live on this type under the same name.
    pub fn with_field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        let field = HostField::new(self.name.clone(), name, ty);
        self.fields.push(field);
        self
    }

    pub fn with_host_field(mut self, field: HostField) -> Self {
        self.fields.push(field);
        self
    }

    /// The host field whose resolved alias equals `hook`.
    pub fn field_by_alias(&self, hook: &str) -> Option<&HostField> {
        self.fields.iter().find(|f| f.resolve_alias() == hook)
    }

    pub fn field(&self, name: &str) -> Option<&HostField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ============================================================================
// FieldMask
// ============================================================================

/// One bit per view field, in declaration order; a set bit marks a soft field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldMask {
    bits: BitCode,
    len: usize,
}

impl FieldMask {
    pub fn all_hard(len: usize) -> Self {
        Self { bits: BitCode::new(), len }
    }

    pub fn mark_soft(&mut self, index: usize) {
        debug_assert!(index < self.len);
        self.bits.set(index);
    }

    pub fn is_soft(&self, index: usize) -> bool {
        self.bits.get(index)
    }

    pub fn is_hard(&self, index: usize) -> bool {
        index < self.len && !self.bits.get(index)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn soft_count(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn bits(&self) -> &BitCode {
        &self.bits
    }
}

impl fmt::Display for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.len {
            write!(f, "{}", if self.is_soft(i) { '1' } else { '0' })?;
        }
        Ok(())
    }
}
