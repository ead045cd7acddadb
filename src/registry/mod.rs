//! # Type Registry
//!
//! Holds view and host type declarations and decides, per (view, host)
//! pair, which view fields are *hard* (bound to a host field) and which are
//! *soft* (kept in the virtual property store).
//!
//! A view field is hard iff a host field with the same resolved alias exists
//! AND either
//!
//! - the host is fully composable and the view field is non-primitive or
//!   has exactly the host field's type, or
//! - the host field's type is assignable from the view field's type.

pub mod definition;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::hierarchy::{BitCode, HierarchyEncoder, ROOT_VIEW};
use crate::model::{HostField, ViewField};
use crate::{Error, Result};

pub use definition::{FieldMask, HostTypeDefinition, ViewTypeDefinition};

/// Registry of declared view and host types.
pub struct TypeRegistry {
    views: RwLock<HashMap<String, Arc<ViewTypeDefinition>>>,
    hosts: RwLock<HashMap<String, Arc<HostTypeDefinition>>>,
    /// (view, host) → mask
    masks: RwLock<HashMap<(String, String), FieldMask>>,
    hierarchy: HierarchyEncoder,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::with_hierarchy(HierarchyEncoder::new())
    }

    /// Registry over an existing (possibly restored) hierarchy.
    pub fn with_hierarchy(hierarchy: HierarchyEncoder) -> Self {
        let mut root = ViewTypeDefinition::new(ROOT_VIEW);
        root.code = Some(hierarchy.bottom_code());

        let mut views = HashMap::new();
        views.insert(ROOT_VIEW.to_string(), Arc::new(root));

        Self {
            views: RwLock::new(views),
            hosts: RwLock::new(HashMap::new()),
            masks: RwLock::new(HashMap::new()),
            hierarchy,
        }
    }

    pub fn hierarchy(&self) -> &HierarchyEncoder {
        &self.hierarchy
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Declare a view type. Inherited fields are resolved and the hierarchy
    /// code is assigned here; the stored definition never changes afterwards.
    pub fn declare_view(&self, mut def: ViewTypeDefinition) -> Result<Arc<ViewTypeDefinition>> {
        let mut views = self.views.write();
        if views.contains_key(&def.name) {
            return Err(Error::DuplicateDeclaration(def.name));
        }

        let mut inherited: Vec<ViewField> = Vec::new();
        for parent in &def.parents {
            let parent_def = views
                .get(parent)
                .ok_or_else(|| Error::UnknownViewType(parent.clone()))?;
            for field in &parent_def.fields {
                let shadowed = def.fields.iter().any(|f| f.name == field.name);
                let seen = inherited.iter().any(|f| f.name == field.name);
                if !shadowed && !seen {
                    inherited.push(field.clone());
                }
            }
        }
        inherited.append(&mut def.fields);
        def.fields = inherited;

        def.code = Some(self.hierarchy.declare(&def.name, &def.parents)?);

        let def = Arc::new(def);
        views.insert(def.name.clone(), def.clone());
        tracing::debug!(view = %def.name, fields = def.fields.len(), "view type declared");
        Ok(def)
    }

    pub fn declare_host(&self, def: HostTypeDefinition) -> Result<Arc<HostTypeDefinition>> {
        let mut hosts = self.hosts.write();
        if hosts.contains_key(&def.name) {
            return Err(Error::DuplicateDeclaration(def.name));
        }
        let def = Arc::new(def);
        hosts.insert(def.name.clone(), def.clone());
        tracing::debug!(host = %def.name, composable = def.composable, "host type declared");
        Ok(def)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn view(&self, name: &str) -> Result<Arc<ViewTypeDefinition>> {
        self.views
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownViewType(name.to_string()))
    }

    pub fn host(&self, name: &str) -> Result<Arc<HostTypeDefinition>> {
        self.hosts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownHostType(name.to_string()))
    }

    pub fn has_view(&self, name: &str) -> bool {
        self.views.read().contains_key(name)
    }

    pub fn has_host(&self, name: &str) -> bool {
        self.hosts.read().contains_key(name)
    }

    pub fn code_of(&self, view: &str) -> Result<BitCode> {
        self.hierarchy.code_for(view)
    }

    // ========================================================================
    // Field masks
    // ========================================================================

    /// Hard/soft mask for a (view, host) pair, computed once and cached.
    pub fn field_mask(&self, view: &str, host: &str) -> Result<FieldMask> {
        let key = (view.to_string(), host.to_string());
        if let Some(mask) = self.masks.read().get(&key) {
            return Ok(mask.clone());
        }

        let view_def = self.view(view)?;
        let host_def = self.host(host)?;
        let mask = compute_field_mask(&view_def, &host_def);

        self.masks.write().entry(key).or_insert_with(|| mask.clone());
        Ok(mask)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure mask computation over two definitions.
pub fn compute_field_mask(view: &ViewTypeDefinition, host: &HostTypeDefinition) -> FieldMask {
    let mut mask = FieldMask::all_hard(view.fields.len());
    for (i, field) in view.fields.iter().enumerate() {
        let hard = host
            .field_by_alias(field.resolve_alias())
            .is_some_and(|host_field| is_hard_compatible(host, field, host_field));
        if !hard {
            mask.mark_soft(i);
        }
    }
    mask
}

/// The two-branch strictness rule shared by mask computation and accessor
/// binding.
pub fn is_hard_compatible(host: &HostTypeDefinition, field: &ViewField, host_field: &HostField) -> bool {
    (host.fully_composable && (!field.ty.is_primitive() || host_field.ty == field.ty))
        || host_field.ty.is_assignable_from(&field.ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldType;

    fn person() -> HostTypeDefinition {
        HostTypeDefinition::new("Person")
            .composable()
            .with_field("age", FieldType::Int)
            .with_field("name", FieldType::String)
    }

    #[test]
    fn test_hard_and_soft_classification() {
        let reg = TypeRegistry::new();
        reg.declare_host(person()).unwrap();
        reg.declare_view(
            ViewTypeDefinition::new("Nicknamed")
                .with_field("age", FieldType::Int)
                .with_field("nickname", FieldType::String),
        )
        .unwrap();

        let mask = reg.field_mask("Nicknamed", "Person").unwrap();
        assert_eq!(mask.len(), 2);
        assert!(mask.is_hard(0));
        assert!(mask.is_soft(1));
        assert_eq!(mask.to_string(), "01");
    }

    #[test]
    fn test_alias_binds_to_host_field() {
        let reg = TypeRegistry::new();
        reg.declare_host(person()).unwrap();
        reg.declare_view(
            ViewTypeDefinition::new("Named").with_aliased_field("label", FieldType::String, "name"),
        )
        .unwrap();
        assert!(reg.field_mask("Named", "Person").unwrap().is_hard(0));
    }

    #[test]
    fn test_type_mismatch_is_soft() {
        let reg = TypeRegistry::new();
        reg.declare_host(person()).unwrap();
        reg.declare_view(ViewTypeDefinition::new("Aged").with_field("age", FieldType::Float)).unwrap();
        assert!(reg.field_mask("Aged", "Person").unwrap().is_soft(0));
    }

    #[test]
    fn test_fully_composable_branch() {
        let host = HostTypeDefinition::new("Doc")
            .composable()
            .fully_composable()
            .with_field("body", FieldType::Bytes)
            .with_field("size", FieldType::Int);
        let view = ViewTypeDefinition::new("Text")
            .with_field("body", FieldType::String)
            .with_field("size", FieldType::Float);

        // non-primitive view field binds regardless of host type; primitives need equality
        let mask = compute_field_mask(&view, &host);
        assert!(mask.is_hard(0));
        assert!(mask.is_soft(1));

        let strict = HostTypeDefinition::new("Doc")
            .composable()
            .with_field("body", FieldType::Bytes)
            .with_field("size", FieldType::Int);
        let mask = compute_field_mask(&view, &strict);
        assert!(mask.is_soft(0));
        assert!(mask.is_soft(1));
    }

    #[test]
    fn test_any_host_field_accepts_non_primitives() {
        let host = HostTypeDefinition::new("Bag").with_field("payload", FieldType::Any);
        let view = ViewTypeDefinition::new("Carrier")
            .with_field("payload", FieldType::List);
        assert!(compute_field_mask(&view, &host).is_hard(0));

        let view = ViewTypeDefinition::new("Counter").with_field("payload", FieldType::Int);
        assert!(compute_field_mask(&view, &host).is_soft(0));
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let reg = TypeRegistry::new();
        reg.declare_host(person()).unwrap();
        assert!(matches!(reg.declare_host(person()), Err(Error::DuplicateDeclaration(_))));
        reg.declare_view(ViewTypeDefinition::new("V")).unwrap();
        assert!(matches!(
            reg.declare_view(ViewTypeDefinition::new("V")),
            Err(Error::DuplicateDeclaration(_))
        ));
        assert!(matches!(
            reg.declare_view(ViewTypeDefinition::new(ROOT_VIEW)),
            Err(Error::DuplicateDeclaration(_))
        ));
    }

    #[test]
    fn test_inherited_fields_come_first() {
        let reg = TypeRegistry::new();
        reg.declare_view(ViewTypeDefinition::new("Person").with_field("name", FieldType::String)).unwrap();
        let student = reg
            .declare_view(
                ViewTypeDefinition::new("Student")
                    .extends("Person")
                    .with_field("school", FieldType::String),
            )
            .unwrap();
        let names: Vec<&str> = student.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "school"]);
        assert!(reg.hierarchy().is_ancestor("Person", "Student").unwrap());
    }

    #[test]
    fn test_unknown_types() {
        let reg = TypeRegistry::new();
        reg.declare_host(person()).unwrap();
        assert!(matches!(reg.field_mask("Ghost", "Person"), Err(Error::UnknownViewType(_))));
        assert!(matches!(reg.field_mask(ROOT_VIEW, "Nobody"), Err(Error::UnknownHostType(_))));
        assert!(matches!(
            reg.declare_view(ViewTypeDefinition::new("Orphan").extends("Ghost")),
            Err(Error::UnknownViewType(_))
        ));
        assert!(!reg.has_view("Orphan"));
    }
}
