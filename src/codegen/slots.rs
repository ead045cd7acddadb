//! In-process code generation: slot tables instead of emitted bytecode.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::registry::{FieldMask, HostTypeDefinition, ViewTypeDefinition};
use crate::storage::StorageMode;
use crate::{Error, Result};
use super::{
    CodeGenerator, ExecutableTypeSpec, LoadedClass, LoadedType, SlotSpec, TypeLoader, TypeSpecKind,
};

/// Suffix of synthesized core wrapper types.
pub const WRAPPER_SUFFIX: &str = "Wrapper";

/// Deterministic name of the view type generated for (view, host).
pub fn proxy_name(view: &str, host: &str) -> String {
    format!("{view}.{host}_Proxy")
}

pub fn wrapper_name(core: &str) -> String {
    format!("{core}{WRAPPER_SUFFIX}")
}

/// Storage key of a soft field.
pub fn soft_field_key(field: &str) -> String {
    field.to_string()
}

// ============================================================================
// SlotTableGenerator
// ============================================================================

/// Generates one slot per view field, stamped with the storage mode the
/// soft slots read from.
#[derive(Debug, Clone, Copy)]
pub struct SlotTableGenerator {
    mode: StorageMode,
}

impl SlotTableGenerator {
    pub fn new(mode: StorageMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }
}

impl CodeGenerator for SlotTableGenerator {
    fn synthesize(
        &self,
        view: &ViewTypeDefinition,
        host: &HostTypeDefinition,
        mask: &FieldMask,
    ) -> Result<ExecutableTypeSpec> {
        if mask.len() != view.fields.len() {
            return Err(Error::CodeGen(format!(
                "mask of {} bits for view {} with {} fields",
                mask.len(),
                view.name,
                view.fields.len()
            )));
        }

        let slots = view
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let soft = mask.is_soft(i);
                SlotSpec {
                    field: field.name.clone(),
                    ty: field.ty.clone(),
                    soft,
                    hook: if soft {
                        soft_field_key(&field.name)
                    } else {
                        field.resolve_alias().to_string()
                    },
                }
            })
            .collect();

        Ok(ExecutableTypeSpec {
            name: proxy_name(&view.name, &host.name),
            kind: TypeSpecKind::Proxy {
                view: view.name.clone(),
                host: host.name.clone(),
                mode: self.mode,
            },
            slots,
        })
    }

    fn synthesize_wrapper(&self, core: &HostTypeDefinition) -> Result<ExecutableTypeSpec> {
        let slots = core
            .fields
            .iter()
            .map(|field| SlotSpec {
                field: field.name.clone(),
                ty: field.ty.clone(),
                soft: false,
                hook: field.name.clone(),
            })
            .collect();

        Ok(ExecutableTypeSpec {
            name: wrapper_name(&core.name),
            kind: TypeSpecKind::Wrapper { core: core.name.clone() },
            slots,
        })
    }
}

// ============================================================================
// InProcessLoader
// ============================================================================

/// Keeps loaded types by name for the life of the loader.
#[derive(Default)]
pub struct InProcessLoader {
    loaded: RwLock<HashMap<String, LoadedType>>,
}

impl InProcessLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<LoadedType> {
        self.loaded.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.loaded.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.read().is_empty()
    }
}

impl TypeLoader for InProcessLoader {
    fn load(&self, spec: ExecutableTypeSpec) -> Result<LoadedType> {
        let mut seen = HashSet::new();
        if let Some(dup) = spec.slots.iter().find(|s| !seen.insert(s.field.as_str())) {
            return Err(Error::Loader(format!("{} declares slot {} twice", spec.name, dup.field)));
        }

        let mut loaded = self.loaded.write();
        if let Some(existing) = loaded.get(&spec.name) {
            if existing.spec() == &spec {
                return Ok(existing.clone());
            }
            tracing::debug!(name = %spec.name, "reloading type with a different slot table");
        }

        let class = Arc::new(LoadedClass::new(spec));
        loaded.insert(class.name().to_string(), class.clone());
        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldType;
    use crate::registry::compute_field_mask;

    fn pair() -> (ViewTypeDefinition, HostTypeDefinition) {
        let view = ViewTypeDefinition::new("Nicknamed")
            .with_field("age", FieldType::Int)
            .with_field("nickname", FieldType::String);
        let host = HostTypeDefinition::new("Person")
            .composable()
            .with_field("age", FieldType::Int);
        (view, host)
    }

    #[test]
    fn test_synthesize_is_deterministic() {
        let (view, host) = pair();
        let mask = compute_field_mask(&view, &host);
        let generator = SlotTableGenerator::new(StorageMode::Map);

        let a = generator.synthesize(&view, &host, &mask).unwrap();
        let b = generator.synthesize(&view, &host, &mask).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name, "Nicknamed.Person_Proxy");
        assert!(!a.slots[0].soft);
        assert!(a.slots[1].soft);
    }

    #[test]
    fn test_mask_length_checked() {
        let (view, host) = pair();
        let generator = SlotTableGenerator::new(StorageMode::Eav);
        let err = generator.synthesize(&view, &host, &FieldMask::all_hard(1)).unwrap_err();
        assert!(matches!(err, Error::CodeGen(_)));
    }

    #[test]
    fn test_loader_reuses_identical_spec() {
        let (view, host) = pair();
        let mask = compute_field_mask(&view, &host);
        let spec = SlotTableGenerator::new(StorageMode::Map).synthesize(&view, &host, &mask).unwrap();

        let loader = InProcessLoader::new();
        let first = loader.load(spec.clone()).unwrap();
        let second = loader.load(spec).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.len(), 1);
    }

    #[test]
    fn test_loader_rejects_duplicate_slots() {
        let (_, host) = pair();
        let mut spec = SlotTableGenerator::new(StorageMode::Map).synthesize_wrapper(&host).unwrap();
        spec.slots.push(spec.slots[0].clone());
        assert!(matches!(InProcessLoader::new().load(spec), Err(Error::Loader(_))));
    }
}
