//! Views: live trait instances over a host.
//!
//! A view reads and writes its hard fields straight through the host's
//! accessors and its soft fields through the virtual property store it was
//! instantiated with.
//!
//! A hard slot whose accessor could not be bound is *stuck*: reads return
//! `Value::Null`, writes are dropped. Only that slot is affected, and the
//! failure is listed by [`View::unbound_fields`].

use std::fmt;
use std::sync::{Arc, Weak};

use crate::codegen::{LoadedType, SlotSpec, TypeSpecKind};
use crate::hierarchy::{BitCode, HierarchyEncoder};
use crate::host::{HostInstance, HostRef, InstanceId};
use crate::model::{PropertyMap, Value};
use crate::storage::{SoftStorage, StorageMode, VirtualPropertyStore};
use crate::{BindingFailure, Error, Result};

pub type ViewHandle = Arc<View>;

/// Everything a view type is instantiated with.
#[derive(Debug, Clone)]
pub struct ViewArgs {
    pub host: HostRef,
    pub storage: SoftStorage,
    pub type_code: BitCode,
    pub bottom: BitCode,
    /// Skip physical exclusivity checks against other attached views.
    pub logical: bool,
}

pub struct View {
    class: LoadedType,
    view_type: String,
    host_type: String,
    mode: StorageMode,
    host: Weak<HostInstance>,
    instance: InstanceId,
    storage: SoftStorage,
    type_code: BitCode,
    bottom: BitCode,
    logical: bool,
}

impl View {
    /// Build a view over `args.host` and synchronise its fields with the
    /// soft storage.
    pub fn instantiate(class: LoadedType, args: ViewArgs) -> Result<ViewHandle> {
        let (view_type, host_type, mode) = match &class.spec().kind {
            TypeSpecKind::Proxy { view, host, mode } => (view.clone(), host.clone(), *mode),
            TypeSpecKind::Wrapper { core } => {
                return Err(Error::Loader(format!("{} is a wrapper for {core}, not a view", class.name())));
            }
        };
        if args.storage.mode() != mode {
            return Err(Error::StorageModeMismatch {
                key: class.name().to_string(),
                expected: mode,
                found: args.storage.mode(),
            });
        }

        let view = View {
            view_type,
            host_type,
            mode,
            host: Arc::downgrade(&args.host),
            instance: args.host.id(),
            storage: args.storage,
            type_code: args.type_code,
            bottom: args.bottom,
            logical: args.logical,
            class,
        };
        if let SoftStorage::Eav(store) = &view.storage {
            args.host.track_store(store);
        }
        view.sync_fields(&args.host)?;
        Ok(Arc::new(view))
    }

    /// Soft slots missing from storage start at their type's default; values
    /// stored under a hard slot's name (left by an earlier view) move into
    /// the host. Nothing is written until every soft slot has passed the
    /// exclusivity check.
    fn sync_fields(&self, host: &HostInstance) -> Result<()> {
        let slots = self.class.slots();
        if !self.logical {
            for slot in slots.iter().filter(|s| s.soft) {
                match self.storage.get(self.instance, &slot.hook) {
                    Some(existing) if !slot.ty.accepts(&existing) => {
                        return Err(Error::LogicalTypeInconsistency {
                            view: self.view_type.clone(),
                            field: slot.field.clone(),
                            expected: slot.ty.to_string(),
                            found: existing.type_name(),
                        });
                    }
                    _ => {}
                }
            }
        }

        for (i, slot) in slots.iter().enumerate() {
            if slot.soft {
                if self.storage.get(self.instance, &slot.hook).is_none() {
                    self.storage.set(self.instance, &slot.hook, slot.ty.default_value());
                }
            } else if let Some(accessor) = self.class.accessor(i) {
                let Some(pending) = self.storage.get(self.instance, &slot.field) else {
                    continue;
                };
                if !slot.ty.accepts(&pending) {
                    continue;
                }
                accessor.write(&mut **host.object().write(), pending)?;
                self.storage.remove(self.instance, &slot.field);
                tracing::trace!(view = %self.view_type, field = %slot.field, "soft value migrated into host");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Identity
    // ========================================================================

    pub fn view_type(&self) -> &str {
        &self.view_type
    }

    pub fn host_type(&self) -> &str {
        &self.host_type
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    /// The host this view is attached to, while it is alive.
    pub fn core(&self) -> Option<HostRef> {
        self.host.upgrade()
    }

    pub fn type_code(&self) -> &BitCode {
        &self.type_code
    }

    pub fn bottom_code(&self) -> &BitCode {
        &self.bottom
    }

    pub fn is_logical(&self) -> bool {
        self.logical
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.mode
    }

    pub fn loaded_type(&self) -> &LoadedType {
        &self.class
    }

    /// True if this view's type is `code` or a descendant of it.
    pub fn is_a(&self, code: &BitCode) -> bool {
        HierarchyEncoder::subsumes(code, &self.type_code)
    }

    // ========================================================================
    // Field access
    // ========================================================================

    fn slot(&self, field: &str) -> Result<(usize, &SlotSpec)> {
        self.class.slot(field).ok_or_else(|| Error::UnknownField {
            owner: self.view_type.clone(),
            field: field.to_string(),
        })
    }

    fn host(&self) -> Result<HostRef> {
        self.host.upgrade().ok_or(Error::Detached(self.instance))
    }

    pub fn get(&self, field: &str) -> Result<Value> {
        let (i, slot) = self.slot(field)?;
        if slot.soft {
            return Ok(self.storage.get(self.instance, &slot.hook).unwrap_or(Value::Null));
        }

        let host = self.host()?;
        let Some(accessor) = self.class.accessor(i) else {
            tracing::warn!(view = %self.view_type, field, "read through unbound slot");
            return Ok(Value::Null);
        };
        let object = host.object().read();
        Ok(accessor.read(&**object).unwrap_or_else(|| {
            tracing::warn!(view = %self.view_type, field, "host value is not of the bound type");
            Value::Null
        }))
    }

    pub fn set(&self, field: &str, value: Value) -> Result<()> {
        let (i, slot) = self.slot(field)?;
        if !slot.ty.accepts(&value) {
            return Err(Error::TypeError {
                expected: slot.ty.to_string(),
                got: value.type_name(),
            });
        }
        if slot.soft {
            self.storage.set(self.instance, &slot.hook, value);
            return Ok(());
        }

        let host = self.host()?;
        let Some(accessor) = self.class.accessor(i) else {
            tracing::warn!(view = %self.view_type, field, "write through unbound slot dropped");
            return Ok(());
        };
        let mut object = host.object().write();
        accessor.write(&mut **object, value)
    }

    pub fn is_soft(&self, field: &str) -> Result<bool> {
        Ok(self.slot(field)?.1.soft)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.class.slots().iter().map(|s| s.field.as_str()).collect()
    }

    pub fn hard_fields(&self) -> Vec<&str> {
        self.class.slots().iter().filter(|s| !s.soft).map(|s| s.field.as_str()).collect()
    }

    pub fn soft_fields(&self) -> Vec<&str> {
        self.class.slots().iter().filter(|s| s.soft).map(|s| s.field.as_str()).collect()
    }

    /// Snapshot of every field value seen through this view.
    pub fn fields(&self) -> Result<PropertyMap> {
        self.class
            .slots()
            .iter()
            .map(|s| Ok((s.field.clone(), self.get(&s.field)?)))
            .collect()
    }

    /// Hard fields left unbound when the view type was built.
    pub fn unbound_fields(&self) -> Vec<BindingFailure> {
        self.class.failures()
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("view_type", &self.view_type)
            .field("host_type", &self.host_type)
            .field("instance", &self.instance)
            .field("mode", &self.mode)
            .field("logical", &self.logical)
            .finish_non_exhaustive()
    }
}
