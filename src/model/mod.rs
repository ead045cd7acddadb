//! # Field Model
//!
//! Plain data shared by every component: field values, declared field
//! types and field declarations.
//!
//! Design rule: no locks, no registry lookups, no collaborators here.
//! This module is pure data.

pub mod value;
pub mod field;

pub use value::{Value, PropertyMap};
pub use field::{FieldType, ViewField, HostField, AccessorRef};
