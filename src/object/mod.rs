//! The live object model of the shadow heap.
//!
//! This module defines what user code actually touches at runtime:
//! [`ShadowObject`]s holding [`Value`]s, laid out by per-class
//! field-descriptor tables ([`ClassShape`], [`ClassRegistry`]), tagged with a
//! persistence [`Token`] and an explicit [`LoadState`] lifecycle, plus the
//! injected [`ConstantRegistry`] for process-interned values.

/// Interned-constant table.
pub mod constants;
/// Shadow object instances, tokens, and load states.
pub mod instance;
/// Field descriptor tables and class registry.
pub mod shape;
/// Runtime field values.
pub mod value;

pub use constants::ConstantRegistry;
pub use instance::{LoadState, Loader, ObjHandle, ObjKey, ShadowObject, Token, obj_key};
pub use shape::{ClassRegistry, ClassShape, FieldDescriptor, FieldKind};
pub use value::Value;
