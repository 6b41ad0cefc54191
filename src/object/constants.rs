//! The interned-constant table.
//!
//! Canonical singleton values (boxed primitive canons, empty-collection
//! canons, and similar) are identified by negative, process-stable ids. The
//! registry is explicitly owned and injected into the engine at
//! construction, with its lifecycle tied to the enclosing VM instance; it is
//! deliberately not a process-wide static singleton.
//!
//! Constants share identity across reentrant frame boundaries: they are
//! never copied into callee space.

use std::collections::HashMap;

use crate::error::{HeapError, Result};

use super::instance::{ObjHandle, ObjKey, ShadowObject, Token, obj_key};
use super::value::Value;

/// Bidirectional table of interned constants.
#[derive(Debug, Default)]
pub struct ConstantRegistry {
    by_id: HashMap<i64, ObjHandle>,
    id_by_key: HashMap<ObjKey, i64>,
}

impl ConstantRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a constant object under a negative id.
    ///
    /// The object is created loaded, tagged `Token::Constant(id)`. Ids must
    /// be negative and unique; violations are configuration errors.
    pub fn register(
        &mut self,
        id: i64,
        type_name: impl Into<String>,
        fields: Vec<Value>,
    ) -> Result<ObjHandle> {
        if id >= 0 {
            return Err(HeapError::Internal(format!(
                "Constant id must be negative, got {id}"
            )));
        }
        if self.by_id.contains_key(&id) {
            return Err(HeapError::Internal(format!(
                "Constant id {id} registered twice"
            )));
        }
        let handle = ShadowObject::new_tagged(type_name, fields, Token::Constant(id));
        self.id_by_key.insert(obj_key(&handle), id);
        self.by_id.insert(id, handle.clone());
        Ok(handle)
    }

    /// Canonical object for a constant id. A miss means the stream refers
    /// to a constant this VM instance never interned: fatal.
    pub fn lookup(&self, id: i64) -> Result<ObjHandle> {
        self.by_id.get(&id).cloned().ok_or_else(|| {
            HeapError::Internal(format!("Constant {id} is not present in the registry"))
        })
    }

    /// Reverse lookup by object identity.
    pub fn id_of(&self, handle: &ObjHandle) -> Option<i64> {
        self.id_by_key.get(&obj_key(handle)).copied()
    }

    /// Number of interned constants.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when no constants are interned.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
