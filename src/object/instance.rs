//! Shadow objects: the heap cells user code actually mutates.
//!
//! Every sandboxed heap object is a [`ShadowObject`] behind an
//! `Rc<RefCell<..>>` handle. Identity (for the reentrant caller/callee maps
//! and visited sets) is pointer identity of the cell, exposed as [`ObjKey`].
//!
//! Two orthogonal tags ride on each object:
//!
//! - the persistence [`Token`]: how this object is identified in storage
//!   terms. Set at most once, except for the `New -> Existing` transition on
//!   first serialization.
//! - the [`LoadState`]: the explicit lazy-load lifecycle
//!   (`Unloaded -> Loading -> Loaded`), with `DiscoveryVisited` as a
//!   transient traversal marker that must never survive a commit walk. This
//!   replaces the original design's overloaded deserializer field with a
//!   tagged state.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{HeapError, Result};
use crate::extent::Extent;
use crate::node::Node;

use super::value::Value;

/// Shared, mutable handle to a shadow object.
pub type ObjHandle = Rc<RefCell<ShadowObject>>;

/// Pointer-identity key for identity maps and visited sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjKey(*const RefCell<ShadowObject>);

/// Identity key of a handle.
pub fn obj_key(handle: &ObjHandle) -> ObjKey {
    ObjKey(Rc::as_ptr(handle))
}

/// Storage-identity story of one shadow object.
#[derive(Debug, Clone)]
pub enum Token {
    /// Created by user code; no storage node assigned yet.
    New,
    /// Bound to a regular storage node.
    Existing {
        /// Canonical regular node.
        node: Rc<Node>,
        /// True until the first physical write of this object completes.
        /// Drives "first write" versus "update write" billing.
        newly_written: bool,
    },
    /// An interned constant; shared, never copied across frame boundaries.
    Constant(i64),
    /// A class object; shared, never copied across frame boundaries.
    Class(String),
    /// Callee-space copy of a caller object. Valid only inside a reentrant
    /// frame; must never reach the storage serializer.
    CallerCopy(ObjHandle),
}

/// How an unloaded stub obtains its field data on first access.
#[derive(Debug, Clone)]
pub enum Loader {
    /// Read the object's persisted extent through the graph store.
    FromStorage,
    /// Populate from an extent already sliced out of the graph image.
    FromExtent(Extent),
    /// Copy the caller-space object across the reentrant frame boundary.
    FromCaller(ObjHandle),
}

/// Explicit lazy-load lifecycle.
#[derive(Debug, Clone)]
pub enum LoadState {
    /// Fields are populated; no loader attached.
    Loaded,
    /// Stub: token assigned, fields defaulted, loader pending.
    Unloaded(Loader),
    /// Loader currently running. Re-entering a load here is a fatal error.
    Loading,
    /// Transient commit-discovery marker. Attempting a real load through it
    /// is a fatal error; it is restored before discovery completes.
    DiscoveryVisited,
}

/// One sandboxed heap object.
#[derive(Debug)]
pub struct ShadowObject {
    /// Shape name; indexes the class registry's flattened layout.
    pub type_name: String,
    /// Field slots in flattened hierarchy order.
    pub fields: Vec<Value>,
    /// Persistence token.
    pub token: Token,
    /// Lazy-load lifecycle.
    pub state: LoadState,
}

impl ShadowObject {
    /// A fully-loaded object created by user code (no storage identity yet).
    pub fn new_local(type_name: impl Into<String>, fields: Vec<Value>) -> ObjHandle {
        Rc::new(RefCell::new(Self {
            type_name: type_name.into(),
            fields,
            token: Token::New,
            state: LoadState::Loaded,
        }))
    }

    /// An unpopulated stub with an assigned token and pending loader.
    pub fn new_stub(
        type_name: impl Into<String>,
        fields: Vec<Value>,
        token: Token,
        loader: Loader,
    ) -> ObjHandle {
        Rc::new(RefCell::new(Self {
            type_name: type_name.into(),
            fields,
            token,
            state: LoadState::Unloaded(loader),
        }))
    }

    /// A loaded object with a fixed token (constants, class objects).
    pub fn new_tagged(type_name: impl Into<String>, fields: Vec<Value>, token: Token) -> ObjHandle {
        Rc::new(RefCell::new(Self {
            type_name: type_name.into(),
            fields,
            token,
            state: LoadState::Loaded,
        }))
    }

    /// Binds a `New` object to its freshly-built regular node. The only
    /// legal token transition after construction.
    pub fn bind_node(&mut self, node: Rc<Node>) -> Result<()> {
        match self.token {
            Token::New => {
                self.token = Token::Existing {
                    node,
                    newly_written: true,
                };
                Ok(())
            }
            _ => Err(HeapError::Internal(format!(
                "Persistence token of {} set twice",
                self.type_name
            ))),
        }
    }

    /// The storage node, if this object has one.
    pub fn node(&self) -> Option<Rc<Node>> {
        match &self.token {
            Token::Existing { node, .. } => Some(node.clone()),
            _ => None,
        }
    }

    /// True once fields are populated.
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, LoadState::Loaded)
    }
}
