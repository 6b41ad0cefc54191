//! The object graph store seam and an in-memory backend.
//!
//! The engine's storage boundary is the [`GraphStore`] trait: node
//! construction, per-instance extent read/write, and the root (statics)
//! extent. Everything below it — key-value layout, durability, caching — is
//! an external concern.
//!
//! [`MemoryGraphStore`] is a complete in-process backend used by tooling and
//! tests. It flattens extents to bytes through the bit-exact node codec, so
//! a round trip through it exercises exactly the layout a durable backend
//! would persist, and it interns every node it hands out so that pointer
//! identity is canonical per storage identity.
//!
//! Writes are staged and become visible to subsequent reads only after
//! [`GraphStore::flush_writes`], mirroring the single commit point of a
//! transactional KV backend.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::rc::Rc;

use twox_hash::XxHash64;

use crate::codec::{PrimitiveDecoder, PrimitiveEncoder};
use crate::error::{HeapError, Result};
use crate::extent::Extent;
use crate::node::{Node, NodeFactory};

type XxMap<K, V> = HashMap<K, V, BuildHasherDefault<XxHash64>>;

/// Pluggable backend for durable object-graph storage.
///
/// Node lookups must be canonical (see [`NodeFactory`]); extent operations
/// address instances by their regular node.
pub trait GraphStore: NodeFactory {
    /// Allocates a fresh, never-used instance id and returns its canonical
    /// regular node. Called exactly once per object, on first serialization.
    fn build_new_regular_node(&self, type_name: &str) -> Rc<Node>;

    /// Reads the root (graph image) extent, if one was ever committed.
    fn root(&self) -> Result<Option<Extent>>;

    /// Stages a new root extent.
    fn set_root(&self, extent: &Extent) -> Result<()>;

    /// Reads the original persisted extent of one instance. "Original"
    /// means the state as of the last flush; staged writes are not visible.
    fn load_original_data(&self, node: &Rc<Node>) -> Result<Option<Extent>>;

    /// Stages one instance's extent.
    fn save_regular_data(&self, node: &Rc<Node>, extent: &Extent) -> Result<()>;

    /// Makes all staged writes visible as the new original state.
    fn flush_writes(&self) -> Result<()>;
}

/// In-memory [`GraphStore`] with canonical node interning and staged writes.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    regular: RefCell<XxMap<(String, i64), Rc<Node>>>,
    constants: RefCell<XxMap<i64, Rc<Node>>>,
    classes: RefCell<XxMap<String, Rc<Node>>>,
    next_instance_id: Cell<i64>,
    committed: RefCell<XxMap<i64, Vec<u8>>>,
    staged: RefCell<XxMap<i64, Vec<u8>>>,
    committed_root: RefCell<Option<Vec<u8>>>,
    staged_root: RefCell<Option<Vec<u8>>>,
}

impl MemoryGraphStore {
    /// Creates an empty store. Instance ids are assigned from 1.
    pub fn new() -> Self {
        let store = Self::default();
        store.next_instance_id.set(1);
        store
    }

    /// Number of committed instance extents. Exposed for inspection.
    pub fn committed_instance_count(&self) -> usize {
        self.committed.borrow().len()
    }

    /// Flattens an extent into the durable byte layout:
    /// `[i32 data len][data][i32 ref count][encoded node]*`.
    fn flatten(extent: &Extent) -> Result<Vec<u8>> {
        let mut enc = PrimitiveEncoder::new();
        enc.encode_int(
            i32::try_from(extent.data.len())
                .map_err(|_| HeapError::Internal("Extent data exceeds encodable length".into()))?,
        );
        enc.encode_bytes(&extent.data);
        enc.encode_int(i32::try_from(extent.references.len()).map_err(|_| {
            HeapError::Internal("Extent reference list exceeds encodable length".into())
        })?);
        for reference in &extent.references {
            Node::encode(reference.as_ref(), &mut enc)?;
        }
        Ok(enc.into_bytes())
    }

    /// Reconstitutes a flattened extent, re-interning every node so that
    /// reloaded references are pointer-identical to live lookups.
    fn reconstitute(&self, bytes: &[u8]) -> Result<Extent> {
        let mut dec = PrimitiveDecoder::new(bytes);
        let data_len = dec.decode_int()?;
        if data_len < 0 {
            return Err(HeapError::Corrupt(format!(
                "Negative extent data length {data_len}"
            )));
        }
        let data = dec.decode_bytes(data_len as usize)?.to_vec();
        let ref_count = dec.decode_int()?;
        if ref_count < 0 {
            return Err(HeapError::Corrupt(format!(
                "Negative extent reference count {ref_count}"
            )));
        }
        let mut references = Vec::with_capacity(ref_count as usize);
        for _ in 0..ref_count {
            references.push(Node::decode(&mut dec, self)?);
        }
        if !dec.is_exhausted() {
            return Err(HeapError::Corrupt(
                "Trailing bytes after flattened extent".into(),
            ));
        }
        Ok(Extent { data, references })
    }

    fn instance_key(node: &Rc<Node>) -> Result<i64> {
        node.instance_id().ok_or_else(|| {
            HeapError::Internal(format!("Extent operation on non-regular node {node}"))
        })
    }
}

impl NodeFactory for MemoryGraphStore {
    fn regular_node(&self, type_name: &str, instance_id: i64) -> Rc<Node> {
        self.regular
            .borrow_mut()
            .entry((type_name.to_string(), instance_id))
            .or_insert_with(|| {
                Rc::new(Node::Regular {
                    type_name: type_name.to_string(),
                    instance_id,
                })
            })
            .clone()
    }

    fn constant_node(&self, id: i64) -> Rc<Node> {
        self.constants
            .borrow_mut()
            .entry(id)
            .or_insert_with(|| Rc::new(Node::Constant { id }))
            .clone()
    }

    fn class_node(&self, name: &str) -> Rc<Node> {
        self.classes
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| {
                Rc::new(Node::Class {
                    name: name.to_string(),
                })
            })
            .clone()
    }
}

impl GraphStore for MemoryGraphStore {
    fn build_new_regular_node(&self, type_name: &str) -> Rc<Node> {
        let id = self.next_instance_id.get();
        self.next_instance_id.set(id + 1);
        self.regular_node(type_name, id)
    }

    fn root(&self) -> Result<Option<Extent>> {
        match self.committed_root.borrow().as_deref() {
            Some(bytes) => Ok(Some(self.reconstitute(bytes)?)),
            None => Ok(None),
        }
    }

    fn set_root(&self, extent: &Extent) -> Result<()> {
        *self.staged_root.borrow_mut() = Some(Self::flatten(extent)?);
        Ok(())
    }

    fn load_original_data(&self, node: &Rc<Node>) -> Result<Option<Extent>> {
        let key = Self::instance_key(node)?;
        match self.committed.borrow().get(&key) {
            Some(bytes) => Ok(Some(self.reconstitute(bytes)?)),
            None => Ok(None),
        }
    }

    fn save_regular_data(&self, node: &Rc<Node>, extent: &Extent) -> Result<()> {
        let key = Self::instance_key(node)?;
        self.staged.borrow_mut().insert(key, Self::flatten(extent)?);
        Ok(())
    }

    fn flush_writes(&self) -> Result<()> {
        let staged: Vec<(i64, Vec<u8>)> = self.staged.borrow_mut().drain().collect();
        let mut committed = self.committed.borrow_mut();
        for (key, bytes) in staged {
            committed.insert(key, bytes);
        }
        drop(committed);
        if let Some(root) = self.staged_root.borrow_mut().take() {
            *self.committed_root.borrow_mut() = Some(root);
        }
        Ok(())
    }
}
