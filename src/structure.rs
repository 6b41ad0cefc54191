//! The structure codec: field walking between live objects and extents.
//!
//! This layer knows how to turn one class's statics or one instance's
//! fields into an extent and back, splitting primitives (encoded directly
//! into the byte stream) from references (encoded as reference slots whose
//! targets become stubs on decode). It deliberately knows nothing about
//! billing, dirty checks, or write ordering; the heap manager orchestrates
//! those around it.
//!
//! ## Discovery is a frontier, not a call stack
//!
//! Serializing an object can discover new reference targets. Those are
//! enqueued on a [`Frontier`] for the caller to drain, never recursed into,
//! so arbitrarily deep or cyclic graphs cannot overflow the stack. The
//! frontier deduplicates by object identity, which is also what terminates
//! cycles.
//!
//! ## Pluggable materialization
//!
//! Decoding a reference must construct or look up a live object for each
//! node kind. That choice is behind the [`FieldPopulator`] seam so the same
//! decode path serves "materialize concrete data" and "materialize a lazy
//! stub" alike.
//!
//! ## Failure semantics
//!
//! Class shapes were validated by the upstream pipeline before they reach
//! this engine. A field/shape mismatch mid-walk is therefore a fatal
//! [`HeapError::Internal`], never retried and never surfaced as a
//! recoverable runtime condition.

use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use tracing::trace;

use crate::error::{HeapError, Result};
use crate::extent::{Extent, ExtentDecoder, ExtentEncoder};
use crate::node::Node;
use crate::object::{
    ClassRegistry, ClassShape, ConstantRegistry, FieldKind, ObjHandle, ObjKey, Token, Value,
    obj_key,
};
use crate::store::GraphStore;

/// Constructs live objects for decoded reference slots.
///
/// The original design carried per-type setters here as well; with fields
/// expressed as [`Value`] slots, only the materialization operations vary
/// between use cases.
pub trait FieldPopulator {
    /// Look up or construct the live object for a regular node.
    fn create_regular_instance(&self, type_name: &str, node: &Rc<Node>) -> Result<ObjHandle>;
    /// Look up or construct the class object for a class node.
    fn create_class(&self, name: &str) -> Result<ObjHandle>;
    /// Look up the interned object for a constant node.
    fn create_constant(&self, id: i64) -> Result<ObjHandle>;
    /// The null reference. Almost always `None`.
    fn create_null(&self) -> Option<ObjHandle> {
        None
    }
}

/// Producer/consumer queue of reference targets discovered during
/// serialization, deduplicated by object identity.
#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<ObjHandle>,
    seen: HashSet<ObjKey>,
}

impl Frontier {
    /// Creates an empty frontier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an object unless its identity was already seen.
    pub fn enqueue(&mut self, object: &ObjHandle) {
        if self.seen.insert(obj_key(object)) {
            self.queue.push_back(object.clone());
        }
    }

    /// Removes the next object to process.
    pub fn next(&mut self) -> Option<ObjHandle> {
        self.queue.pop_front()
    }

    /// Number of distinct objects ever enqueued.
    pub fn discovered(&self) -> usize {
        self.seen.len()
    }
}

/// Stateless field walker over one store/registry/constant-table triple.
pub struct StructureCodec<'a> {
    store: &'a dyn GraphStore,
    classes: &'a ClassRegistry,
    constants: &'a ConstantRegistry,
}

impl<'a> StructureCodec<'a> {
    /// Creates a codec over the engine's collaborators.
    pub fn new(
        store: &'a dyn GraphStore,
        classes: &'a ClassRegistry,
        constants: &'a ConstantRegistry,
    ) -> Self {
        Self {
            store,
            classes,
            constants,
        }
    }

    // --- ENCODE SIDE ---

    /// Encodes one class's *direct* static fields into `enc`.
    ///
    /// Inherited statics are deliberately not walked: the superclass's own
    /// pass handles them, exactly once.
    pub fn serialize_class_statics(
        &self,
        shape: &ClassShape,
        enc: &mut ExtentEncoder,
        frontier: &mut Frontier,
    ) -> Result<()> {
        let statics = shape.statics();
        for (descriptor, value) in shape.static_fields.iter().zip(statics.iter()) {
            self.encode_value(descriptor.kind, value, enc, frontier)
                .map_err(|e| annotate(e, &shape.name, &descriptor.name))?;
        }
        Ok(())
    }

    /// Encodes one loaded instance into its own extent. Freshly discovered
    /// reference targets land on the frontier for the caller to drain.
    pub fn serialize_instance(
        &self,
        object: &ObjHandle,
        frontier: &mut Frontier,
    ) -> Result<Extent> {
        let mut enc = ExtentEncoder::new();
        let (type_name, fields) = {
            let object = object.borrow();
            if !object.is_loaded() {
                return Err(HeapError::Internal(format!(
                    "Serializing unloaded instance of {}",
                    object.type_name
                )));
            }
            (object.type_name.clone(), object.fields.clone())
        };
        let layout = self.classes.instance_layout(&type_name)?;
        if layout.len() != fields.len() {
            return Err(HeapError::Internal(format!(
                "Instance of {type_name} has {} fields, layout expects {}",
                fields.len(),
                layout.len()
            )));
        }
        for (descriptor, value) in layout.iter().zip(fields.iter()) {
            self.encode_value(descriptor.kind, value, &mut enc, frontier)
                .map_err(|e| annotate(e, &type_name, &descriptor.name))?;
        }
        trace!(%type_name, refs = enc.reference_len(), "serialized instance");
        Ok(enc.to_extent())
    }

    fn encode_value(
        &self,
        kind: FieldKind,
        value: &Value,
        enc: &mut ExtentEncoder,
        frontier: &mut Frontier,
    ) -> Result<()> {
        if value.kind() != kind {
            return Err(HeapError::Internal(format!(
                "Field value {:?} does not match declared kind {kind:?}",
                value.kind()
            )));
        }
        match value {
            Value::Byte(v) => enc.encode_byte(*v),
            Value::Short(v) => enc.encode_short(*v),
            Value::Char(v) => enc.encode_char(*v),
            Value::Int(v) => enc.encode_int(*v),
            Value::Long(v) => enc.encode_long(*v),
            Value::Ref(reference) => {
                let node = self.node_for(reference, frontier)?;
                enc.encode_reference(node);
            }
        }
        Ok(())
    }

    /// Resolves a live reference to its storage node, assigning a fresh
    /// node (the `New -> Existing` token transition) on first encounter and
    /// feeding the frontier with every regular target.
    fn node_for(
        &self,
        reference: &Option<ObjHandle>,
        frontier: &mut Frontier,
    ) -> Result<Option<Rc<Node>>> {
        let Some(handle) = reference else {
            return Ok(None);
        };
        let token = handle.borrow().token.clone();
        match token {
            Token::Constant(id) => Ok(Some(self.store.constant_node(id))),
            Token::Class(name) => Ok(Some(self.store.class_node(&name))),
            Token::Existing { node, .. } => {
                frontier.enqueue(handle);
                Ok(Some(node))
            }
            Token::New => {
                let type_name = handle.borrow().type_name.clone();
                let node = self.store.build_new_regular_node(&type_name);
                handle.borrow_mut().bind_node(node.clone())?;
                frontier.enqueue(handle);
                trace!(%node, "assigned node to new instance");
                Ok(Some(node))
            }
            Token::CallerCopy(_) => Err(HeapError::Internal(
                "Caller-copy token reached the storage serializer".into(),
            )),
        }
    }

    // --- DECODE SIDE ---

    /// Decodes one class's direct statics from `dec`, materializing
    /// references through `populator`.
    pub fn deserialize_class_statics(
        &self,
        shape: &ClassShape,
        dec: &mut ExtentDecoder<'_>,
        populator: &dyn FieldPopulator,
    ) -> Result<()> {
        let mut incoming = Vec::with_capacity(shape.static_fields.len());
        for descriptor in &shape.static_fields {
            let value = self
                .decode_value(descriptor.kind, dec, populator)
                .map_err(|e| annotate(e, &shape.name, &descriptor.name))?;
            incoming.push(value);
        }
        let mut statics = shape.statics_mut();
        for (slot, value) in statics.iter_mut().zip(incoming) {
            *slot = value;
        }
        Ok(())
    }

    /// Populates a stub's fields from its extent and marks it loaded.
    pub fn deserialize_instance(
        &self,
        target: &ObjHandle,
        extent: &Extent,
        populator: &dyn FieldPopulator,
    ) -> Result<()> {
        let type_name = target.borrow().type_name.clone();
        let layout = self.classes.instance_layout(&type_name)?;
        let mut dec = ExtentDecoder::new(extent);
        let mut incoming = Vec::with_capacity(layout.len());
        for descriptor in layout.iter() {
            let value = self
                .decode_value(descriptor.kind, &mut dec, populator)
                .map_err(|e| annotate(e, &type_name, &descriptor.name))?;
            incoming.push(value);
        }
        let mut target = target.borrow_mut();
        target.fields = incoming;
        target.state = crate::object::LoadState::Loaded;
        Ok(())
    }

    fn decode_value(
        &self,
        kind: FieldKind,
        dec: &mut ExtentDecoder<'_>,
        populator: &dyn FieldPopulator,
    ) -> Result<Value> {
        Ok(match kind {
            FieldKind::Byte => Value::Byte(dec.decode_byte()?),
            FieldKind::Short => Value::Short(dec.decode_short()?),
            FieldKind::Char => Value::Char(dec.decode_char()?),
            FieldKind::Int => Value::Int(dec.decode_int()?),
            FieldKind::Long => Value::Long(dec.decode_long()?),
            FieldKind::Ref => {
                let reference = match dec.decode_reference()? {
                    None => populator.create_null(),
                    Some(node) => Some(self.materialize(&node, populator)?),
                };
                Value::Ref(reference)
            }
        })
    }

    fn materialize(&self, node: &Rc<Node>, populator: &dyn FieldPopulator) -> Result<ObjHandle> {
        match node.as_ref() {
            Node::Regular { type_name, .. } => populator.create_regular_instance(type_name, node),
            Node::Class { name } => populator.create_class(name),
            Node::Constant { id } => populator.create_constant(*id),
        }
    }

    // --- BOUNDARY DISCOVERY ---

    /// Walks one instance's encoded footprint without materializing
    /// anything, advancing both cursors by exactly the widths the class
    /// shape dictates. The discovery pass uses this to locate instance
    /// boundaries inside a graph image.
    pub fn skip_instance(&self, type_name: &str, dec: &mut ExtentDecoder<'_>) -> Result<()> {
        let layout = self.classes.instance_layout(type_name)?;
        for descriptor in layout.iter() {
            match descriptor.kind {
                FieldKind::Ref => {
                    dec.decode_reference()?;
                }
                primitive => dec.skip_data(primitive.data_width())?,
            }
        }
        Ok(())
    }

    /// The constant registry this codec resolves against.
    pub fn constants(&self) -> &ConstantRegistry {
        self.constants
    }
}

fn annotate(error: HeapError, class: &str, field: &str) -> HeapError {
    match error {
        // Underflow keeps its sentinel meaning; everything else gains
        // the class/field context a shape bug needs.
        HeapError::Underflow => HeapError::Corrupt(format!(
            "Stream ended inside {class}.{field}"
        )),
        HeapError::Internal(msg) => HeapError::Internal(format!("{class}.{field}: {msg}")),
        HeapError::Corrupt(msg) => HeapError::Corrupt(format!("{class}.{field}: {msg}")),
        other => other,
    }
}
