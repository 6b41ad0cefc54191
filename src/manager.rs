//! The shadow heap manager: graph load/save orchestration and the
//! lazy-load state machine.
//!
//! [`ShadowHeap`] owns the engine's collaborators (store, fee processor,
//! class and constant registries) plus the cross-cutting session state: the
//! interning table of live instances, the loaded-roots set, and the
//! active-loader handshake used by reentrant frames.
//!
//! ## Graph image
//!
//! The durable root extent is a *graph image*: every class's direct statics
//! in registry order, then every discovered instance in discovery order,
//! each as a regular-node header followed by its field payload. There is no
//! instance-count prefix; decode and encode share one walk order, so
//! positional parity locates every boundary and the reference cursor's
//! underflow is the end-of-instances sentinel.
//!
//! Loading is two passes. Pass one walks the stream purely to discover
//! instance boundaries, interning an unpopulated stub per header before any
//! objects are wired together. Pass two re-walks the same bytes to populate
//! statics and wire their references against the stable instance list from
//! pass one. Instance payloads stay attached to their stubs as sliced
//! extents; population is deferred to first touch. Cycles cost nothing
//! special: stubs exist before any field is wired, and the frontier
//! deduplicates by identity on the way out.
//!
//! ## Lazy loading
//!
//! `Unloaded -> Loading -> Loaded`, driven by [`ShadowHeap::on_first_field_access`],
//! the single entry point the instrumentation layer calls before any field
//! access. The real load runs exactly once; a loaded object is recorded in
//! the loaded-roots set so a later save reconsiders it even if nothing
//! references it anymore. Loads are synchronous and blocking; the whole
//! engine is single-threaded and cooperative.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::{HeapError, Result};
use crate::extent::{Extent, ExtentDecoder, ExtentEncoder, REFERENCE_COST};
use crate::fees::FeeProcessor;
use crate::loopback::{AutomaticDeserializer, AutomaticSerializer, LoopbackCodec, measure_fields};
use crate::node::Node;
use crate::object::{
    ClassRegistry, ConstantRegistry, FieldKind, LoadState, Loader, ObjHandle, ObjKey, ShadowObject,
    Token, Value, obj_key,
};
use crate::reentrant::FrameMaps;
use crate::store::GraphStore;
use crate::structure::{FieldPopulator, Frontier, StructureCodec};

/// The managed object-graph persistence engine.
pub struct ShadowHeap {
    store: Rc<dyn GraphStore>,
    fees: Rc<dyn FeeProcessor>,
    classes: ClassRegistry,
    constants: ConstantRegistry,
    /// Live instances by stable instance id. Canonical per session: one
    /// storage identity never materializes twice.
    interned: RefCell<HashMap<i64, ObjHandle>>,
    class_objects: RefCell<HashMap<String, ObjHandle>>,
    loaded_roots: RefCell<Vec<ObjHandle>>,
    loaded_keys: RefCell<HashSet<ObjKey>>,
    frames: RefCell<Vec<Rc<FrameMaps>>>,
    /// Depth of suspended callers. Storage faults while this is non-zero
    /// are performed immediately but billed on reactivation.
    inactive_depth: Cell<u32>,
    deferred_reads: RefCell<Vec<(ObjHandle, u64)>>,
}

impl ShadowHeap {
    /// Creates an engine over injected collaborators.
    pub fn new(
        store: Rc<dyn GraphStore>,
        fees: Rc<dyn FeeProcessor>,
        classes: ClassRegistry,
        constants: ConstantRegistry,
    ) -> Self {
        Self {
            store,
            fees,
            classes,
            constants,
            interned: RefCell::new(HashMap::new()),
            class_objects: RefCell::new(HashMap::new()),
            loaded_roots: RefCell::new(Vec::new()),
            loaded_keys: RefCell::new(HashSet::new()),
            frames: RefCell::new(Vec::new()),
            inactive_depth: Cell::new(0),
            deferred_reads: RefCell::new(Vec::new()),
        }
    }

    /// The class registry this heap runs against.
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// The injected constant registry.
    pub fn constants(&self) -> &ConstantRegistry {
        &self.constants
    }

    pub(crate) fn fees(&self) -> &dyn FeeProcessor {
        self.fees.as_ref()
    }

    pub(crate) fn codec(&self) -> StructureCodec<'_> {
        StructureCodec::new(self.store.as_ref(), &self.classes, &self.constants)
    }

    // --- OBJECT CONSTRUCTION ---

    /// Creates a fresh user-space object with defaulted fields (no storage
    /// identity until first serialization).
    pub fn new_object(&self, type_name: &str) -> Result<ObjHandle> {
        let fields = self.classes.default_fields(type_name)?;
        Ok(ShadowObject::new_local(type_name, fields))
    }

    /// The canonical class object for a registered class.
    pub fn class_object(&self, name: &str) -> Result<ObjHandle> {
        if let Some(existing) = self.class_objects.borrow().get(name) {
            return Ok(existing.clone());
        }
        // Validate the class exists before materializing a handle for it.
        self.classes.get(name)?;
        let handle = ShadowObject::new_tagged(name, Vec::new(), Token::Class(name.to_string()));
        self.class_objects
            .borrow_mut()
            .insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Looks up or creates the unpopulated stub for a regular node.
    pub(crate) fn intern_stub(&self, type_name: &str, node: &Rc<Node>) -> Result<ObjHandle> {
        let instance_id = node
            .instance_id()
            .ok_or_else(|| HeapError::Internal(format!("Stub requested for non-regular {node}")))?;
        if let Some(existing) = self.interned.borrow().get(&instance_id) {
            if existing.borrow().type_name != type_name {
                return Err(HeapError::Corrupt(format!(
                    "Instance {instance_id} referenced as both {} and {type_name}",
                    existing.borrow().type_name
                )));
            }
            return Ok(existing.clone());
        }
        let fields = self.classes.default_fields(type_name)?;
        let handle = ShadowObject::new_stub(
            type_name,
            fields,
            Token::Existing {
                node: node.clone(),
                newly_written: false,
            },
            Loader::FromStorage,
        );
        self.interned.borrow_mut().insert(instance_id, handle.clone());
        Ok(handle)
    }

    // --- LAZY-LOAD STATE MACHINE ---

    /// The lazy-load trigger hook.
    ///
    /// The instrumentation layer calls this before every field access on a
    /// shadow object. Idempotent: the real load runs exactly once, on the
    /// first call against an unloaded stub.
    pub fn on_first_field_access(&self, object: &ObjHandle) -> Result<()> {
        let state = object.borrow().state.clone();
        let loader = match state {
            LoadState::Loaded => return Ok(()),
            LoadState::Unloaded(loader) => loader,
            LoadState::Loading => {
                return Err(HeapError::Internal(format!(
                    "Load re-entered while loading {}",
                    object.borrow().type_name
                )));
            }
            LoadState::DiscoveryVisited => {
                return Err(HeapError::Internal(
                    "Load attempted through a discovery marker".into(),
                ));
            }
        };
        object.borrow_mut().state = LoadState::Loading;
        // On failure the object stays `Loading`: observably broken rather
        // than silently half-populated.
        self.run_loader(object, loader)?;
        self.record_loaded_root(object);
        Ok(())
    }

    fn run_loader(&self, object: &ObjHandle, loader: Loader) -> Result<()> {
        match loader {
            Loader::FromStorage => {
                let node = object.borrow().node().ok_or_else(|| {
                    HeapError::Internal("Storage loader on an unidentified object".into())
                })?;
                let extent = self
                    .store
                    .load_original_data(&node)?
                    .ok_or_else(|| HeapError::Corrupt(format!("No persisted data for {node}")))?;
                self.populate_from_extent(object, &extent)
            }
            Loader::FromExtent(extent) => self.populate_from_extent(object, &extent),
            Loader::FromCaller(caller) => self.populate_from_caller(object, &caller),
        }
    }

    fn populate_from_extent(&self, object: &ObjHandle, extent: &Extent) -> Result<()> {
        let cost = extent.billable_size();
        let populator = StubPopulator { heap: self };
        self.codec().deserialize_instance(object, extent, &populator)?;
        trace!(type_name = %object.borrow().type_name, cost, "instance faulted from storage");
        if self.inactive_depth.get() > 0 {
            // Billing is deferred until the suspended frame reactivates;
            // the data itself is retained, never re-read.
            self.deferred_reads.borrow_mut().push((object.clone(), cost));
            Ok(())
        } else {
            self.fees.read_one_instance_from_storage(cost)
        }
    }

    fn populate_from_caller(&self, object: &ObjHandle, caller: &ObjHandle) -> Result<()> {
        let frame = self
            .frames
            .borrow()
            .last()
            .cloned()
            .ok_or_else(|| HeapError::Internal("Caller-copy load outside any frame".into()))?;
        // The caller object itself may still be a storage stub.
        self.on_first_field_access(caller)?;

        let queue = LoopbackCodec::new();
        AutomaticSerializer::serialize_object(&queue, caller)?;
        let mut deserializer =
            AutomaticDeserializer::new(|reference: &Option<ObjHandle>| {
                frame.to_callee(self, reference)
            });
        deserializer.deserialize_object(&queue, object)?;

        let cost = measure_fields(&caller.borrow().fields);
        trace!(type_name = %caller.borrow().type_name, cost, "instance faulted across frame");
        self.fees.read_one_instance_from_heap(cost)
    }

    pub(crate) fn record_loaded_root(&self, object: &ObjHandle) {
        if self.loaded_keys.borrow_mut().insert(obj_key(object)) {
            self.loaded_roots.borrow_mut().push(object.clone());
        }
    }

    /// Drops a frame-local object from the loaded-roots set when its frame
    /// ends. Callee copies must never reach a storage save.
    pub(crate) fn forget_loaded(&self, object: &ObjHandle) {
        let key = obj_key(object);
        if self.loaded_keys.borrow_mut().remove(&key) {
            self.loaded_roots
                .borrow_mut()
                .retain(|root| obj_key(root) != key);
        }
    }

    /// Every object loaded so far this session, in load order. A loaded
    /// object is reconsidered by every save even if nothing references it
    /// anymore: graph restructuring must not hide its mutations.
    pub(crate) fn loaded_roots(&self) -> Vec<ObjHandle> {
        self.loaded_roots.borrow().clone()
    }

    // --- ACTIVE-LOADER HANDSHAKE ---

    /// Suspends billing of storage faults on behalf of a deeper frame.
    pub fn loader_did_become_inactive(&self) -> Result<()> {
        self.inactive_depth.set(
            self.inactive_depth
                .get()
                .checked_add(1)
                .ok_or_else(|| HeapError::Internal("Frame depth overflow".into()))?,
        );
        Ok(())
    }

    /// Reactivates the loader and finalizes billing for every storage
    /// fault deferred while suspended. Reactivating an already-active
    /// loader is a hard precondition violation.
    pub fn loader_did_become_active(&self) -> Result<()> {
        let depth = self.inactive_depth.get();
        if depth == 0 {
            return Err(HeapError::Internal(
                "Loader activated while already active".into(),
            ));
        }
        self.inactive_depth.set(depth - 1);
        let deferred: Vec<(ObjHandle, u64)> =
            std::mem::take(&mut *self.deferred_reads.borrow_mut());
        for (object, cost) in deferred {
            trace!(type_name = %object.borrow().type_name, cost, "billing deferred fault");
            self.fees.read_one_instance_from_storage(cost)?;
        }
        Ok(())
    }

    pub(crate) fn push_frame(&self, frame: Rc<FrameMaps>) {
        self.frames.borrow_mut().push(frame);
    }

    pub(crate) fn pop_frame(&self) -> Result<()> {
        self.frames
            .borrow_mut()
            .pop()
            .map(|_| ())
            .ok_or_else(|| HeapError::Internal("Frame popped with none active".into()))
    }

    // --- INSTRUMENTED FIELD ACCESS ---

    /// Reads an instance field by name, faulting the object in first.
    pub fn field(&self, object: &ObjHandle, name: &str) -> Result<Value> {
        self.on_first_field_access(object)?;
        let index = {
            let type_name = object.borrow().type_name.clone();
            self.classes.field_index(&type_name, name)?
        };
        Ok(object.borrow().fields[index].clone())
    }

    /// Writes an instance field by name, faulting the object in first.
    pub fn set_field(&self, object: &ObjHandle, name: &str, value: Value) -> Result<()> {
        self.on_first_field_access(object)?;
        let index = {
            let type_name = object.borrow().type_name.clone();
            self.classes.field_index(&type_name, name)?
        };
        let mut object = object.borrow_mut();
        if object.fields[index].kind() != value.kind() {
            return Err(HeapError::Internal(format!(
                "Field `{name}` written with mismatched kind {:?}",
                value.kind()
            )));
        }
        object.fields[index] = value;
        Ok(())
    }

    /// Reads a static field.
    pub fn get_static(&self, class: &str, field: &str) -> Result<Value> {
        let shape = self.classes.get(class)?;
        let index = shape.static_index(field)?;
        Ok(shape.statics()[index].clone())
    }

    /// Writes a static field.
    pub fn set_static(&self, class: &str, field: &str, value: Value) -> Result<()> {
        let shape = self.classes.get(class)?;
        let index = shape.static_index(field)?;
        let mut statics = shape.statics_mut();
        if statics[index].kind() != value.kind() {
            return Err(HeapError::Internal(format!(
                "Static `{class}.{field}` written with mismatched kind {:?}",
                value.kind()
            )));
        }
        statics[index] = value;
        Ok(())
    }

    // --- GRAPH LOAD ---

    /// Reconstitutes statics and instance stubs from the persisted graph
    /// image, if one exists. Fresh deployments (no image) keep default
    /// statics.
    pub fn load_graph(&self) -> Result<()> {
        let Some(image) = self.store.root()? else {
            debug!("no persisted graph image; starting fresh");
            return Ok(());
        };
        let codec = self.codec();

        // Pass 1: boundary discovery. Walk the statics footprint, then
        // intern one stub per instance header until the reference cursor
        // underflows. Nothing is wired yet.
        let mut dec = ExtentDecoder::new(&image);
        self.skip_statics(&mut dec)?;
        let mut discovered = 0usize;
        loop {
            let header = match dec.decode_reference() {
                Ok(header) => header,
                // The one place underflow is an expected sentinel.
                Err(HeapError::Underflow) => break,
                Err(other) => return Err(other),
            };
            let node = header.ok_or_else(|| {
                HeapError::Corrupt("Null reference as instance header".into())
            })?;
            let Node::Regular { type_name, .. } = node.as_ref() else {
                return Err(HeapError::Corrupt(format!(
                    "Instance header is not a regular node: {node}"
                )));
            };
            let type_name = type_name.clone();
            let handle = self.intern_stub(&type_name, &node)?;

            let data_start = dec.data_position();
            let ref_start = dec.reference_position();
            codec
                .skip_instance(&type_name, &mut dec)
                .map_err(truncated)?;
            let slice = Extent {
                data: image.data[data_start..dec.data_position()].to_vec(),
                references: image.references[ref_start..dec.reference_position()].to_vec(),
            };

            let mut object = handle.borrow_mut();
            if !matches!(object.state, LoadState::Unloaded(Loader::FromStorage)) {
                return Err(HeapError::Corrupt(format!(
                    "Duplicate instance header for {node}"
                )));
            }
            object.state = LoadState::Unloaded(Loader::FromExtent(slice));
            discovered += 1;
        }

        // Pass 2: re-walk the statics bytes and wire them against the
        // stable instance list pass 1 produced.
        let mut dec = ExtentDecoder::new(&image);
        let populator = StubPopulator { heap: self };
        for shape in self.classes.classes() {
            codec.deserialize_class_statics(shape, &mut dec, &populator)?;
        }

        let statics_size = self.statics_footprint();
        debug!(discovered, statics_size, "graph image loaded");
        self.fees.read_static_data_from_storage(statics_size)
    }

    /// Advances both cursors across the statics block without
    /// materializing anything.
    fn skip_statics(&self, dec: &mut ExtentDecoder<'_>) -> Result<()> {
        for shape in self.classes.classes() {
            for descriptor in &shape.static_fields {
                match descriptor.kind {
                    FieldKind::Ref => {
                        dec.decode_reference().map_err(truncated)?;
                    }
                    primitive => dec.skip_data(primitive.data_width()).map_err(truncated)?,
                }
            }
        }
        Ok(())
    }

    /// Encoded footprint of the statics block. Shapes fix the widths, so
    /// this equals the billable size of the encoded block without encoding.
    fn statics_footprint(&self) -> u64 {
        self.classes
            .classes()
            .iter()
            .flat_map(|shape| shape.static_fields.iter())
            .map(|descriptor| match descriptor.kind {
                FieldKind::Ref => REFERENCE_COST,
                primitive => primitive.data_width() as u64,
            })
            .sum()
    }

    // --- GRAPH SAVE ---

    /// Serializes statics plus every reachable or previously-loaded
    /// instance, writes changed instances through the store, replaces the
    /// graph image, and flushes. Write order is fixed: the statics block
    /// first, then instances in discovery order.
    pub fn save_graph(&self) -> Result<()> {
        let codec = self.codec();
        let mut frontier = Frontier::new();
        let mut image = ExtentEncoder::new();

        for shape in self.classes.classes() {
            codec.serialize_class_statics(shape, &mut image, &mut frontier)?;
        }
        let statics_size =
            image.data_len() as u64 + REFERENCE_COST * image.reference_len() as u64;
        self.fees.write_static_data_to_storage(statics_size)?;

        // Loaded objects are reconsidered even if unreferenced; the
        // frontier deduplicates against statics-discovered entries.
        for root in self.loaded_roots() {
            frontier.enqueue(&root);
        }

        let mut written = 0usize;
        let mut skipped = 0usize;
        while let Some(object) = frontier.next() {
            let (node, newly_written, loaded) = {
                let mut object = object.borrow_mut();
                if matches!(object.token, Token::New) {
                    // Loaded-roots seeding can surface an object the statics
                    // walk never reached; it gets its node here.
                    let node = self.store.build_new_regular_node(&object.type_name);
                    object.bind_node(node.clone())?;
                    (node, true, true)
                } else {
                    match &object.token {
                        Token::Existing {
                            node,
                            newly_written,
                        } => (node.clone(), *newly_written, object.is_loaded()),
                        other => {
                            return Err(HeapError::Internal(format!(
                                "Frontier object carries token {other:?}"
                            )));
                        }
                    }
                }
            };

            let extent = if loaded {
                codec.serialize_instance(&object, &mut frontier)?
            } else {
                // An untouched stub cannot have changed; splice its
                // original payload and keep its referents in the image.
                let extent = self.untouched_extent(&object, &node)?;
                for reference in extent.references.iter().flatten() {
                    if let Node::Regular { type_name, .. } = reference.as_ref() {
                        let referent = self.intern_stub(type_name, reference)?;
                        frontier.enqueue(&referent);
                    }
                }
                extent
            };

            if newly_written {
                self.fees.write_one_instance_to_storage(extent.billable_size())?;
                self.store.save_regular_data(&node, &extent)?;
                if let Token::Existing { newly_written, .. } = &mut object.borrow_mut().token {
                    *newly_written = false;
                }
                written += 1;
            } else if loaded {
                let original = self.store.load_original_data(&node)?;
                if original.as_ref() == Some(&extent) {
                    skipped += 1;
                } else {
                    self.fees.write_one_instance_to_storage(extent.billable_size())?;
                    self.store.save_regular_data(&node, &extent)?;
                    written += 1;
                }
            }

            image.encode_reference(Some(node));
            image.append_extent(&extent);
        }

        self.store.set_root(&image.to_extent())?;
        self.store.flush_writes()?;
        debug!(written, skipped, statics_size, "graph saved");
        Ok(())
    }

    /// Original payload of a never-touched stub, preferring the image
    /// slice it was discovered with.
    fn untouched_extent(&self, object: &ObjHandle, node: &Rc<Node>) -> Result<Extent> {
        let state = object.borrow().state.clone();
        match state {
            LoadState::Unloaded(Loader::FromExtent(extent)) => Ok(extent),
            LoadState::Unloaded(Loader::FromStorage) => self
                .store
                .load_original_data(node)?
                .ok_or_else(|| HeapError::Corrupt(format!("No persisted data for {node}"))),
            other => Err(HeapError::Internal(format!(
                "Unloaded frontier object in state {other:?}"
            ))),
        }
    }
}

/// Populator that materializes lazy stubs against the heap's interning
/// tables: regular nodes become (or find) stubs, class and constant nodes
/// resolve to their shared canonical objects.
pub(crate) struct StubPopulator<'h> {
    pub(crate) heap: &'h ShadowHeap,
}

impl FieldPopulator for StubPopulator<'_> {
    fn create_regular_instance(&self, type_name: &str, node: &Rc<Node>) -> Result<ObjHandle> {
        self.heap.intern_stub(type_name, node)
    }

    fn create_class(&self, name: &str) -> Result<ObjHandle> {
        self.heap.class_object(name)
    }

    fn create_constant(&self, id: i64) -> Result<ObjHandle> {
        self.heap.constants.lookup(id)
    }
}

fn truncated(error: HeapError) -> HeapError {
    match error {
        HeapError::Underflow => HeapError::Corrupt("Graph image truncated".into()),
        other => other,
    }
}
