//! Reentrant frames: callee isolation over a shared heap.
//!
//! When execution reenters the sandbox (an inner call running against the
//! same statics while an outer call is suspended), the callee must see the
//! caller's state without being able to corrupt it. A [`ReentrantFrame`]
//! provides that isolation copy-on-entry style:
//!
//! - on entry, every static value is captured into a backup queue and every
//!   copyable static reference is replaced by a callee-space stub that
//!   lazily copies its caller object on first touch;
//! - on failure, [`ReentrantFrame::revert_to_stored_fields`] pops the backup
//!   queue back and the callee's entire object graph is abandoned;
//! - on success, [`ReentrantFrame::commit_graph_to_stored_fields_and_restore`]
//!   first dry-runs the whole write-back to bill it (any billing failure
//!   aborts with the caller state untouched), then applies it with caller
//!   identity authoritative.
//!
//! Constants and class objects are exempt from copying and keep one shared
//! identity on both sides; everything else crosses the boundary by value.
//! The two frame-scoped identity maps translate handles between the spaces
//! and must be empty when a frame is entered.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::{HeapError, Result};
use crate::loopback::{
    AutomaticDeserializer, AutomaticSerializer, LoopbackCodec, measure_fields, measure_statics,
};
use crate::manager::ShadowHeap;
use crate::object::{
    LoadState, Loader, ObjHandle, ObjKey, ShadowObject, Token, Value, obj_key,
};

/// True when a caller object must be copied into callee space rather than
/// shared by identity. Only constants and class objects are shared.
pub fn object_uses_reentrant_copy(object: &ObjHandle) -> bool {
    !matches!(
        object.borrow().token,
        Token::Constant(_) | Token::Class(_)
    )
}

/// The two frame-scoped identity maps of one reentrant frame.
///
/// Both directions are kept in lockstep by [`FrameMaps::to_callee`]; shared
/// objects (constants, classes) never enter either map.
#[derive(Debug, Default)]
pub struct FrameMaps {
    callee_to_caller: std::cell::RefCell<HashMap<ObjKey, ObjHandle>>,
    caller_to_callee: std::cell::RefCell<HashMap<ObjKey, ObjHandle>>,
}

impl FrameMaps {
    /// Translates one caller-space reference into callee space, creating
    /// the lazy caller-copy stub on first encounter.
    pub fn to_callee(
        &self,
        heap: &ShadowHeap,
        reference: &Option<ObjHandle>,
    ) -> Result<Option<ObjHandle>> {
        let Some(caller) = reference else {
            return Ok(None);
        };
        if !object_uses_reentrant_copy(caller) {
            return Ok(Some(caller.clone()));
        }
        if let Some(existing) = self.caller_to_callee.borrow().get(&obj_key(caller)) {
            return Ok(Some(existing.clone()));
        }
        let type_name = caller.borrow().type_name.clone();
        let fields = heap.classes().default_fields(&type_name)?;
        let callee = ShadowObject::new_stub(
            &type_name,
            fields,
            Token::CallerCopy(caller.clone()),
            Loader::FromCaller(caller.clone()),
        );
        self.caller_to_callee
            .borrow_mut()
            .insert(obj_key(caller), callee.clone());
        self.callee_to_caller
            .borrow_mut()
            .insert(obj_key(&callee), caller.clone());
        trace!(%type_name, "caller object shadowed into callee space");
        Ok(Some(callee))
    }

    /// The caller counterpart of a callee handle, if one exists.
    pub fn caller_of(&self, callee: &ObjHandle) -> Option<ObjHandle> {
        self.callee_to_caller.borrow().get(&obj_key(callee)).cloned()
    }

    fn is_empty(&self) -> bool {
        self.callee_to_caller.borrow().is_empty() && self.caller_to_callee.borrow().is_empty()
    }

    fn callee_objects(&self) -> Vec<ObjHandle> {
        self.caller_to_callee.borrow().values().cloned().collect()
    }
}

/// One reentrant isolation frame over a heap. Ends exactly once, through
/// revert or commit.
pub struct ReentrantFrame<'h> {
    heap: &'h ShadowHeap,
    maps: Rc<FrameMaps>,
    backup: LoopbackCodec,
    captured: bool,
    finished: bool,
}

impl<'h> ReentrantFrame<'h> {
    /// Opens a frame with fresh, empty identity maps and registers it as
    /// the heap's innermost frame.
    pub fn enter(heap: &'h ShadowHeap) -> Self {
        let maps = Rc::new(FrameMaps::default());
        heap.push_frame(maps.clone());
        Self {
            heap,
            maps,
            backup: LoopbackCodec::new(),
            captured: false,
            finished: false,
        }
    }

    /// The frame's identity maps.
    pub fn maps(&self) -> &FrameMaps {
        &self.maps
    }

    /// Captures every static value into the backup queue, then replaces
    /// each copyable static reference with a callee-space stub. Bills one
    /// heap read of the statics block. Precondition: the identity maps are
    /// still empty (nothing has crossed the boundary yet).
    pub fn capture_and_replace_static_state(&mut self) -> Result<()> {
        self.check_open()?;
        if self.captured {
            return Err(HeapError::Internal("Frame statics captured twice".into()));
        }
        if !self.maps.is_empty() {
            return Err(HeapError::Internal(
                "Frame entered with non-empty identity maps".into(),
            ));
        }
        let classes = self.heap.classes();
        self.heap
            .fees()
            .read_static_data_from_heap(measure_statics(classes))?;
        AutomaticSerializer::serialize_statics(&self.backup, classes);

        for shape in classes.classes() {
            let mut statics = shape.statics_mut();
            for slot in statics.iter_mut() {
                if let Value::Ref(reference) = slot {
                    *slot = Value::Ref(self.maps.to_callee(self.heap, reference)?);
                }
            }
        }
        self.captured = true;
        debug!(backed_up = self.backup.len(), "frame statics captured");
        Ok(())
    }

    /// Abandons the callee's work: pops the backup queue back into the
    /// statics in original field order, references restored by identity.
    /// No billing.
    pub fn revert_to_stored_fields(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.captured {
            return Err(HeapError::Internal("Frame reverted before capture".into()));
        }
        let mut identity = AutomaticDeserializer::new(|r: &Option<ObjHandle>| Ok(r.clone()));
        identity.deserialize_statics(&self.backup, self.heap.classes())?;
        debug!("frame reverted");
        self.teardown()
    }

    /// Writes the callee's surviving state back into caller space.
    ///
    /// Phase 1 dry-runs the full write-back and bills it; a billing
    /// failure aborts here with statics and caller objects untouched, and
    /// the frame remains open for [`Self::revert_to_stored_fields`].
    /// Phase 2 rewrites static references to their caller counterparts
    /// (splicing brand-new callee objects in as-is) and copies each queued
    /// callee object into its caller counterpart, or remaps it in place
    /// when it is new.
    pub fn commit_graph_to_stored_fields_and_restore(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.captured {
            return Err(HeapError::Internal("Frame committed before capture".into()));
        }

        let queue = self.dry_run()?;

        // Point of no return: billing has fully succeeded.
        let classes = self.heap.classes();
        for shape in classes.classes() {
            let mut statics = shape.statics_mut();
            for slot in statics.iter_mut() {
                if let Value::Ref(Some(callee)) = slot {
                    if let Some(caller) = self.maps.caller_of(callee) {
                        *slot = Value::Ref(Some(caller));
                    }
                }
            }
        }

        for callee in &queue {
            let wire = LoopbackCodec::new();
            AutomaticSerializer::serialize_object(&wire, callee)?;
            let maps = self.maps.clone();
            let mut remap = AutomaticDeserializer::new(|r: &Option<ObjHandle>| {
                Ok(r.as_ref()
                    .map(|callee| maps.caller_of(callee).unwrap_or_else(|| callee.clone())))
            });
            match self.maps.caller_of(callee) {
                Some(caller) => {
                    remap.deserialize_object(&wire, &caller)?;
                    self.heap.record_loaded_root(&caller);
                }
                // Brand-new callee object: keep it, rewire its references.
                None => remap.deserialize_object(&wire, callee)?,
            }
        }
        debug!(committed = queue.len(), "frame committed");
        self.teardown()
    }

    /// Dry run: discovers the callee-space objects needing write-back,
    /// bills the statics block plus each object, and returns the
    /// processing queue in discovery order. `DiscoveryVisited` markers are
    /// always restored before returning.
    fn dry_run(&self) -> Result<Vec<ObjHandle>> {
        let mut marked: Vec<(ObjHandle, LoadState)> = Vec::new();
        let mut queue: Vec<ObjHandle> = Vec::new();
        let outcome = self.dry_run_walk(&mut marked, &mut queue);
        for (object, prior) in marked {
            object.borrow_mut().state = prior;
        }
        outcome?;
        Ok(queue)
    }

    fn dry_run_walk(
        &self,
        marked: &mut Vec<(ObjHandle, LoadState)>,
        queue: &mut Vec<ObjHandle>,
    ) -> Result<()> {
        let classes = self.heap.classes();
        self.heap
            .fees()
            .write_static_data_to_heap(measure_statics(classes))?;

        let mut pending: Vec<ObjHandle> = Vec::new();
        for shape in classes.classes() {
            for slot in shape.statics().iter() {
                if let Value::Ref(Some(reference)) = slot {
                    pending.push(reference.clone());
                }
            }
        }
        pending.extend(self.heap.loaded_roots());

        while let Some(object) = pending.pop() {
            let (token, state) = {
                let object = object.borrow();
                (object.token.clone(), object.state.clone())
            };
            match state {
                LoadState::DiscoveryVisited => continue,
                // Untouched caller-copy stubs need no write-back, and
                // caller-space or shared objects are not this frame's to
                // write.
                LoadState::Unloaded(_) | LoadState::Loading => continue,
                LoadState::Loaded => {}
            }
            let writable = match token {
                Token::New => true,
                Token::CallerCopy(_) => true,
                Token::Constant(_) | Token::Class(_) | Token::Existing { .. } => false,
            };
            if !writable {
                continue;
            }

            marked.push((object.clone(), LoadState::Loaded));
            object.borrow_mut().state = LoadState::DiscoveryVisited;

            self.heap
                .fees()
                .write_one_instance_to_heap(measure_fields(&object.borrow().fields))?;
            for field in &object.borrow().fields {
                if let Value::Ref(Some(reference)) = field {
                    pending.push(reference.clone());
                }
            }
            queue.push(object.clone());
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        for callee in self.maps.callee_objects() {
            self.heap.forget_loaded(&callee);
        }
        self.heap.pop_frame()?;
        self.finished = true;
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.finished {
            return Err(HeapError::Internal("Frame already finished".into()));
        }
        Ok(())
    }
}
