//! The loopback codec: serialize to a queue, deserialize from the same
//! queue, no storage bytes involved.
//!
//! This adapter exposes the same read/write surface as the storage-backed
//! path, but backed by an in-memory queue of [`Value`]s. Decoupling the
//! field-walking logic from its destination lets one walker serve three
//! purposes:
//!
//! 1. the backup queue of a reentrant frame (capture, then revert),
//! 2. heap-to-heap copy during reentrant faulting and commit, and
//! 3. pure in-memory size measurement (walk, discard, sum costs).
//!
//! [`AutomaticSerializer`] walks fields pushing values and references;
//! [`AutomaticDeserializer`] pops them back, applying an injected
//! reference-remapping function (identity for revert, caller/callee
//! translation for frame copies). Popping an empty queue underflows, the
//! queue-shaped analogue of running a byte cursor past its buffer.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::error::{HeapError, Result};
use crate::extent::REFERENCE_COST;
use crate::object::{ClassRegistry, ObjHandle, Value};

/// FIFO value queue shared between one serializer/deserializer pair.
#[derive(Debug, Default)]
pub struct LoopbackCodec {
    queue: RefCell<VecDeque<Value>>,
}

impl LoopbackCodec {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one value.
    pub fn push(&self, value: Value) {
        self.queue.borrow_mut().push_back(value);
    }

    /// Removes and returns the oldest value, or underflows when empty.
    pub fn pop(&self) -> Result<Value> {
        self.queue
            .borrow_mut()
            .pop_front()
            .ok_or(HeapError::Underflow)
    }

    /// Number of queued values.
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

/// Field walker for the write side of the queue.
#[derive(Debug, Clone, Copy)]
pub struct AutomaticSerializer;

impl AutomaticSerializer {
    /// Pushes every field of `object`, in flattened layout order.
    ///
    /// The object must be loaded; walking an unpopulated stub would capture
    /// defaults instead of state, which is a caller bug.
    pub fn serialize_object(queue: &LoopbackCodec, object: &ObjHandle) -> Result<()> {
        let object = object.borrow();
        if !object.is_loaded() {
            return Err(HeapError::Internal(format!(
                "Loopback walk over unloaded {}",
                object.type_name
            )));
        }
        for field in &object.fields {
            queue.push(field.clone());
        }
        Ok(())
    }

    /// Pushes every class's direct static values in registry order.
    pub fn serialize_statics(queue: &LoopbackCodec, classes: &ClassRegistry) {
        for shape in classes.classes() {
            for value in shape.statics().iter() {
                queue.push(value.clone());
            }
        }
    }
}

/// Field walker for the read side of the queue, with reference remapping.
pub struct AutomaticDeserializer<F> {
    remap: F,
}

impl<F> AutomaticDeserializer<F>
where
    F: FnMut(&Option<ObjHandle>) -> Result<Option<ObjHandle>>,
{
    /// Creates a deserializer around a remapping function. The function
    /// receives each popped reference and returns the handle to store.
    pub fn new(remap: F) -> Self {
        Self { remap }
    }

    /// Pops one value per field of `target` and stores it, remapping
    /// references. Marks the target loaded.
    pub fn deserialize_object(&mut self, queue: &LoopbackCodec, target: &ObjHandle) -> Result<()> {
        let slot_count = target.borrow().fields.len();
        let mut incoming = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            incoming.push(self.apply(queue.pop()?)?);
        }

        let mut target = target.borrow_mut();
        for (slot, value) in target.fields.iter_mut().zip(incoming) {
            check_parity(slot, &value)?;
            *slot = value;
        }
        target.state = crate::object::LoadState::Loaded;
        Ok(())
    }

    /// Pops one value per static field of every class, in registry order,
    /// and writes it back, remapping references.
    pub fn deserialize_statics(&mut self, queue: &LoopbackCodec, classes: &ClassRegistry) -> Result<()> {
        for shape in classes.classes() {
            let slot_count = shape.static_fields.len();
            let mut incoming = Vec::with_capacity(slot_count);
            for _ in 0..slot_count {
                incoming.push(self.apply(queue.pop()?)?);
            }
            let mut statics = shape.statics_mut();
            for (slot, value) in statics.iter_mut().zip(incoming) {
                check_parity(slot, &value)?;
                *slot = value;
            }
        }
        Ok(())
    }

    fn apply(&mut self, value: Value) -> Result<Value> {
        match value {
            Value::Ref(reference) => Ok(Value::Ref((self.remap)(&reference)?)),
            primitive => Ok(primitive),
        }
    }
}

fn check_parity(slot: &Value, incoming: &Value) -> Result<()> {
    if slot.kind() != incoming.kind() {
        return Err(HeapError::Internal(format!(
            "Loopback parity violation: slot {:?} fed with {:?}",
            slot.kind(),
            incoming.kind()
        )));
    }
    Ok(())
}

/// Billable size of a field vector: primitive widths plus the abstract
/// reference cost per reference slot. No bytes are produced; this is the
/// sizing face of the loopback codec and matches the billable size of the
/// extent the same fields would encode to.
pub fn measure_fields(fields: &[Value]) -> u64 {
    fields
        .iter()
        .map(|value| match value {
            Value::Ref(_) => REFERENCE_COST,
            primitive => primitive.kind().data_width() as u64,
        })
        .sum()
}

/// Billable size of the whole statics block across all classes.
pub fn measure_statics(classes: &ClassRegistry) -> u64 {
    classes
        .classes()
        .iter()
        .map(|shape| measure_fields(&shape.statics()))
        .sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::object::ShadowObject;

    #[test]
    fn round_trip_preserves_order_and_identity() {
        let target_obj = ShadowObject::new_local("demo.T", vec![]);
        let source = ShadowObject::new_local(
            "demo.Pair",
            vec![Value::Int(3), Value::Ref(Some(target_obj.clone()))],
        );
        let sink = ShadowObject::new_local("demo.Pair", vec![Value::Int(0), Value::Ref(None)]);

        let queue = LoopbackCodec::new();
        AutomaticSerializer::serialize_object(&queue, &source).unwrap();
        let mut plain = AutomaticDeserializer::new(|r: &Option<ObjHandle>| Ok(r.clone()));
        plain.deserialize_object(&queue, &sink).unwrap();

        assert!(queue.is_empty());
        let sink = sink.borrow();
        assert!(matches!(sink.fields[0], Value::Int(3)));
        match &sink.fields[1] {
            Value::Ref(Some(handle)) => {
                assert!(std::rc::Rc::ptr_eq(handle, &target_obj));
            }
            other => unreachable!("expected reference, got {other:?}"),
        }
    }

    #[test]
    fn pop_on_empty_underflows() {
        let queue = LoopbackCodec::new();
        assert!(queue.pop().unwrap_err().is_underflow());
    }

    #[test]
    fn sizing_matches_encoded_billable_size() {
        let fields = vec![
            Value::Byte(1),
            Value::Long(2),
            Value::Ref(None),
            Value::Char(3),
        ];
        assert_eq!(measure_fields(&fields), 1 + 8 + REFERENCE_COST + 2);
    }
}
