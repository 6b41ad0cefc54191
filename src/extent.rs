//! The serialized unit: one object's (or the statics block's) encoded form.
//!
//! An [`Extent`] pairs a primitive byte payload with an ordered list of
//! reference nodes. It is used both as the durable post-encode form handed
//! to the object graph store and transiently in memory to decide whether a
//! reloaded-then-resaved object actually changed.
//!
//! ## Equality
//!
//! Two extents are equal iff their bytes are byte-equal and their reference
//! lists are pairwise identical *by pointer* (`Rc::ptr_eq`), never by deep
//! comparison. The node model guarantees canonical instances per storage
//! identity, which is what makes pointer comparison sound here and lets the
//! engine skip rewriting unchanged instances.
//!
//! ## Billable size
//!
//! `data.len() + REFERENCE_COST * references.len()`. The per-reference cost
//! is a fixed abstract constant, deliberately independent of a reference's
//! actual encoded width, so billing stays stable across storage-format
//! changes.

use std::rc::Rc;

use crate::codec::{PrimitiveDecoder, PrimitiveEncoder};
use crate::error::{HeapError, Result};
use crate::node::Node;

/// Abstract billing cost of one reference slot, independent of its encoded
/// byte length.
pub const REFERENCE_COST: u64 = 32;

/// Immutable encoded payload of one object or static block.
#[derive(Debug, Clone, Default)]
pub struct Extent {
    /// Primitive field data, big-endian, in field-walk order.
    pub data: Vec<u8>,
    /// Reference slots in field-walk order. `None` is a null reference.
    pub references: Vec<Option<Rc<Node>>>,
}

impl Extent {
    /// Derived billing size of this extent.
    pub fn billable_size(&self) -> u64 {
        self.data.len() as u64 + REFERENCE_COST * self.references.len() as u64
    }
}

impl PartialEq for Extent {
    fn eq(&self, other: &Self) -> bool {
        if self.data != other.data || self.references.len() != other.references.len() {
            return false;
        }
        self.references
            .iter()
            .zip(other.references.iter())
            .all(|(a, b)| match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                _ => false,
            })
    }
}

impl Eq for Extent {}

/// Accumulates primitive writes and reference writes, then finalizes into an
/// immutable [`Extent`].
#[derive(Debug, Default)]
pub struct ExtentEncoder {
    primitives: PrimitiveEncoder,
    references: Vec<Option<Rc<Node>>>,
}

impl ExtentEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a signed byte.
    pub fn encode_byte(&mut self, value: i8) {
        self.primitives.encode_byte(value);
    }

    /// Appends a 16-bit signed integer.
    pub fn encode_short(&mut self, value: i16) {
        self.primitives.encode_short(value);
    }

    /// Appends a 16-bit character.
    pub fn encode_char(&mut self, value: u16) {
        self.primitives.encode_char(value);
    }

    /// Appends a 32-bit signed integer.
    pub fn encode_int(&mut self, value: i32) {
        self.primitives.encode_int(value);
    }

    /// Appends a 64-bit signed integer.
    pub fn encode_long(&mut self, value: i64) {
        self.primitives.encode_long(value);
    }

    /// Appends one reference slot.
    pub fn encode_reference(&mut self, node: Option<Rc<Node>>) {
        self.references.push(node);
    }

    /// Bytes written so far (excludes reference slots).
    pub fn data_len(&self) -> usize {
        self.primitives.len()
    }

    /// Reference slots written so far.
    pub fn reference_len(&self) -> usize {
        self.references.len()
    }

    /// Splices an already-encoded extent onto the end of this one: bytes
    /// after bytes, reference slots after reference slots. Used to assemble
    /// per-instance extents into a graph image.
    pub fn append_extent(&mut self, extent: &Extent) {
        self.primitives.encode_bytes(&extent.data);
        self.references.extend(extent.references.iter().cloned());
    }

    /// Finalizes into the immutable value form.
    pub fn to_extent(self) -> Extent {
        Extent {
            data: self.primitives.into_bytes(),
            references: self.references,
        }
    }
}

/// Reads an existing [`Extent`] back, with the primitive cursor and the
/// reference cursor advancing independently.
#[derive(Debug)]
pub struct ExtentDecoder<'a> {
    primitives: PrimitiveDecoder<'a>,
    references: &'a [Option<Rc<Node>>],
    reference_cursor: usize,
}

impl<'a> ExtentDecoder<'a> {
    /// Creates a decoder positioned at the start of `extent`.
    pub fn new(extent: &'a Extent) -> Self {
        Self {
            primitives: PrimitiveDecoder::new(&extent.data),
            references: &extent.references,
            reference_cursor: 0,
        }
    }

    /// Reads a signed byte.
    pub fn decode_byte(&mut self) -> Result<i8> {
        self.primitives.decode_byte()
    }

    /// Reads a 16-bit signed integer.
    pub fn decode_short(&mut self) -> Result<i16> {
        self.primitives.decode_short()
    }

    /// Reads a 16-bit character.
    pub fn decode_char(&mut self) -> Result<u16> {
        self.primitives.decode_char()
    }

    /// Reads a 32-bit signed integer.
    pub fn decode_int(&mut self) -> Result<i32> {
        self.primitives.decode_int()
    }

    /// Reads a 64-bit signed integer.
    pub fn decode_long(&mut self) -> Result<i64> {
        self.primitives.decode_long()
    }

    /// Reads the next reference slot.
    ///
    /// Past the end of the reference list this yields
    /// [`HeapError::Underflow`], the sentinel the instance-discovery pass
    /// stops on.
    pub fn decode_reference(&mut self) -> Result<Option<Rc<Node>>> {
        let slot = self
            .references
            .get(self.reference_cursor)
            .ok_or(HeapError::Underflow)?;
        self.reference_cursor += 1;
        Ok(slot.clone())
    }

    /// Advances the primitive cursor without materializing values.
    pub fn skip_data(&mut self, width: usize) -> Result<()> {
        self.primitives.skip(width)
    }

    /// Current primitive cursor position.
    pub fn data_position(&self) -> usize {
        self.primitives.position()
    }

    /// Current reference cursor position.
    pub fn reference_position(&self) -> usize {
        self.reference_cursor
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn regular(id: i64) -> Rc<Node> {
        Rc::new(Node::Regular {
            type_name: "demo.Item".into(),
            instance_id: id,
        })
    }

    #[test]
    fn equality_requires_pointer_identical_references() {
        let shared = regular(1);
        let a = Extent {
            data: vec![1, 2],
            references: vec![Some(shared.clone()), None],
        };
        let b = Extent {
            data: vec![1, 2],
            references: vec![Some(shared.clone()), None],
        };
        assert_eq!(a, b);

        // Structurally equal but a distinct allocation: not equal.
        let c = Extent {
            data: vec![1, 2],
            references: vec![Some(regular(1)), None],
        };
        assert_ne!(a, c);
    }

    #[test]
    fn billable_size_uses_abstract_reference_cost() {
        let extent = Extent {
            data: vec![0; 10],
            references: vec![None, Some(regular(3))],
        };
        assert_eq!(extent.billable_size(), 10 + 2 * REFERENCE_COST);
    }

    #[test]
    fn cursors_advance_independently() {
        let mut enc = ExtentEncoder::new();
        enc.encode_int(42);
        enc.encode_reference(Some(regular(9)));
        enc.encode_long(-1);
        enc.encode_reference(None);
        let extent = enc.to_extent();

        let mut dec = ExtentDecoder::new(&extent);
        // References may be drained before any primitive is read.
        assert!(dec.decode_reference().unwrap().is_some());
        assert!(dec.decode_reference().unwrap().is_none());
        assert!(dec.decode_reference().unwrap_err().is_underflow());
        assert_eq!(dec.decode_int().unwrap(), 42);
        assert_eq!(dec.decode_long().unwrap(), -1);
    }
}
