//! The reference node model.
//!
//! A [`Node`] describes *how an object is identified in storage*,
//! independent of its live representation on the shadow heap:
//!
//! - [`Node::Regular`] — a normal heap object, identified by type name plus
//!   an instance id assigned once, on first serialization, and stable
//!   thereafter.
//! - [`Node::Constant`] — a negative, stable identifier into the injected
//!   interned-constant table.
//! - [`Node::Class`] — a loaded class object, identified by name.
//!
//! ## Canonical identity
//!
//! Nodes are produced only through a [`NodeFactory`] (in practice the object
//! graph store), which must intern them: two lookups of the same storage
//! identity yield the *same* `Rc<Node>`. Downstream equality checks for
//! dirty-write avoidance compare references by pointer, not structurally,
//! so canonicalization is load-bearing rather than an optimization.
//!
//! ## Wire encoding
//!
//! A leading big-endian `i32` discriminator:
//!
//! ```text
//!  0   null reference
//! -1   constant        [i64 constant id]
//! -2   class           [i32 name length] [UTF-8 name]
//!  n>0 regular         [n UTF-8 type-name bytes] [i64 instance id]
//! ```
//!
//! Constants and classes are matched before falling through to the generic
//! positive case: a type-name length can never legally be 0, -1 or -2.
//! Any other negative discriminator is fatal stream corruption.

use std::fmt;
use std::rc::Rc;

use crate::codec::{PrimitiveDecoder, PrimitiveEncoder};
use crate::error::{HeapError, Result};

const NULL_DISCRIMINATOR: i32 = 0;
const CONSTANT_DISCRIMINATOR: i32 = -1;
const CLASS_DISCRIMINATOR: i32 = -2;

/// Storage identity of a referenced object.
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum Node {
    /// A normal heap object with a stable instance id.
    Regular {
        /// Shape name of the referenced object.
        type_name: String,
        /// Storage identity, assigned on first serialization.
        instance_id: i64,
    },
    /// An interned constant (negative id).
    Constant {
        /// Identifier into the constant registry. Always negative.
        id: i64,
    },
    /// A loaded class object, identified by name rather than instance id.
    Class {
        /// The class name.
        name: String,
    },
}

impl Node {
    /// Returns the instance id if this is a regular node.
    pub fn instance_id(&self) -> Option<i64> {
        match self {
            Self::Regular { instance_id, .. } => Some(*instance_id),
            _ => None,
        }
    }

    /// Encodes an optional node into `enc` using the wire layout above.
    pub fn encode(node: Option<&Rc<Node>>, enc: &mut PrimitiveEncoder) -> Result<()> {
        match node.map(Rc::as_ref) {
            None => enc.encode_int(NULL_DISCRIMINATOR),
            Some(Node::Constant { id }) => {
                enc.encode_int(CONSTANT_DISCRIMINATOR);
                enc.encode_long(*id);
            }
            Some(Node::Class { name }) => {
                enc.encode_int(CLASS_DISCRIMINATOR);
                let bytes = name.as_bytes();
                enc.encode_int(checked_len(bytes.len())?);
                enc.encode_bytes(bytes);
            }
            Some(Node::Regular {
                type_name,
                instance_id,
            }) => {
                let bytes = type_name.as_bytes();
                if bytes.is_empty() {
                    return Err(HeapError::Internal(
                        "Regular node with empty type name cannot be encoded".into(),
                    ));
                }
                enc.encode_int(checked_len(bytes.len())?);
                enc.encode_bytes(bytes);
                enc.encode_long(*instance_id);
            }
        }
        Ok(())
    }

    /// Decodes an optional node, interning through `factory`.
    ///
    /// Deterministic mirror of [`Node::encode`]: the constant and class
    /// discriminators are checked first, then any positive value is taken as
    /// a regular node's type-name length. Other values are corruption.
    pub fn decode(dec: &mut PrimitiveDecoder<'_>, factory: &dyn NodeFactory) -> Result<Option<Rc<Node>>> {
        let discriminator = dec.decode_int()?;
        match discriminator {
            NULL_DISCRIMINATOR => Ok(None),
            CONSTANT_DISCRIMINATOR => {
                let id = dec.decode_long()?;
                Ok(Some(factory.constant_node(id)))
            }
            CLASS_DISCRIMINATOR => {
                let length = dec.decode_int()?;
                let name = decode_name(dec, length)?;
                Ok(Some(factory.class_node(&name)))
            }
            length if length > 0 => {
                let type_name = decode_name(dec, length)?;
                let instance_id = dec.decode_long()?;
                Ok(Some(factory.regular_node(&type_name, instance_id)))
            }
            other => Err(HeapError::Corrupt(format!(
                "Unknown node discriminator {other}"
            ))),
        }
    }
}

fn checked_len(len: usize) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| HeapError::Internal(format!("Name of {len} bytes exceeds encodable length")))
}

fn decode_name(dec: &mut PrimitiveDecoder<'_>, length: i32) -> Result<String> {
    if length <= 0 {
        return Err(HeapError::Corrupt(format!(
            "Invalid name length {length} in node encoding"
        )));
    }
    let raw = dec.decode_bytes(length as usize)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| HeapError::Corrupt("Node name is not valid UTF-8".into()))
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular {
                type_name,
                instance_id,
            } => write!(f, "{type_name}#{instance_id}"),
            Self::Constant { id } => write!(f, "const({id})"),
            Self::Class { name } => write!(f, "class({name})"),
        }
    }
}

/// Canonicalizing source of node instances.
///
/// Implemented by the object graph store. All three lookups must intern:
/// repeated calls with the same logical identity return the same `Rc`.
pub trait NodeFactory {
    /// Canonical node for an already-identified instance.
    fn regular_node(&self, type_name: &str, instance_id: i64) -> Rc<Node>;

    /// Canonical node for an interned constant id.
    fn constant_node(&self, id: i64) -> Rc<Node>;

    /// Canonical node for a class object.
    fn class_node(&self, name: &str) -> Rc<Node>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Minimal interning factory for codec tests.
    #[derive(Default)]
    struct TestFactory {
        regular: RefCell<HashMap<(String, i64), Rc<Node>>>,
        constants: RefCell<HashMap<i64, Rc<Node>>>,
        classes: RefCell<HashMap<String, Rc<Node>>>,
    }

    impl NodeFactory for TestFactory {
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

    fn round_trip(node: Option<&Rc<Node>>, factory: &TestFactory) -> Option<Rc<Node>> {
        let mut enc = PrimitiveEncoder::new();
        Node::encode(node, &mut enc).unwrap();
        let bytes = enc.into_bytes();
        let mut dec = PrimitiveDecoder::new(&bytes);
        let decoded = Node::decode(&mut dec, factory).unwrap();
        assert!(dec.is_exhausted());
        decoded
    }

    #[test]
    fn null_round_trips_to_null() {
        let factory = TestFactory::default();
        assert!(round_trip(None, &factory).is_none());
    }

    #[test]
    fn constant_is_never_confused_with_regular() {
        let factory = TestFactory::default();
        let constant = factory.constant_node(-5);
        let decoded = round_trip(Some(&constant), &factory).unwrap();
        assert_eq!(*decoded, Node::Constant { id: -5 });
    }

    #[test]
    fn regular_round_trip_preserves_identity_fields() {
        let factory = TestFactory::default();
        let node = factory.regular_node("demo.Account", 7);
        let decoded = round_trip(Some(&node), &factory).unwrap();
        // Interning makes the decode canonical: same Rc, not just equal.
        assert!(Rc::ptr_eq(&node, &decoded));
    }

    #[test]
    fn class_round_trip() {
        let factory = TestFactory::default();
        let node = factory.class_node("demo.Registry");
        let decoded = round_trip(Some(&node), &factory).unwrap();
        assert!(Rc::ptr_eq(&node, &decoded));
    }

    #[test]
    fn unknown_negative_discriminator_is_corrupt() {
        let factory = TestFactory::default();
        let mut enc = PrimitiveEncoder::new();
        enc.encode_int(-3);
        let bytes = enc.into_bytes();
        let mut dec = PrimitiveDecoder::new(&bytes);
        let err = Node::decode(&mut dec, &factory).unwrap_err();
        assert!(matches!(err, HeapError::Corrupt(_)));
    }
}
