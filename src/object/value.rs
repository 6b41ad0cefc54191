//! Runtime field values.

use std::fmt;

use super::instance::ObjHandle;
use super::shape::FieldKind;

/// One field slot of a shadow object or static block.
///
/// Primitives carry their value inline; references carry a handle to the
/// target shadow object (`None` is the null reference). Cloning a `Value`
/// clones the handle, not the target, so a cloned reference still observes
/// the same object identity.
#[derive(Clone)]
pub enum Value {
    /// Signed 8-bit value.
    Byte(i8),
    /// Signed 16-bit value.
    Short(i16),
    /// Unsigned 16-bit character.
    Char(u16),
    /// Signed 32-bit value.
    Int(i32),
    /// Signed 64-bit value.
    Long(i64),
    /// Object reference, possibly null.
    Ref(Option<ObjHandle>),
}

impl Value {
    /// The field kind this value inhabits.
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Byte(_) => FieldKind::Byte,
            Self::Short(_) => FieldKind::Short,
            Self::Char(_) => FieldKind::Char,
            Self::Int(_) => FieldKind::Int,
            Self::Long(_) => FieldKind::Long,
            Self::Ref(_) => FieldKind::Ref,
        }
    }

    /// The zero/null default for a field of the given kind.
    pub fn default_for(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Byte => Self::Byte(0),
            FieldKind::Short => Self::Short(0),
            FieldKind::Char => Self::Char(0),
            FieldKind::Int => Self::Int(0),
            FieldKind::Long => Self::Long(0),
            FieldKind::Ref => Self::Ref(None),
        }
    }

    /// Returns the reference payload if this is a reference value.
    pub fn as_reference(&self) -> Option<&Option<ObjHandle>> {
        match self {
            Self::Ref(inner) => Some(inner),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Primitives compare by value; references compare by target identity
    /// (`Rc::ptr_eq`), matching the engine's canonical-instance semantics.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Byte(a), Self::Byte(b)) => a == b,
            (Self::Short(a), Self::Short(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Ref(None), Self::Ref(None)) => true,
            (Self::Ref(Some(a)), Self::Ref(Some(b))) => std::rc::Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte(v) => write!(f, "Byte({v})"),
            Self::Short(v) => write!(f, "Short({v})"),
            Self::Char(v) => write!(f, "Char({v})"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Long(v) => write!(f, "Long({v})"),
            Self::Ref(None) => write!(f, "Ref(null)"),
            Self::Ref(Some(handle)) => {
                write!(f, "Ref({})", handle.borrow().type_name)
            }
        }
    }
}
