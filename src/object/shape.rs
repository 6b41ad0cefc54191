//! Field descriptor tables: the engine's stand-in for runtime reflection.
//!
//! The bytecode pipeline upstream validates every user class and hands the
//! engine one [`ClassShape`] per class: its direct instance fields and its
//! direct static fields, in declaration order. The [`ClassRegistry`] owns
//! the shapes in deterministic registration order (the order every
//! statics walk uses) and caches a flattened, superclass-first instance
//! layout per class so hierarchy walking is paid once.
//!
//! Shapes are trusted: a lookup miss past registration is a fatal
//! [`HeapError::Internal`], never a recoverable runtime condition.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{HeapError, Result};

use super::value::Value;

/// Semantic type of one field slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Signed 8-bit primitive.
    Byte,
    /// Signed 16-bit primitive.
    Short,
    /// Unsigned 16-bit character.
    Char,
    /// Signed 32-bit primitive.
    Int,
    /// Signed 64-bit primitive.
    Long,
    /// Object reference.
    Ref,
}

impl FieldKind {
    /// Encoded width in the primitive byte stream. Reference fields occupy
    /// a reference slot instead and contribute no data bytes.
    pub fn data_width(&self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Short | Self::Char => 2,
            Self::Int => 4,
            Self::Long => 8,
            Self::Ref => 0,
        }
    }
}

/// One entry of a class's field table.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Declared field name.
    pub name: String,
    /// Semantic type.
    pub kind: FieldKind,
}

impl FieldDescriptor {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Shape of one class: direct fields only, plus live static values.
///
/// Statics live here (not on any instance) and hold exactly one value per
/// direct static descriptor. Superclass statics belong to the superclass's
/// own shape and are never duplicated.
#[derive(Debug)]
pub struct ClassShape {
    /// Fully qualified class name.
    pub name: String,
    /// Direct superclass, if any. Must be registered first.
    pub superclass: Option<String>,
    /// Direct (non-inherited) instance fields, declaration order.
    pub instance_fields: Vec<FieldDescriptor>,
    /// Direct (non-inherited) static fields, declaration order.
    pub static_fields: Vec<FieldDescriptor>,
    statics: RefCell<Vec<Value>>,
}

impl ClassShape {
    /// Creates a shape with statics initialized to their kind defaults.
    pub fn new(
        name: impl Into<String>,
        superclass: Option<String>,
        instance_fields: Vec<FieldDescriptor>,
        static_fields: Vec<FieldDescriptor>,
    ) -> Self {
        let statics = static_fields
            .iter()
            .map(|descriptor| Value::default_for(descriptor.kind))
            .collect();
        Self {
            name: name.into(),
            superclass,
            instance_fields,
            static_fields,
            statics: RefCell::new(statics),
        }
    }

    /// Immutable view of the live static values, parallel to
    /// `static_fields`.
    pub fn statics(&self) -> Ref<'_, Vec<Value>> {
        self.statics.borrow()
    }

    /// Mutable view of the live static values.
    pub fn statics_mut(&self) -> RefMut<'_, Vec<Value>> {
        self.statics.borrow_mut()
    }

    /// Index of a direct static field by name.
    pub fn static_index(&self, field: &str) -> Result<usize> {
        self.static_fields
            .iter()
            .position(|descriptor| descriptor.name == field)
            .ok_or_else(|| {
                HeapError::Internal(format!("No static field `{field}` on class {}", self.name))
            })
    }
}

/// Deterministically ordered collection of all registered class shapes.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<Rc<ClassShape>>,
    by_name: HashMap<String, Rc<ClassShape>>,
    layout_cache: RefCell<HashMap<String, Rc<[FieldDescriptor]>>>,
}

impl ClassRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shape. Superclasses must already be present; duplicate
    /// names are a configuration error.
    pub fn register(&mut self, shape: ClassShape) -> Result<Rc<ClassShape>> {
        if self.by_name.contains_key(&shape.name) {
            return Err(HeapError::Internal(format!(
                "Class {} registered twice",
                shape.name
            )));
        }
        if let Some(superclass) = &shape.superclass {
            if !self.by_name.contains_key(superclass) {
                return Err(HeapError::Internal(format!(
                    "Class {} registered before its superclass {superclass}",
                    shape.name
                )));
            }
        }
        let shape = Rc::new(shape);
        self.classes.push(shape.clone());
        self.by_name.insert(shape.name.clone(), shape.clone());
        Ok(shape)
    }

    /// All shapes in registration order: the canonical statics walk order.
    pub fn classes(&self) -> &[Rc<ClassShape>] {
        &self.classes
    }

    /// Shape lookup by name.
    pub fn get(&self, name: &str) -> Result<Rc<ClassShape>> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| HeapError::Internal(format!("Unknown class {name}")))
    }

    /// Flattened instance layout for a class: superclass fields first, then
    /// each subclass's direct fields, cached after the first request.
    pub fn instance_layout(&self, name: &str) -> Result<Rc<[FieldDescriptor]>> {
        if let Some(layout) = self.layout_cache.borrow().get(name) {
            return Ok(layout.clone());
        }

        let mut chain = Vec::new();
        let mut cursor = Some(name.to_string());
        while let Some(class_name) = cursor {
            let shape = self.get(&class_name)?;
            cursor = shape.superclass.clone();
            chain.push(shape);
        }
        chain.reverse();

        let mut flattened = Vec::new();
        for shape in chain {
            flattened.extend(shape.instance_fields.iter().cloned());
        }
        let layout: Rc<[FieldDescriptor]> = flattened.into();
        self.layout_cache
            .borrow_mut()
            .insert(name.to_string(), layout.clone());
        Ok(layout)
    }

    /// Slot index of an instance field (hierarchy-flattened) by name.
    pub fn field_index(&self, type_name: &str, field: &str) -> Result<usize> {
        let layout = self.instance_layout(type_name)?;
        layout
            .iter()
            .position(|descriptor| descriptor.name == field)
            .ok_or_else(|| {
                HeapError::Internal(format!("No field `{field}` on class {type_name}"))
            })
    }

    /// Default field vector for a fresh or stub instance of `type_name`.
    pub fn default_fields(&self, type_name: &str) -> Result<Vec<Value>> {
        let layout = self.instance_layout(type_name)?;
        Ok(layout
            .iter()
            .map(|descriptor| Value::default_for(descriptor.kind))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn layout_flattens_superclass_first() {
        let mut registry = ClassRegistry::new();
        registry
            .register(ClassShape::new(
                "demo.Base",
                None,
                vec![FieldDescriptor::new("base_count", FieldKind::Int)],
                vec![],
            ))
            .unwrap();
        registry
            .register(ClassShape::new(
                "demo.Derived",
                Some("demo.Base".into()),
                vec![
                    FieldDescriptor::new("next", FieldKind::Ref),
                    FieldDescriptor::new("flag", FieldKind::Byte),
                ],
                vec![],
            ))
            .unwrap();

        let layout = registry.instance_layout("demo.Derived").unwrap();
        let names: Vec<&str> = layout.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["base_count", "next", "flag"]);
        // Cached: second request returns the same allocation.
        let again = registry.instance_layout("demo.Derived").unwrap();
        assert!(Rc::ptr_eq(
            &(layout as Rc<[FieldDescriptor]>),
            &(again as Rc<[FieldDescriptor]>)
        ));
    }

    #[test]
    fn superclass_must_precede_subclass() {
        let mut registry = ClassRegistry::new();
        let err = registry
            .register(ClassShape::new(
                "demo.Orphan",
                Some("demo.Missing".into()),
                vec![],
                vec![],
            ))
            .unwrap_err();
        assert!(matches!(err, HeapError::Internal(_)));
    }

    #[test]
    fn statics_initialize_to_kind_defaults() {
        let shape = ClassShape::new(
            "demo.Main",
            None,
            vec![],
            vec![
                FieldDescriptor::new("counter", FieldKind::Long),
                FieldDescriptor::new("head", FieldKind::Ref),
            ],
        );
        let statics = shape.statics();
        assert!(matches!(statics[0], Value::Long(0)));
        assert!(matches!(statics[1], Value::Ref(None)));
    }
}
