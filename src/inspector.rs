//! Tools for inspecting a persisted object graph.
//! Useful for debugging shape layouts and billing verification.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{HeapError, Result};
use crate::extent::{ExtentDecoder, REFERENCE_COST};
use crate::node::Node;
use crate::object::{ClassRegistry, FieldKind};
use crate::store::GraphStore;

/// A structural report of one persisted graph image.
#[derive(Debug, Serialize)]
pub struct HeapReport {
    /// Billable size of the statics block.
    pub statics_size: u64,
    /// Instances present in the image.
    pub instance_count: usize,
    /// Billable size of the whole image, statics included.
    pub total_billable: u64,
    /// Per-type breakdown, sorted by type name.
    pub types: Vec<TypeInfo>,
}

/// Aggregated footprint of one instance type.
#[derive(Debug, Serialize)]
pub struct TypeInfo {
    /// Fully qualified type name.
    pub type_name: String,
    /// Number of persisted instances.
    pub count: usize,
    /// Primitive payload bytes across all instances.
    pub data_bytes: u64,
    /// Reference slots across all instances.
    pub reference_slots: u64,
}

impl TypeInfo {
    /// Billable size of this type's instances.
    pub fn billable(&self) -> u64 {
        self.data_bytes + REFERENCE_COST * self.reference_slots
    }
}

/// The graph inspector tool.
#[derive(Debug)]
pub struct HeapInspector;

impl HeapInspector {
    /// Walks a store's persisted image against the registry's shapes and
    /// returns a structural report. An empty store reports all zeroes.
    pub fn inspect(store: &dyn GraphStore, classes: &ClassRegistry) -> Result<HeapReport> {
        let Some(image) = store.root()? else {
            return Ok(HeapReport {
                statics_size: 0,
                instance_count: 0,
                total_billable: 0,
                types: Vec::new(),
            });
        };
        let mut dec = ExtentDecoder::new(&image);

        let mut statics_size = 0u64;
        for shape in classes.classes() {
            for descriptor in &shape.static_fields {
                match descriptor.kind {
                    FieldKind::Ref => {
                        dec.decode_reference()?;
                        statics_size += REFERENCE_COST;
                    }
                    primitive => {
                        dec.skip_data(primitive.data_width())?;
                        statics_size += primitive.data_width() as u64;
                    }
                }
            }
        }

        let mut buckets: BTreeMap<String, TypeInfo> = BTreeMap::new();
        let mut instance_count = 0usize;
        loop {
            let header = match dec.decode_reference() {
                Ok(header) => header,
                Err(HeapError::Underflow) => break,
                Err(other) => return Err(other),
            };
            let Some(node) = header else {
                return Err(HeapError::Corrupt("Null reference as instance header".into()));
            };
            let Node::Regular { type_name, .. } = node.as_ref() else {
                return Err(HeapError::Corrupt(format!(
                    "Instance header is not a regular node: {node}"
                )));
            };

            let layout = classes.instance_layout(type_name)?;
            let mut data_bytes = 0u64;
            let mut reference_slots = 0u64;
            for descriptor in layout.iter() {
                match descriptor.kind {
                    FieldKind::Ref => {
                        dec.decode_reference()?;
                        reference_slots += 1;
                    }
                    primitive => {
                        dec.skip_data(primitive.data_width())?;
                        data_bytes += primitive.data_width() as u64;
                    }
                }
            }

            let bucket = buckets
                .entry(type_name.clone())
                .or_insert_with(|| TypeInfo {
                    type_name: type_name.clone(),
                    count: 0,
                    data_bytes: 0,
                    reference_slots: 0,
                });
            bucket.count += 1;
            bucket.data_bytes += data_bytes;
            bucket.reference_slots += reference_slots;
            instance_count += 1;
        }

        let types: Vec<TypeInfo> = buckets.into_values().collect();
        let total_billable = statics_size + types.iter().map(TypeInfo::billable).sum::<u64>();
        Ok(HeapReport {
            statics_size,
            instance_count,
            total_billable,
            types,
        })
    }
}

impl std::fmt::Display for HeapReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== SHADOWHEAP INSPECTOR REPORT ===")?;
        writeln!(f, "Statics:        {}b", self.statics_size)?;
        writeln!(f, "Instances:      {}", self.instance_count)?;
        writeln!(f, "Total billable: {}b", self.total_billable)?;
        writeln!(f, "\n[TYPE LAYOUT]")?;
        for (i, info) in self.types.iter().enumerate() {
            let connector = if i == self.types.len() - 1 {
                "└── "
            } else {
                "├── "
            };
            writeln!(
                f,
                "{}[{}] Count: {} | Data: {}b | Refs: {} | Billable: {}b",
                connector,
                info.type_name,
                info.count,
                info.data_bytes,
                info.reference_slots,
                info.billable()
            )?;
        }
        Ok(())
    }
}
