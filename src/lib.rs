//! # Shadowheap
//!
//! A managed object-graph persistence and reentrant-isolation engine for a
//! sandboxed, metered execution environment. Shadowheap keeps a contract-style
//! program's statics and object graph durable across invocations, loads
//! instances lazily on first touch, bills every storage and heap transfer
//! through a pluggable fee processor, and isolates reentrant calls behind
//! copy-on-entry frames that commit atomically or revert completely.
//!
//! ## Overview
//!
//! Shadowheap is not a general-purpose serializer. The wire format is
//! bit-exact and hand-written, field layouts come from explicit class shape
//! tables rather than reflection or derive macros, and every byte that moves
//! is accounted for. The engine is single-threaded and cooperative by design:
//! storage faults are synchronous, and isolation comes from frame discipline
//! rather than locks.
//!
//! ### Key Features
//!
//! *   **Lazy Loading:** Objects materialize as unpopulated stubs; field data
//!     is faulted in exactly once, on first access, through one hook.
//! *   **Dirty-Write Avoidance:** A reloaded-then-resaved instance whose
//!     re-encoded extent equals the stored original skips the physical write
//!     and its billing. Pointer-canonical reference nodes make the comparison
//!     cheap and exact.
//! *   **Reentrant Frames:** Inner calls run against callee-space copies of
//!     the caller's state. Reverts are total; commits are billed in a dry run
//!     first and applied only if the budget holds.
//! *   **Deterministic Billing:** Reference slots cost a fixed abstract size
//!     independent of their encoded width, so fee schedules survive storage
//!     format changes.
//!
//! ## Architecture
//!
//! Three codec layers sit under one orchestrator:
//!
//! - the primitive codec ([`codec`]) moves big-endian scalars;
//! - the structure codec ([`structure`]) walks class shapes, splitting
//!   primitives from reference slots and discovering reachable instances
//!   through a frontier queue;
//! - the loopback codec ([`loopback`]) runs the same field walk against an
//!   in-memory value queue for frame backup, heap-to-heap copy, and pure
//!   size measurement.
//!
//! The [`ShadowHeap`] manager owns the session state (interning tables,
//! loaded-roots set, frame stack) and orchestrates graph load and save
//! against a [`GraphStore`] backend, billing through a [`FeeProcessor`].
//!
//! ### Safety and Error Handling
//!
//! * **No Unsafe:** the crate forbids `unsafe` entirely.
//! * **No Panics:** no `unwrap()` or `panic!()` in library code (enforced by
//!   clippy lints). All failures surface as a [`HeapError`].
//! * **Fatal by Default:** corruption and shape violations are never retried;
//!   the only expected runtime failure is [`HeapError::OutOfEnergy`], raised
//!   before any permanent mutation.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod codec;
pub mod error;
pub mod extent;
pub mod fees;
pub mod inspector;
pub mod loopback;
pub mod manager;
pub mod node;
pub mod object;
pub mod reentrant;
pub mod store;
pub mod structure;

// --- RE-EXPORTS ---

pub use error::{HeapError, Result};
pub use extent::{Extent, REFERENCE_COST};
pub use fees::{FeeProcessor, NullFeeProcessor};
pub use inspector::{HeapInspector, HeapReport};
pub use manager::ShadowHeap;
pub use node::{Node, NodeFactory};
pub use object::{
    ClassRegistry, ClassShape, ConstantRegistry, FieldDescriptor, FieldKind, LoadState, Loader,
    ObjHandle, ShadowObject, Token, Value,
};
pub use reentrant::{FrameMaps, ReentrantFrame, object_uses_reentrant_copy};
pub use store::{GraphStore, MemoryGraphStore};
