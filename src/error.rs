//! Centralized error handling for Shadowheap.
//!
//! The engine strictly avoids panics: every failure condition is propagated
//! through the [`Result`] type, enforced by `#![deny(clippy::panic)]` and
//! `#![deny(clippy::unwrap_used)]` at the crate root.
//!
//! ## Taxonomy
//!
//! Failures split into two families:
//!
//! - **Expected** conditions the engine is designed to handle:
//!   [`HeapError::Underflow`] is used exactly once as an end-of-sequence
//!   sentinel while discovering instances in a persisted graph image, and
//!   [`HeapError::OutOfEnergy`] is the one failure a commit dry run is
//!   allowed to surface (the frame then reverts, never half-commits).
//! - **Fatal** conditions that indicate corruption or an upstream bug:
//!   [`HeapError::Corrupt`] (unknown discriminators, malformed streams) and
//!   [`HeapError::Internal`] (class-shape violations, protocol misuse).
//!   These abort the whole transaction and are never retried.
//!
//! ## Cloneability
//!
//! [`HeapError`] is `Clone` so an error captured mid-walk can be stored and
//! re-surfaced after cleanup (for example after restoring discovery markers).

use std::fmt;

/// A specialized `Result` type for Shadowheap operations.
pub type Result<T> = std::result::Result<T, HeapError>;

/// The master error enum covering all failure domains in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    /// A decoder ran past the end of its buffer or queue.
    ///
    /// Exactly one protocol treats this as expected control flow: the
    /// instance-discovery pass over a graph image stops on the first
    /// underflow of the reference cursor. Anywhere else, an underflow means
    /// the stream is truncated and the caller converts it to [`Corrupt`].
    ///
    /// [`Corrupt`]: HeapError::Corrupt
    Underflow,

    /// The stored byte stream is malformed: unknown node discriminator,
    /// invalid UTF-8 in a type name, or a version mismatch. Never recovered.
    Corrupt(String),

    /// The metering budget was exhausted.
    ///
    /// This is the only *expected* failure inside a reentrant commit. It is
    /// detected entirely during the dry-run phase, before any static field
    /// or instance extent is mutated, so the enclosing frame can revert
    /// atomically.
    OutOfEnergy(String),

    /// Logic error in the engine or a violated upstream contract (malformed
    /// class shapes, a persistence token set twice, handshake misuse).
    ///
    /// Should not occur in production; it indicates a bug in the engine or
    /// in the instrumentation pipeline feeding it, not a runtime condition.
    Internal(String),
}

impl HeapError {
    /// Returns true for the end-of-sequence sentinel.
    pub fn is_underflow(&self) -> bool {
        matches!(self, Self::Underflow)
    }

    /// Returns true for budget exhaustion.
    pub fn is_out_of_energy(&self) -> bool {
        matches!(self, Self::OutOfEnergy(_))
    }
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Underflow => write!(f, "Decode Underflow: read past end of stream"),
            Self::Corrupt(s) => write!(f, "Corrupt Stream: {s}"),
            Self::OutOfEnergy(s) => write!(f, "Out Of Energy: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for HeapError {}
