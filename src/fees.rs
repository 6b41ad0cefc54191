//! The metering seam.
//!
//! The engine never decides *how much* a read or write costs; it only
//! measures billable sizes and reports them here, once per logical block
//! (statics) or once per instance. A processor may raise
//! [`HeapError::OutOfEnergy`], which the engine propagates as a frame abort
//! before any storage write is made permanent.
//!
//! Implementations must tolerate zero sizes without raising.
//!
//! [`HeapError::OutOfEnergy`]: crate::error::HeapError::OutOfEnergy

use crate::error::Result;

/// Pure observer of billable persistence traffic.
///
/// The `storage` family covers durable reads/writes; the `heap` family
/// covers the in-memory traffic of reentrant frames (capture and commit
/// move object state between caller and callee space without touching
/// storage, but that movement is still metered).
pub trait FeeProcessor {
    /// Statics block loaded from durable storage.
    fn read_static_data_from_storage(&self, byte_size: u64) -> Result<()>;
    /// Statics block written to durable storage.
    fn write_static_data_to_storage(&self, byte_size: u64) -> Result<()>;
    /// Statics block captured from the live heap (reentrant frame entry).
    fn read_static_data_from_heap(&self, byte_size: u64) -> Result<()>;
    /// Statics block written back to the live heap (reentrant commit).
    fn write_static_data_to_heap(&self, byte_size: u64) -> Result<()>;
    /// One instance loaded from durable storage.
    fn read_one_instance_from_storage(&self, byte_size: u64) -> Result<()>;
    /// One instance written to durable storage.
    fn write_one_instance_to_storage(&self, byte_size: u64) -> Result<()>;
    /// One instance faulted across the frame boundary (caller to callee).
    fn read_one_instance_from_heap(&self, byte_size: u64) -> Result<()>;
    /// One instance committed across the frame boundary (callee to caller).
    fn write_one_instance_to_heap(&self, byte_size: u64) -> Result<()>;
}

/// A fee processor that observes nothing and never raises.
///
/// Useful for tooling and for tests that exercise the persistence paths
/// without a metering policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFeeProcessor;

impl FeeProcessor for NullFeeProcessor {
    fn read_static_data_from_storage(&self, _byte_size: u64) -> Result<()> {
        Ok(())
    }
    fn write_static_data_to_storage(&self, _byte_size: u64) -> Result<()> {
        Ok(())
    }
    fn read_static_data_from_heap(&self, _byte_size: u64) -> Result<()> {
        Ok(())
    }
    fn write_static_data_to_heap(&self, _byte_size: u64) -> Result<()> {
        Ok(())
    }
    fn read_one_instance_from_storage(&self, _byte_size: u64) -> Result<()> {
        Ok(())
    }
    fn write_one_instance_to_storage(&self, _byte_size: u64) -> Result<()> {
        Ok(())
    }
    fn read_one_instance_from_heap(&self, _byte_size: u64) -> Result<()> {
        Ok(())
    }
    fn write_one_instance_to_heap(&self, _byte_size: u64) -> Result<()> {
        Ok(())
    }
}
