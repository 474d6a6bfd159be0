//! Accelerator hardware abstraction.
//!
//! The physical register/kernel transport is an external collaborator: the
//! controller only needs positional kernel-argument assignment, an
//! asynchronous trigger with a blocking finish-wait, and word-granular
//! register access. Buffer synchronization goes through a separate DMA
//! trait so buffers do not depend on the kernel-launch surface.

use crate::error::Result;
use crate::types::{DeviceAddr, RegVal};

/// One positional kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArg {
    /// 32-bit scalar argument.
    U32(u32),
    /// 64-bit scalar argument (physical addresses).
    U64(u64),
}

/// A single kernel invocation context.
///
/// Obtained from [`Accelerator::create_launch`], used exactly once: arguments
/// are assigned positionally, the kernel is triggered asynchronously, and the
/// completion-watcher blocks on [`wait_finished`](KernelLaunch::wait_finished).
///
/// Argument assignment and triggering are infallible by contract; hardware
/// faults surface only through the return-code register after the kernel
/// finishes.
pub trait KernelLaunch: Send {
    /// Assign the argument at `index`. The kernel interface is positional,
    /// not named.
    fn set_arg(&mut self, index: usize, arg: KernelArg);

    /// Trigger the kernel asynchronously. Returns immediately.
    fn start(&mut self);

    /// Block until the triggered invocation finishes.
    fn wait_finished(&mut self) -> Result<()>;
}

/// Opaque accelerator interface: register file plus kernel invocations.
pub trait Accelerator: Send + Sync {
    /// Read a register word at `offset`.
    fn read_register(&self, offset: u64) -> Result<RegVal>;

    /// Write a register word at `offset`.
    fn write_register(&self, offset: u64, value: RegVal) -> Result<()>;

    /// Create a fresh kernel invocation context.
    fn create_launch(&self) -> Box<dyn KernelLaunch>;
}

/// Host/device copy engine backing buffer synchronization.
pub trait DmaTransport: Send + Sync {
    /// Copy `data` from the host into device memory at `addr`.
    fn to_device(&self, addr: DeviceAddr, data: &[u8]) -> Result<()>;

    /// Copy from device memory at `addr` into `out`.
    fn from_device(&self, addr: DeviceAddr, out: &mut [u8]) -> Result<()>;

    /// Release device-side resources behind `addr`. Idempotent: releasing an
    /// already-released address is a no-op.
    fn release(&self, addr: DeviceAddr) -> Result<()>;
}
