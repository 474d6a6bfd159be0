//! # Flightdeck Core
//!
//! Submission-and-completion control layer for a single hardware accelerator
//! that runs exactly one kernel invocation at a time.
//!
//! Concurrently submitted operations are serialized into strict FIFO
//! execution order by a single-flight execution queue; each operation's
//! lifecycle is tracked from submission to completion behind a non-blocking
//! handle API, so callers can submit work, poll it, or block on it
//! independently of how many operations are in flight.
//!
//! ## Core Abstractions
//!
//! - [`Device`] - controller orchestrating submission, launch, and completion
//! - [`Options`] - immutable launch parameters for one operation
//! - [`Handle`] - opaque caller-visible token for a submitted request
//! - [`DeviceBuffer`] - host-mirrored, typed, and device-only memory regions
//! - [`Accelerator`] - the opaque register/kernel transport collaborator
//!
//! ## Example
//!
//! ```ignore
//! use flightdeck_core::prelude::*;
//!
//! let device = Device::new(accelerator);
//! let handle = device.start(Options::new(Scenario::Allreduce).with_count(1024))?;
//! device.wait(handle);
//! let retcode = device.get_retcode(handle)?;
//! device.free_request(handle);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod device;
pub mod error;
pub mod hal;
pub mod queue;
pub mod request;
pub mod types;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::buffer::{DeviceBuffer, DeviceOnlyBuffer, HostBuffer};
    pub use crate::device::{Device, DeviceMetrics};
    pub use crate::error::{FlightdeckError, Result};
    pub use crate::hal::{Accelerator, DmaTransport, KernelArg, KernelLaunch};
    pub use crate::queue::ExecQueue;
    pub use crate::request::{Options, Request};
    pub use crate::types::{
        compression, stream, CfgFunction, DataType, DeviceAddr, Handle, OperationStatus,
        ReduceFunction, RegVal, Scenario, WaitStatus, RETCODE_OFFSET, TAG_ANY,
    };
}

// Re-exports for convenience
pub use buffer::{DeviceBuffer, DeviceOnlyBuffer, HostBuffer};
pub use device::{Device, DeviceMetrics};
pub use error::{FlightdeckError, Result};
pub use hal::{Accelerator, DmaTransport, KernelArg, KernelLaunch};
pub use queue::ExecQueue;
pub use request::{Options, Request};
pub use types::{
    CfgFunction, DataType, DeviceAddr, Handle, OperationStatus, ReduceFunction, RegVal, Scenario,
    WaitStatus, RETCODE_OFFSET, TAG_ANY,
};
