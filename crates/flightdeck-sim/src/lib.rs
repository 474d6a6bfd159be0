//! # Flightdeck Sim
//!
//! Software-simulated accelerator backend: an in-process register file, a
//! flat device-memory arena, and a kernel emulator with configurable latency
//! and scripted return codes.
//!
//! The simulator exists to exercise the control layer without hardware. It
//! implements both [`Accelerator`](flightdeck_core::hal::Accelerator) for
//! the controller and [`DmaTransport`](flightdeck_core::hal::DmaTransport)
//! for buffers, and records a launch trace that tests use to check FIFO
//! ordering and the single-flight property.
//!
//! ```
//! use flightdeck_core::prelude::*;
//! use flightdeck_sim::SimAccelerator;
//! use std::sync::Arc;
//!
//! let accel = SimAccelerator::new();
//! let device = Device::new(Arc::new(accel.clone()));
//! let handle = device.start(Options::new(Scenario::Nop)).unwrap();
//! device.wait(handle);
//! assert!(device.test(handle));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod accelerator;
pub mod buffer;

pub use accelerator::{LaunchRecord, SimAccelerator, SimConfig};
pub use buffer::SimBuffer;
