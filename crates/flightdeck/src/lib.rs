//! # Flightdeck
//!
//! Submission-and-completion control for a single hardware accelerator that
//! runs exactly one kernel invocation at a time.
//!
//! This facade re-exports the control layer from `flightdeck-core` and the
//! software-simulated backend from `flightdeck-sim`.
//!
//! ```
//! use flightdeck::prelude::*;
//! use std::sync::Arc;
//!
//! let accel = SimAccelerator::new();
//! let device = Device::new(Arc::new(accel.clone()));
//!
//! let handle = device
//!     .start(Options::new(Scenario::Allreduce).with_count(1024))
//!     .unwrap();
//! device.wait(handle);
//! let retcode = device.get_retcode(handle).unwrap();
//! assert_eq!(retcode, 0);
//! device.free_request(handle);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use flightdeck_core::*;
pub use flightdeck_sim::{LaunchRecord, SimAccelerator, SimBuffer, SimConfig};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use flightdeck_core::prelude::*;
    pub use flightdeck_sim::{LaunchRecord, SimAccelerator, SimBuffer, SimConfig};
}
