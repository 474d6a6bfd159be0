//! Error types for the flightdeck control layer.

use thiserror::Error;

use crate::types::Handle;

/// Result type used throughout flightdeck.
pub type Result<T> = std::result::Result<T, FlightdeckError>;

/// Errors produced by the control layer.
///
/// Hardware faults are deliberately absent from this taxonomy: a bad return
/// code from the accelerator is surfaced verbatim through
/// [`retcode`](crate::device::Device::get_retcode) and interpreting it is the
/// caller's responsibility.
#[derive(Debug, Error)]
pub enum FlightdeckError {
    /// Request chaining was requested but this controller does not support it.
    #[error("request chaining is not supported ({prerequisites} prerequisite request(s) given)")]
    UnsupportedOperation {
        /// Number of prerequisite handles in `Options::waitfor`.
        prerequisites: usize,
    },

    /// Buffer slice bounds fall outside the buffer.
    #[error("slice range {start}..{end} out of range for buffer of length {len}")]
    OutOfRange {
        /// Start of the requested range, in elements.
        start: usize,
        /// End of the requested range, in elements.
        end: usize,
        /// Length of the buffer, in elements.
        len: usize,
    },

    /// Buffer slice range is inverted.
    #[error("invalid slice range: start {start} > end {end}")]
    InvalidRange {
        /// Start of the requested range.
        start: usize,
        /// End of the requested range.
        end: usize,
    },

    /// Element type tag does not match the host element size.
    #[error("datatype mismatch: {dtype} is {expected} byte(s) per element, host element is {actual} byte(s)")]
    DatatypeMismatch {
        /// The device datatype tag supplied.
        dtype: crate::types::DataType,
        /// Byte size implied by the tag.
        expected: usize,
        /// Byte size of the host element type.
        actual: usize,
    },

    /// A buffer was synchronized after its device resources were freed.
    #[error("buffer used after free (device address {addr:#x})")]
    UseAfterFree {
        /// Device address of the freed buffer.
        addr: u64,
    },

    /// Handle does not name a live request.
    #[error("unknown request handle {0}")]
    UnknownHandle(Handle),

    /// Return code queried before the request completed.
    #[error("return code not available: request {0} has not completed")]
    RetcodeUnavailable(Handle),

    /// Controller is shutting down; no new submissions are accepted.
    #[error("controller is shutting down")]
    ShuttingDown,

    /// Accelerator interface failure (register access or kernel transport).
    #[error("accelerator error: {0}")]
    Accelerator(String),

    /// Host/device transfer failure.
    #[error("transfer failed: {0}")]
    TransferFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_context() {
        let err = FlightdeckError::OutOfRange {
            start: 4,
            end: 12,
            len: 8,
        };
        assert_eq!(
            err.to_string(),
            "slice range 4..12 out of range for buffer of length 8"
        );

        let err = FlightdeckError::UnknownHandle(Handle::from_raw(7));
        assert!(err.to_string().contains('7'));
    }
}
