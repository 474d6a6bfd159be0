//! Common types and wire encodings for the accelerator interface.
//!
//! The kernel interface is positional, so the numeric values of the enums in
//! this module are part of the device contract and must not be reordered.

use std::fmt;

/// Device-side physical address.
pub type DeviceAddr = u64;

/// Register word, as read from or written to the accelerator register file.
pub type RegVal = u32;

/// Well-known offset of the return-code register, read after kernel finish.
pub const RETCODE_OFFSET: u64 = 0x1FFC;

/// Tag value matching any tag.
pub const TAG_ANY: u32 = u32::MAX;

/// Datatype of buffer elements on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    /// 16-bit IEEE float.
    Float16 = 0,
    /// 32-bit IEEE float.
    Float32 = 1,
    /// 64-bit IEEE float.
    Float64 = 2,
    /// 32-bit signed integer.
    Int32 = 3,
    /// 64-bit signed integer.
    Int64 = 4,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_of(self) -> usize {
        match self {
            DataType::Float16 => 2,
            DataType::Float32 | DataType::Int32 => 4,
            DataType::Float64 | DataType::Int64 => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Float16 => "float16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
        };
        f.write_str(name)
    }
}

/// Operation scenario selector, encoded as the first kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Scenario {
    /// Configuration call; the function selector names a [`CfgFunction`].
    Config = 0,
    /// Element-wise combine of two operands.
    Combine = 1,
    /// Point-to-point send.
    Send = 2,
    /// Point-to-point receive.
    Recv = 3,
    /// Broadcast from root.
    Bcast = 4,
    /// Scatter from root.
    Scatter = 5,
    /// Gather to root.
    Gather = 6,
    /// All-gather.
    Allgather = 7,
    /// Reduce to root.
    Reduce = 8,
    /// All-reduce.
    Allreduce = 9,
    /// Reduce-scatter.
    ReduceScatter = 10,
    /// Barrier.
    Barrier = 11,
    /// All-to-all personalized exchange.
    Alltoall = 12,
    /// No operation.
    Nop = 255,
}

/// Configuration function selector, used when the scenario is [`Scenario::Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CfgFunction {
    /// Reset peripherals.
    Reset = 0,
    /// Enable packetizer.
    EnablePkt = 1,
    /// Set operation timeout.
    SetTimeout = 2,
    /// Open a network port.
    OpenPort = 3,
    /// Open a connection.
    OpenCon = 4,
    /// Select the network stack type.
    SetStackType = 5,
    /// Set the maximum transfer segment size.
    SetMaxSegmentSize = 6,
    /// Close a connection.
    CloseCon = 7,
}

/// Reduction function selector, used for every non-config scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ReduceFunction {
    /// Element-wise sum.
    Sum = 0,
    /// Element-wise maximum.
    Max = 1,
}

/// Operand compression flag bits.
pub mod compression {
    /// No operand is compressed.
    pub const NONE: u32 = 0;
    /// Operand 0 is compressed.
    pub const OP0_COMPRESSED: u32 = 1 << 0;
    /// Operand 1 is compressed.
    pub const OP1_COMPRESSED: u32 = 1 << 1;
    /// Result is compressed.
    pub const RES_COMPRESSED: u32 = 1 << 2;
}

/// Operand streaming flag bits.
pub mod stream {
    /// No operand is streamed.
    pub const NONE: u32 = 0;
    /// Operand 0 arrives from a stream instead of memory.
    pub const OP0_STREAM: u32 = 1 << 0;
    /// Result departs to a stream instead of memory.
    pub const RES_STREAM: u32 = 1 << 1;
}

/// Opaque caller-visible token identifying a request within one controller.
///
/// Handles are unique per live request and are invalidated by
/// [`free_request`](crate::device::Device::free_request); they are never
/// reused while the controller lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Construct a handle from its raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    /// The raw token value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a request.
///
/// Transitions are strictly `Queued -> Executing -> Completed`; no state is
/// skipped and no transition reverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// Enqueued, waiting for launch admission.
    Queued,
    /// Holds the admission permit and is running on the accelerator.
    Executing,
    /// Finished; the return code is valid.
    Completed,
}

/// Outcome of a timed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The request completed within the timeout.
    Completed,
    /// The timeout expired first. The request keeps making progress.
    TimedOut,
}
