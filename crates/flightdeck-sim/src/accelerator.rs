//! Simulated accelerator: register file, device-memory arena, and a kernel
//! emulator with configurable latency and scripted return codes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use flightdeck_core::error::{FlightdeckError, Result};
use flightdeck_core::hal::{Accelerator, DmaTransport, KernelArg, KernelLaunch};
use flightdeck_core::types::{DeviceAddr, RegVal, RETCODE_OFFSET};

/// Base address of the simulated device-memory arena.
const ARENA_BASE: DeviceAddr = 0x10_0000;

/// Allocation alignment within the arena.
const ARENA_ALIGN: usize = 64;

/// Configuration for the simulated accelerator.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Emulated kernel execution time.
    pub kernel_latency: Duration,
    /// Return code produced when no scripted code is queued.
    pub default_retcode: RegVal,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            kernel_latency: Duration::ZERO,
            default_retcode: 0,
        }
    }
}

impl SimConfig {
    /// Set the emulated kernel execution time.
    pub fn with_kernel_latency(mut self, latency: Duration) -> Self {
        self.kernel_latency = latency;
        self
    }

    /// Set the default return code.
    pub fn with_default_retcode(mut self, retcode: RegVal) -> Self {
        self.default_retcode = retcode;
        self
    }
}

/// One recorded kernel launch, in execution order.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    /// Zero-based execution sequence number.
    pub seq: u64,
    /// Positional arguments as assigned before the trigger.
    pub args: Vec<KernelArg>,
    /// Execution start timestamp.
    pub started_at: Instant,
}

struct Arena {
    bytes: Vec<u8>,
    next: usize,
    released: HashSet<DeviceAddr>,
}

struct SimState {
    config: SimConfig,
    registers: Mutex<HashMap<u64, RegVal>>,
    arena: Mutex<Arena>,
    scripted: Mutex<VecDeque<RegVal>>,
    trace: Mutex<Vec<LaunchRecord>>,
    /// Kernels currently executing. The hardware contract is one at a time;
    /// `max_active` records the worst observed concurrency so tests can
    /// check the single-flight property.
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl SimState {
    fn begin_launch(&self, args: Vec<KernelArg>) {
        let now = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        let mut max = self.max_active.load(Ordering::Relaxed);
        while now > max {
            match self.max_active.compare_exchange_weak(
                max,
                now,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => max = current,
            }
        }

        let mut trace = self.trace.lock();
        let seq = trace.len() as u64;
        trace.push(LaunchRecord {
            seq,
            args,
            started_at: Instant::now(),
        });
        trace!(seq, "simulated kernel started");
    }

    fn finish_launch(&self) -> RegVal {
        std::thread::sleep(self.config.kernel_latency);
        let retcode = self
            .scripted
            .lock()
            .pop_front()
            .unwrap_or(self.config.default_retcode);
        self.registers.lock().insert(RETCODE_OFFSET, retcode);
        self.active.fetch_sub(1, Ordering::AcqRel);
        trace!(retcode, "simulated kernel finished");
        retcode
    }
}

/// In-process software stand-in for the accelerator.
///
/// Cloning is cheap and shares the device state, so the same instance can
/// serve as the controller's [`Accelerator`] and as the buffers'
/// [`DmaTransport`].
#[derive(Clone)]
pub struct SimAccelerator {
    state: Arc<SimState>,
}

impl Default for SimAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimAccelerator {
    /// Simulated accelerator with default configuration.
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    /// Simulated accelerator with the given configuration.
    pub fn with_config(config: SimConfig) -> Self {
        debug!(latency = ?config.kernel_latency, "simulated accelerator created");
        Self {
            state: Arc::new(SimState {
                config,
                registers: Mutex::new(HashMap::new()),
                arena: Mutex::new(Arena {
                    bytes: Vec::new(),
                    next: 0,
                    released: HashSet::new(),
                }),
                scripted: Mutex::new(VecDeque::new()),
                trace: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }),
        }
    }

    /// Allocate `bytes` of simulated device memory and return its address.
    ///
    /// Device allocation is the caller's responsibility in the buffer model;
    /// this is the simulation's stand-in for the external allocator.
    pub fn alloc(&self, bytes: usize) -> DeviceAddr {
        let mut arena = self.state.arena.lock();
        let offset = (arena.next + ARENA_ALIGN - 1) & !(ARENA_ALIGN - 1);
        arena.next = offset + bytes;
        let needed = arena.next;
        if arena.bytes.len() < needed {
            arena.bytes.resize(needed, 0);
        }
        ARENA_BASE + offset as DeviceAddr
    }

    /// Queue return codes for the next kernel launches, in order.
    pub fn script_retcodes<I: IntoIterator<Item = RegVal>>(&self, codes: I) {
        self.state.scripted.lock().extend(codes);
    }

    /// Every recorded launch, in execution order.
    pub fn launch_trace(&self) -> Vec<LaunchRecord> {
        self.state.trace.lock().clone()
    }

    /// Number of kernels launched so far.
    pub fn launches(&self) -> u64 {
        self.state.trace.lock().len() as u64
    }

    /// Worst observed number of concurrently executing kernels. Stays at 1
    /// under a correct controller.
    pub fn max_concurrent_kernels(&self) -> usize {
        self.state.max_active.load(Ordering::Acquire)
    }

    fn arena_range(&self, addr: DeviceAddr, len: usize) -> Result<usize> {
        let arena = self.state.arena.lock();
        let end = arena.bytes.len() as DeviceAddr + ARENA_BASE;
        if addr < ARENA_BASE || addr + len as DeviceAddr > end {
            return Err(FlightdeckError::TransferFailed(format!(
                "address range {:#x}+{} outside simulated device memory",
                addr, len
            )));
        }
        Ok((addr - ARENA_BASE) as usize)
    }
}

impl Accelerator for SimAccelerator {
    fn read_register(&self, offset: u64) -> Result<RegVal> {
        Ok(self.state.registers.lock().get(&offset).copied().unwrap_or(0))
    }

    fn write_register(&self, offset: u64, value: RegVal) -> Result<()> {
        self.state.registers.lock().insert(offset, value);
        Ok(())
    }

    fn create_launch(&self) -> Box<dyn KernelLaunch> {
        Box::new(SimLaunch {
            state: Arc::clone(&self.state),
            args: Vec::new(),
            started: false,
        })
    }
}

impl DmaTransport for SimAccelerator {
    fn to_device(&self, addr: DeviceAddr, data: &[u8]) -> Result<()> {
        let offset = self.arena_range(addr, data.len())?;
        let mut arena = self.state.arena.lock();
        arena.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn from_device(&self, addr: DeviceAddr, out: &mut [u8]) -> Result<()> {
        let offset = self.arena_range(addr, out.len())?;
        let arena = self.state.arena.lock();
        out.copy_from_slice(&arena.bytes[offset..offset + out.len()]);
        Ok(())
    }

    fn release(&self, addr: DeviceAddr) -> Result<()> {
        // Bookkeeping only; arena space is not recycled.
        self.state.arena.lock().released.insert(addr);
        Ok(())
    }
}

struct SimLaunch {
    state: Arc<SimState>,
    args: Vec<KernelArg>,
    started: bool,
}

impl KernelLaunch for SimLaunch {
    fn set_arg(&mut self, index: usize, arg: KernelArg) {
        if self.args.len() <= index {
            self.args.resize(index + 1, KernelArg::U32(0));
        }
        self.args[index] = arg;
    }

    fn start(&mut self) {
        assert!(!self.started, "kernel invocation triggered twice");
        self.started = true;
        self.state.begin_launch(self.args.clone());
    }

    fn wait_finished(&mut self) -> Result<()> {
        if !self.started {
            return Err(FlightdeckError::Accelerator(
                "kernel invocation was never started".to_string(),
            ));
        }
        self.state.finish_launch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_aligned_and_monotonic() {
        let accel = SimAccelerator::new();
        let a = accel.alloc(100);
        let b = accel.alloc(16);
        assert_eq!(a, ARENA_BASE);
        assert_eq!(a % ARENA_ALIGN as DeviceAddr, 0);
        assert_eq!(b % ARENA_ALIGN as DeviceAddr, 0);
        assert!(b >= a + 100);
    }

    #[test]
    fn dma_round_trip() {
        let accel = SimAccelerator::new();
        let addr = accel.alloc(8);
        accel.to_device(addr, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let mut out = [0u8; 8];
        accel.from_device(addr, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn dma_rejects_out_of_arena_ranges() {
        let accel = SimAccelerator::new();
        let addr = accel.alloc(8);
        assert!(accel.to_device(addr, &[0u8; 16]).is_err());
        assert!(accel.to_device(0x10, &[0u8; 4]).is_err());
    }

    #[test]
    fn launch_records_args_and_retcode() {
        let accel = SimAccelerator::new();
        accel.script_retcodes([7]);

        let mut launch = accel.create_launch();
        launch.set_arg(0, KernelArg::U32(9));
        launch.set_arg(2, KernelArg::U64(0xBEEF));
        launch.start();
        launch.wait_finished().unwrap();

        assert_eq!(accel.read_register(RETCODE_OFFSET).unwrap(), 7);
        let trace = accel.launch_trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].seq, 0);
        assert_eq!(trace[0].args[0], KernelArg::U32(9));
        assert_eq!(trace[0].args[1], KernelArg::U32(0));
        assert_eq!(trace[0].args[2], KernelArg::U64(0xBEEF));
    }

    #[test]
    fn scripted_retcodes_drain_in_order() {
        let accel = SimAccelerator::new();
        accel.script_retcodes([3, 4]);

        for expected in [3, 4, 0] {
            let mut launch = accel.create_launch();
            launch.start();
            launch.wait_finished().unwrap();
            assert_eq!(accel.read_register(RETCODE_OFFSET).unwrap(), expected);
        }
    }

    #[test]
    fn wait_before_start_is_an_error() {
        let accel = SimAccelerator::new();
        let mut launch = accel.create_launch();
        assert!(launch.wait_finished().is_err());
    }

    #[test]
    fn release_is_idempotent() {
        let accel = SimAccelerator::new();
        let addr = accel.alloc(4);
        accel.release(addr).unwrap();
        accel.release(addr).unwrap();
    }
}
