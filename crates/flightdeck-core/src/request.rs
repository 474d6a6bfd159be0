//! Launch options and the request lifecycle.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::buffer::DeviceBuffer;
use crate::hal::KernelArg;
use crate::types::{
    CfgFunction, DeviceAddr, Handle, OperationStatus, ReduceFunction, RegVal, Scenario, WaitStatus,
    TAG_ANY,
};

/// Immutable launch parameters for one operation.
///
/// Built with the `with_*` setters and frozen at submission; the controller
/// never mutates options after a request is constructed.
#[derive(Clone)]
pub struct Options {
    /// Operation scenario selector.
    pub scenario: Scenario,
    /// Element count of the operation.
    pub count: u32,
    /// Communicator id.
    pub comm: u32,
    /// Root, source, or destination id, depending on the scenario.
    pub root_src_dst: u32,
    /// Configuration function, used when `scenario` is [`Scenario::Config`].
    pub cfg_function: CfgFunction,
    /// Reduction function, used for every other scenario.
    pub reduce_function: ReduceFunction,
    /// Message tag.
    pub tag: u32,
    /// Device address of the arithmetic configuration block.
    pub arithcfg_addr: DeviceAddr,
    /// Operand compression flag bits ([`compression`](crate::types::compression)).
    pub compression_flags: u32,
    /// Operand streaming flag bits ([`stream`](crate::types::stream)).
    pub stream_flags: u32,
    /// First operand buffer, if any.
    pub addr_0: Option<Arc<dyn DeviceBuffer>>,
    /// Second operand buffer, if any.
    pub addr_1: Option<Arc<dyn DeviceBuffer>>,
    /// Result buffer, if any.
    pub addr_2: Option<Arc<dyn DeviceBuffer>>,
    /// Prerequisite requests. Chaining is not supported by this controller;
    /// a non-empty list is rejected at submission.
    pub waitfor: Vec<Handle>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            scenario: Scenario::Nop,
            count: 0,
            comm: 0,
            root_src_dst: 0,
            cfg_function: CfgFunction::Reset,
            reduce_function: ReduceFunction::Sum,
            tag: TAG_ANY,
            arithcfg_addr: 0,
            compression_flags: crate::types::compression::NONE,
            stream_flags: crate::types::stream::NONE,
            addr_0: None,
            addr_1: None,
            addr_2: None,
            waitfor: Vec::new(),
        }
    }
}

impl Options {
    /// Options for the given scenario, everything else default.
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            ..Self::default()
        }
    }

    /// Set the element count.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Set the communicator id.
    pub fn with_comm(mut self, comm: u32) -> Self {
        self.comm = comm;
        self
    }

    /// Set the root/source/destination id.
    pub fn with_root_src_dst(mut self, id: u32) -> Self {
        self.root_src_dst = id;
        self
    }

    /// Set the configuration function.
    pub fn with_cfg_function(mut self, f: CfgFunction) -> Self {
        self.cfg_function = f;
        self
    }

    /// Set the reduction function.
    pub fn with_reduce_function(mut self, f: ReduceFunction) -> Self {
        self.reduce_function = f;
        self
    }

    /// Set the message tag.
    pub fn with_tag(mut self, tag: u32) -> Self {
        self.tag = tag;
        self
    }

    /// Set the arithmetic configuration address.
    pub fn with_arithcfg_addr(mut self, addr: DeviceAddr) -> Self {
        self.arithcfg_addr = addr;
        self
    }

    /// Set the compression flag bits.
    pub fn with_compression_flags(mut self, flags: u32) -> Self {
        self.compression_flags = flags;
        self
    }

    /// Set the streaming flag bits.
    pub fn with_stream_flags(mut self, flags: u32) -> Self {
        self.stream_flags = flags;
        self
    }

    /// Set the operand buffers. `None` operands encode physical address 0.
    pub fn with_buffers(
        mut self,
        addr_0: Option<Arc<dyn DeviceBuffer>>,
        addr_1: Option<Arc<dyn DeviceBuffer>>,
        addr_2: Option<Arc<dyn DeviceBuffer>>,
    ) -> Self {
        self.addr_0 = addr_0;
        self.addr_1 = addr_1;
        self.addr_2 = addr_2;
        self
    }

    /// Name prerequisite requests to wait for.
    pub fn with_waitfor(mut self, waitfor: Vec<Handle>) -> Self {
        self.waitfor = waitfor;
        self
    }

    /// Encode these options as positional kernel arguments.
    ///
    /// The order is fixed by the kernel interface: scenario, count, comm,
    /// root/src/dst, function selector, tag, arithcfg address, compression
    /// flags, stream flags, then the three operand physical addresses.
    pub fn encode_args(&self) -> [KernelArg; 12] {
        let function = if self.scenario == Scenario::Config {
            self.cfg_function as u32
        } else {
            self.reduce_function as u32
        };
        let phys = |b: &Option<Arc<dyn DeviceBuffer>>| -> u64 {
            b.as_ref().map(|b| b.physical_address()).unwrap_or(0)
        };
        [
            KernelArg::U32(self.scenario as u32),
            KernelArg::U32(self.count),
            KernelArg::U32(self.comm),
            KernelArg::U32(self.root_src_dst),
            KernelArg::U32(function),
            KernelArg::U32(self.tag),
            KernelArg::U32(self.arithcfg_addr as u32),
            KernelArg::U32(self.compression_flags),
            KernelArg::U32(self.stream_flags),
            KernelArg::U64(phys(&self.addr_0)),
            KernelArg::U64(phys(&self.addr_1)),
            KernelArg::U64(phys(&self.addr_2)),
        ]
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phys = |b: &Option<Arc<dyn DeviceBuffer>>| b.as_ref().map(|b| b.physical_address());
        f.debug_struct("Options")
            .field("scenario", &self.scenario)
            .field("count", &self.count)
            .field("comm", &self.comm)
            .field("root_src_dst", &self.root_src_dst)
            .field("tag", &self.tag)
            .field("addr_0", &phys(&self.addr_0))
            .field("addr_1", &phys(&self.addr_1))
            .field("addr_2", &phys(&self.addr_2))
            .field("waitfor", &self.waitfor)
            .finish_non_exhaustive()
    }
}

struct RequestState {
    status: OperationStatus,
    retcode: Option<RegVal>,
}

/// One submitted operation: immutable options plus lifecycle state and a
/// one-shot broadcast completion notification.
///
/// A request belongs to exactly one execution queue for its entire active
/// lifetime. Status only ever moves `Queued -> Executing -> Completed`; the
/// queue's admission protocol drives the first transition, the
/// completion-watcher the second.
pub struct Request {
    options: Options,
    state: Mutex<RequestState>,
    done: Condvar,
}

impl Request {
    pub(crate) fn new(options: Options) -> Self {
        Self {
            options,
            state: Mutex::new(RequestState {
                status: OperationStatus::Queued,
                retcode: None,
            }),
            done: Condvar::new(),
        }
    }

    /// The launch parameters this request was submitted with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Current lifecycle status.
    pub fn status(&self) -> OperationStatus {
        self.state.lock().status
    }

    /// The return code, available once the request has completed.
    pub fn retcode(&self) -> Option<RegVal> {
        self.state.lock().retcode
    }

    /// Non-blocking completion check.
    pub fn test(&self) -> bool {
        self.status() == OperationStatus::Completed
    }

    /// Grant launch admission. Only the execution queue's single-admission
    /// protocol may call this; a request never self-promotes.
    pub(crate) fn set_executing(&self) {
        let mut state = self.state.lock();
        assert_eq!(
            state.status,
            OperationStatus::Queued,
            "admission granted to a request that is not QUEUED"
        );
        state.status = OperationStatus::Executing;
    }

    /// Drive the completion transition: store the return code, mark
    /// completed, and release every waiter. The return code is stored before
    /// the notification so any woken thread observes a valid value.
    pub(crate) fn complete(&self, retcode: RegVal) {
        let mut state = self.state.lock();
        assert_eq!(
            state.status,
            OperationStatus::Executing,
            "completion signaled for a request that is not EXECUTING"
        );
        state.retcode = Some(retcode);
        state.status = OperationStatus::Completed;
        drop(state);
        self.done.notify_all();
    }

    /// Block the calling thread until the request completes. Any number of
    /// threads may wait concurrently; all are released on completion.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while state.status != OperationStatus::Completed {
            self.done.wait(&mut state);
        }
    }

    /// Block up to `timeout`. Never fails on expiry; the request keeps
    /// running and can be waited on again.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitStatus {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.status != OperationStatus::Completed {
            if self.done.wait_until(&mut state, deadline).timed_out() {
                return if state.status == OperationStatus::Completed {
                    WaitStatus::Completed
                } else {
                    WaitStatus::TimedOut
                };
            }
        }
        WaitStatus::Completed
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Request")
            .field("scenario", &self.options.scenario)
            .field("status", &state.status)
            .field("retcode", &state.retcode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn default_options_are_nop() {
        let opts = Options::default();
        assert_eq!(opts.scenario, Scenario::Nop);
        assert_eq!(opts.tag, TAG_ANY);
        assert!(opts.waitfor.is_empty());
    }

    #[test]
    fn encode_args_order_and_function_selection() {
        let opts = Options::new(Scenario::Allreduce)
            .with_count(128)
            .with_comm(3)
            .with_root_src_dst(1)
            .with_reduce_function(ReduceFunction::Max)
            .with_tag(7)
            .with_arithcfg_addr(0x500);
        let args = opts.encode_args();
        assert_eq!(args[0], KernelArg::U32(Scenario::Allreduce as u32));
        assert_eq!(args[1], KernelArg::U32(128));
        assert_eq!(args[2], KernelArg::U32(3));
        assert_eq!(args[3], KernelArg::U32(1));
        assert_eq!(args[4], KernelArg::U32(ReduceFunction::Max as u32));
        assert_eq!(args[5], KernelArg::U32(7));
        assert_eq!(args[6], KernelArg::U32(0x500));
        // Missing operands encode address zero.
        assert_eq!(args[9], KernelArg::U64(0));
        assert_eq!(args[10], KernelArg::U64(0));
        assert_eq!(args[11], KernelArg::U64(0));
    }

    #[test]
    fn config_scenario_selects_cfg_function() {
        let opts = Options::new(Scenario::Config).with_cfg_function(CfgFunction::OpenPort);
        let args = opts.encode_args();
        assert_eq!(args[4], KernelArg::U32(CfgFunction::OpenPort as u32));
    }

    #[test]
    fn lifecycle_and_retcode_visibility() {
        let req = Request::new(Options::default());
        assert_eq!(req.status(), OperationStatus::Queued);
        assert_eq!(req.retcode(), None);
        assert!(!req.test());

        req.set_executing();
        assert_eq!(req.status(), OperationStatus::Executing);

        req.complete(17);
        assert!(req.test());
        assert_eq!(req.retcode(), Some(17));
    }

    #[test]
    #[should_panic(expected = "not QUEUED")]
    fn double_admission_is_a_contract_breach() {
        let req = Request::new(Options::default());
        req.set_executing();
        req.set_executing();
    }

    #[test]
    fn timed_wait_expires_without_error() {
        let req = Request::new(Options::default());
        let status = req.wait_timeout(Duration::from_millis(20));
        assert_eq!(status, WaitStatus::TimedOut);
        // The request is untouched by the abandoned wait.
        assert_eq!(req.status(), OperationStatus::Queued);
    }

    #[test]
    fn completion_releases_all_waiters() {
        let req = Arc::new(Request::new(Options::default()));
        req.set_executing();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let req = Arc::clone(&req);
                thread::spawn(move || {
                    req.wait();
                    req.retcode().expect("retcode visible after wait")
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(10));
        req.complete(5);

        for w in waiters {
            assert_eq!(w.join().unwrap(), 5);
        }
    }
}
