//! Device controller: submission, completion handling, and queue advance.
//!
//! The controller serializes concurrently submitted operations into strict
//! FIFO execution order on a single accelerator that runs one kernel at a
//! time. Submitting threads return immediately; one completion-watcher
//! thread per in-flight request blocks on kernel finish and drives the
//! completion transition and the next launch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::error::{FlightdeckError, Result};
use crate::hal::{Accelerator, KernelLaunch};
use crate::queue::ExecQueue;
use crate::request::{Options, Request};
use crate::types::{Handle, OperationStatus, RegVal, WaitStatus, RETCODE_OFFSET};

/// Counter snapshot for one controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceMetrics {
    /// Requests accepted by `start`.
    pub submitted: u64,
    /// Requests that reached `Completed`.
    pub completed: u64,
    /// Requests still in the queue, including the executing one.
    pub pending: usize,
}

struct Inner {
    accel: Arc<dyn Accelerator>,
    queue: ExecQueue,
    requests: RwLock<HashMap<Handle, Arc<Request>>>,
    next_handle: AtomicU64,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
    submitted: AtomicU64,
    completed: AtomicU64,
}

/// Controller for one accelerator.
///
/// All operations take `&self` and are safe to call from any number of
/// threads. Handles returned by [`start`](Device::start) stay queryable
/// until [`free_request`](Device::free_request); completed requests are
/// never garbage-collected automatically.
pub struct Device {
    inner: Arc<Inner>,
}

impl Device {
    /// Create a controller over the given accelerator interface.
    pub fn new(accel: Arc<dyn Accelerator>) -> Self {
        info!("device controller created");
        Device {
            inner: Arc::new(Inner {
                accel,
                queue: ExecQueue::new(),
                requests: RwLock::new(HashMap::new()),
                next_handle: AtomicU64::new(1),
                watchers: Mutex::new(Vec::new()),
                shutting_down: AtomicBool::new(false),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Submit an operation and return its handle without waiting.
    ///
    /// Fails with [`UnsupportedOperation`](FlightdeckError::UnsupportedOperation)
    /// before any queue mutation if `options.waitfor` names prerequisites —
    /// request chaining is not supported by this controller.
    pub fn start(&self, options: Options) -> Result<Handle> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(FlightdeckError::ShuttingDown);
        }
        if !options.waitfor.is_empty() {
            return Err(FlightdeckError::UnsupportedOperation {
                prerequisites: options.waitfor.len(),
            });
        }

        let handle = Handle::from_raw(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));
        let request = Arc::new(Request::new(options));
        self.inner
            .requests
            .write()
            .insert(handle, Arc::clone(&request));
        self.inner.queue.push(request);
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(handle = %handle, "request submitted");

        self.inner.launch_next();
        Ok(handle)
    }

    /// Block until the request behind `handle` completes. A handle absent
    /// from the table is treated as already complete and returns at once.
    pub fn wait(&self, handle: Handle) {
        match self.inner.lookup(handle) {
            Some(request) => request.wait(),
            None => debug!(handle = %handle, "wait on unknown handle, treated as complete"),
        }
    }

    /// Block up to `timeout` for the request to complete. Expiry is reported
    /// through the return value, never as an error. Absent handles are
    /// treated as complete.
    pub fn wait_timeout(&self, handle: Handle, timeout: Duration) -> WaitStatus {
        match self.inner.lookup(handle) {
            Some(request) => request.wait_timeout(timeout),
            None => WaitStatus::Completed,
        }
    }

    /// Non-blocking completion check. Absent handles are treated as
    /// complete.
    pub fn test(&self, handle: Handle) -> bool {
        match self.inner.lookup(handle) {
            Some(request) => request.test(),
            None => true,
        }
    }

    /// Submit and block until completion; the handle is returned for
    /// inspection.
    pub fn call(&self, options: Options) -> Result<Handle> {
        let handle = self.start(options)?;
        self.wait(handle);
        Ok(handle)
    }

    /// The return code the accelerator produced for this request, verbatim.
    ///
    /// Unlike `wait`/`test`, a retcode query implies data, so an absent
    /// handle is an explicit [`UnknownHandle`](FlightdeckError::UnknownHandle)
    /// error rather than a lenient default, and querying before completion
    /// fails with [`RetcodeUnavailable`](FlightdeckError::RetcodeUnavailable).
    pub fn get_retcode(&self, handle: Handle) -> Result<RegVal> {
        let request = self
            .inner
            .lookup(handle)
            .ok_or(FlightdeckError::UnknownHandle(handle))?;
        request
            .retcode()
            .ok_or(FlightdeckError::RetcodeUnavailable(handle))
    }

    /// Release the request behind `handle` and remove it from the table.
    /// Idempotent: freeing an unknown or already-freed handle is a no-op.
    pub fn free_request(&self, handle: Handle) {
        if self.inner.requests.write().remove(&handle).is_some() {
            debug!(handle = %handle, "request freed");
        }
    }

    /// Direct register read on the accelerator, for diagnostics.
    pub fn read(&self, offset: u64) -> Result<RegVal> {
        self.inner.accel.read_register(offset)
    }

    /// Direct register write on the accelerator, for diagnostics.
    pub fn write(&self, offset: u64, value: RegVal) -> Result<()> {
        self.inner.accel.write_register(offset, value)
    }

    /// Snapshot of the controller counters.
    pub fn metrics(&self) -> DeviceMetrics {
        DeviceMetrics {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            pending: self.inner.queue.len(),
        }
    }

    /// Refuse new submissions and join every outstanding completion-watcher.
    /// In-flight and queued requests run to completion first. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("device controller shutting down");
        loop {
            let drained: Vec<JoinHandle<()>> = {
                let mut watchers = self.inner.watchers.lock();
                watchers.drain(..).collect()
            };
            if drained.is_empty() {
                break;
            }
            for watcher in drained {
                // A joined watcher may have spawned the next one; the outer
                // loop picks it up.
                if watcher.join().is_err() {
                    error!("completion watcher panicked");
                }
            }
        }
        info!("device controller shut down");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn lookup(&self, handle: Handle) -> Option<Arc<Request>> {
        self.requests.read().get(&handle).cloned()
    }

    /// Single-admission launch protocol: whoever wins the permit starts the
    /// queue front; everyone else returns immediately and relies on the
    /// permit holder (or the eventual completion handler) to advance the
    /// queue.
    fn launch_next(self: &Arc<Self>) {
        loop {
            if !self.queue.try_admit() {
                return;
            }
            let Some(request) = self.queue.front() else {
                self.queue.release();
                // A submitter may have enqueued between our front() and
                // release(); retry so that request is not stranded.
                if self.queue.is_empty() {
                    return;
                }
                continue;
            };
            assert_eq!(
                request.status(),
                OperationStatus::Queued,
                "queue front must be QUEUED at admission"
            );
            request.set_executing();
            self.start_request(request);
            return;
        }
    }

    /// Encode the request into positional kernel arguments, trigger the
    /// kernel asynchronously, and spawn the completion-watcher.
    fn start_request(self: &Arc<Self>, request: Arc<Request>) {
        assert_eq!(
            request.status(),
            OperationStatus::Executing,
            "start protocol invoked on a request that is not EXECUTING"
        );

        let mut launch = self.accel.create_launch();
        for (index, arg) in request.options().encode_args().into_iter().enumerate() {
            launch.set_arg(index, arg);
        }
        launch.start();
        debug!(scenario = ?request.options().scenario, "kernel triggered");

        let inner = Arc::clone(self);
        let watcher = thread::spawn(move || inner.watch_completion(request, launch));

        let mut watchers = self.watchers.lock();
        watchers.retain(|w| !w.is_finished());
        watchers.push(watcher);
    }

    /// Completion-watcher body: block on kernel finish, read the result
    /// register, drive the COMPLETED transition, then advance the queue.
    fn watch_completion(self: Arc<Self>, request: Arc<Request>, mut launch: Box<dyn KernelLaunch>) {
        if let Err(e) = launch.wait_finished() {
            error!(error = %e, "kernel finish wait failed");
        }
        // The result register is read before waiters are notified so every
        // woken thread observes a valid return code.
        let retcode = match self.accel.read_register(RETCODE_OFFSET) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "return-code register read failed");
                RegVal::MAX
            }
        };
        request.complete(retcode);
        self.complete_request(&request);
    }

    /// Pop the finished front request and admit the next pending one.
    fn complete_request(self: &Arc<Self>, request: &Arc<Request>) {
        if request.status() != OperationStatus::Completed {
            return;
        }
        let popped = self.queue.pop_front();
        debug_assert!(
            popped.as_ref().is_some_and(|p| Arc::ptr_eq(p, request)),
            "completed request must be at the queue front"
        );
        self.queue.release();
        self.completed.fetch_add(1, Ordering::Relaxed);
        debug!("request completed, advancing queue");
        self.launch_next();
    }
}
