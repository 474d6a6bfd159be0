//! Single-flight execution queue.
//!
//! A FIFO of pending requests plus a test-and-set admission permit. The
//! permit guards only the brief decision of who drives execution; it is never
//! held across kernel execution by a blocked thread. Logically the in-flight
//! request owns the permit from admission until its completion pop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::request::Request;

/// FIFO of pending and in-flight requests with a single-admission gate.
///
/// Invariant: at most one request system-wide holds `Executing` status, and
/// while the permit is held the queue front is that request.
#[derive(Default)]
pub struct ExecQueue {
    pending: Mutex<VecDeque<Arc<Request>>>,
    permit: AtomicBool,
}

impl ExecQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request to the tail.
    pub fn push(&self, request: Arc<Request>) {
        self.pending.lock().push_back(request);
    }

    /// The front request, if any. While the permit is held this is the
    /// executing request.
    pub fn front(&self) -> Option<Arc<Request>> {
        self.pending.lock().front().cloned()
    }

    /// Pop the front request.
    pub fn pop_front(&self) -> Option<Arc<Request>> {
        self.pending.lock().pop_front()
    }

    /// Number of requests in the queue, including the executing one.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Try to take the admission permit. Returns `true` exactly once until
    /// the matching [`release`](Self::release).
    pub fn try_admit(&self) -> bool {
        self.permit
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Return the admission permit.
    pub fn release(&self) {
        self.permit.store(false, Ordering::Release);
    }

    /// Whether the permit is currently held.
    pub fn is_running(&self) -> bool {
        self.permit.load(Ordering::Acquire)
    }
}
