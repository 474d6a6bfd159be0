//! Simulated host-mirrored buffers.
//!
//! Unlike the core [`HostBuffer`], a [`SimBuffer`] owns its host storage:
//! the simulation has no caller-managed allocation to mirror, so it carries
//! one of its own and exposes the same capability surface with
//! `is_simulated() == true`.

use std::ptr::NonNull;
use std::sync::Arc;

use bytemuck::Pod;

use flightdeck_core::buffer::{DeviceBuffer, HostBuffer};
use flightdeck_core::error::Result;
use flightdeck_core::hal::DmaTransport;
use flightdeck_core::types::{DataType, DeviceAddr};

use crate::accelerator::SimAccelerator;

/// Host-mirrored buffer backed by simulated device memory.
pub struct SimBuffer<T: Pod> {
    /// Owned host storage. Heap-allocated, so the view's pointer stays valid
    /// when the `SimBuffer` itself moves.
    storage: Box<[T]>,
    view: HostBuffer<T>,
}

// SAFETY: mirrors `HostBuffer`'s contract — `T: Pod` rules out interior
// mutability and drop glue, and the owned `Box<[T]>` storage is plain data.
unsafe impl<T: Pod> Send for SimBuffer<T> {}
unsafe impl<T: Pod> Sync for SimBuffer<T> {}

impl<T: Pod> SimBuffer<T> {
    /// Allocate a zero-initialized buffer of `len` elements, with device
    /// memory taken from the accelerator's arena.
    pub fn new(accel: &SimAccelerator, len: usize, dtype: DataType) -> Result<Self> {
        let mut storage = vec![T::zeroed(); len].into_boxed_slice();
        let addr = accel.alloc(len * std::mem::size_of::<T>());
        let dma: Arc<dyn DmaTransport> = Arc::new(accel.clone());
        // SAFETY: storage is boxed and owned by the value under
        // construction; it outlives the view and is never reallocated.
        let view = unsafe { HostBuffer::new(storage.as_mut_ptr(), len, dtype, addr, dma) }?;
        Ok(Self { storage, view })
    }

    /// Allocate and fill from `data`.
    pub fn from_slice(accel: &SimAccelerator, data: &[T], dtype: DataType) -> Result<Self> {
        let mut buffer = Self::new(accel, data.len(), dtype)?;
        buffer.as_mut_slice().copy_from_slice(data);
        Ok(buffer)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the buffer holds zero elements.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// The host mirror as a typed slice.
    pub fn as_slice(&self) -> &[T] {
        &self.storage
    }

    /// The host mirror as a mutable typed slice.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.storage
    }
}

impl<T: Pod> std::fmt::Debug for SimBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBuffer")
            .field("len", &self.storage.len())
            .field("view", &self.view)
            .finish()
    }
}

impl<T: Pod> DeviceBuffer for SimBuffer<T> {
    fn size(&self) -> usize {
        self.view.size()
    }

    fn data_type(&self) -> DataType {
        self.view.data_type()
    }

    fn byte_array(&self) -> Option<NonNull<u8>> {
        self.view.byte_array()
    }

    fn physical_address(&self) -> DeviceAddr {
        self.view.physical_address()
    }

    fn sync_to_device(&self) -> Result<()> {
        self.view.sync_to_device()
    }

    fn sync_from_device(&self) -> Result<()> {
        self.view.sync_from_device()
    }

    fn free_buffer(&self) -> Result<()> {
        self.view.free_buffer()
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn sync_bo_to_device(&self) -> Result<()> {
        // The simulation has no separate backing object; syncing the host
        // mirror is the necessary work.
        self.view.sync_to_device()
    }

    fn sync_bo_from_device(&self) -> Result<()> {
        self.view.sync_from_device()
    }

    fn slice(&self, start: usize, end: usize) -> Result<Box<dyn DeviceBuffer>> {
        self.view.slice(start, end)
    }
}
