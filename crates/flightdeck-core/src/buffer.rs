//! Host-mirrored and device-only buffer model.
//!
//! A buffer describes a device memory region and, for host-mirrored buffers,
//! the caller-owned host allocation that shadows it. Buffers never own host
//! memory and never allocate device memory; they only observe and
//! synchronize. Device allocation and the host allocation's lifetime are the
//! caller's responsibility: host memory must outlive the buffer and every
//! slice derived from it.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Pod;

use crate::error::{FlightdeckError, Result};
use crate::hal::DmaTransport;
use crate::types::{DataType, DeviceAddr};

/// Capability interface over the closed set of buffer variants.
///
/// Synchronization is a best-effort pass-through to the DMA transport and is
/// idempotent: syncing twice without intervening host mutation does not
/// corrupt device state. Buffers are not internally synchronized — callers
/// must not sync the same buffer concurrently from multiple threads.
pub trait DeviceBuffer: Send + Sync + std::fmt::Debug {
    /// Size of the buffer in bytes.
    fn size(&self) -> usize;

    /// Datatype of the device buffer.
    fn data_type(&self) -> DataType;

    /// Host mirror as a byte pointer, or `None` for device-only buffers.
    fn byte_array(&self) -> Option<NonNull<u8>>;

    /// Device-side location of the buffer.
    fn physical_address(&self) -> DeviceAddr;

    /// Copy the host mirror to the device.
    fn sync_to_device(&self) -> Result<()>;

    /// Copy the device buffer into the host mirror.
    fn sync_from_device(&self) -> Result<()>;

    /// Release device-side resources (never host memory). Idempotent; after
    /// the first call every sync fails with
    /// [`UseAfterFree`](FlightdeckError::UseAfterFree).
    fn free_buffer(&self) -> Result<()>;

    /// Whether this is a software-simulated stand-in rather than a
    /// hardware-backed buffer.
    fn is_simulated(&self) -> bool {
        false
    }

    /// Sync the backing object to the device if the simulation needs it.
    /// No-op for hardware-backed buffers.
    fn sync_bo_to_device(&self) -> Result<()> {
        Ok(())
    }

    /// Sync the backing object from the device if the simulation needs it.
    /// No-op for hardware-backed buffers.
    fn sync_bo_from_device(&self) -> Result<()> {
        Ok(())
    }

    /// A view over elements `[start, end)` of this buffer.
    ///
    /// The view aliases the same host storage and device range; it must not
    /// outlive the parent's backing memory. Fails with
    /// [`InvalidRange`](FlightdeckError::InvalidRange) if `start > end` and
    /// [`OutOfRange`](FlightdeckError::OutOfRange) if the range exceeds the
    /// buffer.
    fn slice(&self, start: usize, end: usize) -> Result<Box<dyn DeviceBuffer>>;
}

fn check_range(start: usize, end: usize, len: usize) -> Result<()> {
    if start > end {
        return Err(FlightdeckError::InvalidRange { start, end });
    }
    if end > len {
        return Err(FlightdeckError::OutOfRange { start, end, len });
    }
    Ok(())
}

/// Host-mirrored typed buffer over caller-owned memory.
///
/// The element count, not the byte size, is the unit of `len` and `slice`;
/// the byte size is always `len * size_of::<T>()`.
pub struct HostBuffer<T: Pod> {
    ptr: NonNull<T>,
    len: usize,
    dtype: DataType,
    addr: AtomicU64,
    dma: Arc<dyn DmaTransport>,
    /// Shared with every slice: releasing any view frees the one underlying
    /// device allocation.
    freed: Arc<AtomicBool>,
}

// SAFETY: the pointer refers to caller-managed memory whose lifetime and
// aliasing the caller vouches for at construction; T: Pod rules out interior
// mutability and drop glue.
unsafe impl<T: Pod> Send for HostBuffer<T> {}
unsafe impl<T: Pod> Sync for HostBuffer<T> {}

impl<T: Pod> HostBuffer<T> {
    /// Construct a buffer over an existing host allocation.
    ///
    /// Fails with [`DatatypeMismatch`](FlightdeckError::DatatypeMismatch) if
    /// `dtype` does not describe elements of `size_of::<T>()` bytes.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `len` initialized elements of `T`, and
    /// that allocation must outlive the buffer and every slice derived from
    /// it. The buffer never frees the host memory.
    pub unsafe fn new(
        ptr: *mut T,
        len: usize,
        dtype: DataType,
        addr: DeviceAddr,
        dma: Arc<dyn DmaTransport>,
    ) -> Result<Self> {
        if dtype.size_of() != std::mem::size_of::<T>() {
            return Err(FlightdeckError::DatatypeMismatch {
                dtype,
                expected: dtype.size_of(),
                actual: std::mem::size_of::<T>(),
            });
        }
        let ptr = NonNull::new(ptr).expect("host pointer must be non-null");
        Ok(Self {
            ptr,
            len,
            dtype,
            addr: AtomicU64::new(addr),
            dma,
            freed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds zero elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The host mirror as a typed slice.
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: upheld by the construction contract.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The host mirror as a mutable typed slice.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: upheld by the construction contract; &mut self gives
        // exclusive access to the view.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Reassign the device address in place, e.g. after a device-side
    /// reallocation. Identity and host mirror are unchanged.
    pub fn update_address(&self, addr: DeviceAddr) {
        self.addr.store(addr, Ordering::Release);
    }

    /// Repoint the buffer at a new host allocation and device address.
    ///
    /// # Safety
    ///
    /// Same obligations as [`new`](Self::new) for `ptr`; existing slices of
    /// the old allocation keep pointing at it and must be dropped first.
    pub unsafe fn update_buffer(&mut self, ptr: *mut T, len: usize, addr: DeviceAddr) {
        self.ptr = NonNull::new(ptr).expect("host pointer must be non-null");
        self.len = len;
        self.addr.store(addr, Ordering::Release);
    }

    fn guard_freed(&self) -> Result<()> {
        if self.freed.load(Ordering::Acquire) {
            return Err(FlightdeckError::UseAfterFree {
                addr: self.addr.load(Ordering::Acquire),
            });
        }
        Ok(())
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: T: Pod, so any element is valid as raw bytes.
        unsafe {
            std::slice::from_raw_parts(
                self.ptr.as_ptr().cast::<u8>(),
                self.len * std::mem::size_of::<T>(),
            )
        }
    }
}

impl<T: Pod> std::fmt::Debug for HostBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuffer")
            .field("len", &self.len)
            .field("dtype", &self.dtype)
            .field("addr", &self.physical_address())
            .field("freed", &self.freed.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: Pod> DeviceBuffer for HostBuffer<T> {
    fn size(&self) -> usize {
        self.len * std::mem::size_of::<T>()
    }

    fn data_type(&self) -> DataType {
        self.dtype
    }

    fn byte_array(&self) -> Option<NonNull<u8>> {
        Some(self.ptr.cast::<u8>())
    }

    fn physical_address(&self) -> DeviceAddr {
        self.addr.load(Ordering::Acquire)
    }

    fn sync_to_device(&self) -> Result<()> {
        self.guard_freed()?;
        tracing::trace!(addr = self.physical_address(), bytes = self.size(), "sync to device");
        self.dma.to_device(self.physical_address(), self.bytes())
    }

    fn sync_from_device(&self) -> Result<()> {
        self.guard_freed()?;
        tracing::trace!(addr = self.physical_address(), bytes = self.size(), "sync from device");
        // SAFETY: T: Pod accepts arbitrary byte patterns; exclusivity of the
        // host mirror during a sync is the caller's obligation.
        let out = unsafe {
            std::slice::from_raw_parts_mut(
                self.ptr.as_ptr().cast::<u8>(),
                self.len * std::mem::size_of::<T>(),
            )
        };
        self.dma.from_device(self.physical_address(), out)
    }

    fn free_buffer(&self) -> Result<()> {
        if self.freed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.dma.release(self.physical_address())
    }

    fn slice(&self, start: usize, end: usize) -> Result<Box<dyn DeviceBuffer>> {
        check_range(start, end, self.len)?;
        // SAFETY: the range was checked against the parent allocation.
        let ptr = unsafe { self.ptr.as_ptr().add(start) };
        Ok(Box::new(HostBuffer::<T> {
            ptr: NonNull::new(ptr).expect("offset of non-null pointer"),
            len: end - start,
            dtype: self.dtype,
            addr: AtomicU64::new(
                self.physical_address() + (start * std::mem::size_of::<T>()) as DeviceAddr,
            ),
            dma: Arc::clone(&self.dma),
            freed: Arc::clone(&self.freed),
        }))
    }
}

/// Buffer with no host mirror: only a device-side region of a given logical
/// length and datatype.
pub struct DeviceOnlyBuffer {
    len: usize,
    dtype: DataType,
    addr: AtomicU64,
    dma: Arc<dyn DmaTransport>,
    freed: Arc<AtomicBool>,
}

impl DeviceOnlyBuffer {
    /// Construct a device-only buffer over an externally allocated region.
    pub fn new(len: usize, dtype: DataType, addr: DeviceAddr, dma: Arc<dyn DmaTransport>) -> Self {
        Self {
            len,
            dtype,
            addr: AtomicU64::new(addr),
            dma,
            freed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Logical length in elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds zero elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reassign the device address in place after reallocation.
    pub fn update_address(&self, addr: DeviceAddr) {
        self.addr.store(addr, Ordering::Release);
    }

    fn guard_freed(&self) -> Result<()> {
        if self.freed.load(Ordering::Acquire) {
            return Err(FlightdeckError::UseAfterFree {
                addr: self.addr.load(Ordering::Acquire),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for DeviceOnlyBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceOnlyBuffer")
            .field("len", &self.len)
            .field("dtype", &self.dtype)
            .field("addr", &self.physical_address())
            .field("freed", &self.freed.load(Ordering::Acquire))
            .finish()
    }
}

impl DeviceBuffer for DeviceOnlyBuffer {
    fn size(&self) -> usize {
        self.len * self.dtype.size_of()
    }

    fn data_type(&self) -> DataType {
        self.dtype
    }

    fn byte_array(&self) -> Option<NonNull<u8>> {
        None
    }

    fn physical_address(&self) -> DeviceAddr {
        self.addr.load(Ordering::Acquire)
    }

    fn sync_to_device(&self) -> Result<()> {
        // No host mirror, nothing to copy.
        self.guard_freed()
    }

    fn sync_from_device(&self) -> Result<()> {
        self.guard_freed()
    }

    fn free_buffer(&self) -> Result<()> {
        if self.freed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.dma.release(self.physical_address())
    }

    fn slice(&self, start: usize, end: usize) -> Result<Box<dyn DeviceBuffer>> {
        check_range(start, end, self.len)?;
        Ok(Box::new(DeviceOnlyBuffer {
            len: end - start,
            dtype: self.dtype,
            addr: AtomicU64::new(
                self.physical_address() + (start * self.dtype.size_of()) as DeviceAddr,
            ),
            dma: Arc::clone(&self.dma),
            freed: Arc::clone(&self.freed),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// DMA stub that records the last transfer per address.
    #[derive(Default)]
    struct RecordingDma {
        writes: Mutex<Vec<(DeviceAddr, Vec<u8>)>>,
        released: Mutex<Vec<DeviceAddr>>,
    }

    impl DmaTransport for RecordingDma {
        fn to_device(&self, addr: DeviceAddr, data: &[u8]) -> Result<()> {
            self.writes.lock().push((addr, data.to_vec()));
            Ok(())
        }

        fn from_device(&self, _addr: DeviceAddr, out: &mut [u8]) -> Result<()> {
            out.fill(0xAB);
            Ok(())
        }

        fn release(&self, addr: DeviceAddr) -> Result<()> {
            self.released.lock().push(addr);
            Ok(())
        }
    }

    fn host_buffer(data: &mut [f32], addr: DeviceAddr) -> (HostBuffer<f32>, Arc<RecordingDma>) {
        let dma = Arc::new(RecordingDma::default());
        let buf = unsafe {
            HostBuffer::new(
                data.as_mut_ptr(),
                data.len(),
                DataType::Float32,
                addr,
                Arc::clone(&dma) as Arc<dyn DmaTransport>,
            )
        }
        .unwrap();
        (buf, dma)
    }

    #[test]
    fn construction_checks_datatype() {
        let dma = Arc::new(RecordingDma::default());
        let mut data = vec![0f32; 4];
        let err = unsafe {
            HostBuffer::new(
                data.as_mut_ptr(),
                4,
                DataType::Float64,
                0,
                dma as Arc<dyn DmaTransport>,
            )
        }
        .unwrap_err();
        assert!(matches!(err, FlightdeckError::DatatypeMismatch { .. }));
    }

    #[test]
    fn byte_size_matches_element_count() {
        let mut data = vec![0f32; 16];
        let (buf, _dma) = host_buffer(&mut data, 0x1000);
        assert_eq!(buf.size(), 16 * 4);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.data_type(), DataType::Float32);
    }

    #[test]
    fn sync_to_device_passes_bytes_through() {
        let mut data = vec![1f32, 2.0, 3.0, 4.0];
        let (buf, dma) = host_buffer(&mut data, 0x2000);
        buf.sync_to_device().unwrap();

        let writes = dma.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, 0x2000);
        assert_eq!(writes[0].1.len(), 16);
    }

    #[test]
    fn sync_from_device_fills_host_mirror() {
        let mut data = vec![0i64; 1];
        let dma = Arc::new(RecordingDma::default());
        let buf = unsafe {
            HostBuffer::new(
                data.as_mut_ptr(),
                1,
                DataType::Int64,
                0x3000,
                dma as Arc<dyn DmaTransport>,
            )
        }
        .unwrap();
        buf.sync_from_device().unwrap();
        assert_eq!(buf.as_slice()[0], i64::from_ne_bytes([0xAB; 8]));
    }

    #[test]
    fn slice_aliases_parent_storage() {
        let mut data = vec![0f32; 16];
        let (buf, _dma) = host_buffer(&mut data, 0x1000);

        let sl = buf.slice(4, 12).unwrap();
        assert_eq!(sl.size(), 8 * 4);
        assert_eq!(sl.physical_address(), 0x1000 + 4 * 4);

        let parent_ptr = buf.byte_array().unwrap().as_ptr() as usize;
        let slice_ptr = sl.byte_array().unwrap().as_ptr() as usize;
        assert_eq!(slice_ptr, parent_ptr + 4 * 4);
    }

    #[test]
    fn slice_of_slice_composes() {
        let mut data = vec![0f32; 16];
        let (buf, _dma) = host_buffer(&mut data, 0x1000);

        let outer = buf.slice(2, 10).unwrap();
        let inner = outer.slice(1, 3).unwrap();
        assert_eq!(inner.size(), 2 * 4);
        assert_eq!(inner.physical_address(), 0x1000 + 3 * 4);
    }

    #[test]
    fn slice_rejects_bad_ranges() {
        let mut data = vec![0f32; 8];
        let (buf, _dma) = host_buffer(&mut data, 0);

        assert!(matches!(
            buf.slice(5, 3).unwrap_err(),
            FlightdeckError::InvalidRange { start: 5, end: 3 }
        ));
        assert!(matches!(
            buf.slice(0, 9).unwrap_err(),
            FlightdeckError::OutOfRange { len: 8, .. }
        ));
        // Full-range and empty slices are both fine.
        assert!(buf.slice(0, 8).is_ok());
        assert!(buf.slice(4, 4).is_ok());
    }

    #[test]
    fn free_is_idempotent_and_poisons_sync() {
        let mut data = vec![0f32; 4];
        let (buf, dma) = host_buffer(&mut data, 0x4000);

        buf.free_buffer().unwrap();
        buf.free_buffer().unwrap();
        assert_eq!(dma.released.lock().len(), 1);

        assert!(matches!(
            buf.sync_to_device().unwrap_err(),
            FlightdeckError::UseAfterFree { addr: 0x4000 }
        ));
        assert!(matches!(
            buf.sync_from_device().unwrap_err(),
            FlightdeckError::UseAfterFree { .. }
        ));
    }

    #[test]
    fn free_propagates_to_slices() {
        let mut data = vec![0f32; 8];
        let (buf, _dma) = host_buffer(&mut data, 0);
        let sl = buf.slice(0, 4).unwrap();

        buf.free_buffer().unwrap();
        assert!(matches!(
            sl.sync_to_device().unwrap_err(),
            FlightdeckError::UseAfterFree { .. }
        ));
    }

    #[test]
    fn device_only_buffer_has_no_host_mirror() {
        let dma = Arc::new(RecordingDma::default());
        let buf = DeviceOnlyBuffer::new(32, DataType::Int32, 0x8000, dma as Arc<dyn DmaTransport>);

        assert!(buf.byte_array().is_none());
        assert_eq!(buf.size(), 32 * 4);
        assert!(!buf.is_simulated());
        buf.sync_to_device().unwrap();
        buf.sync_from_device().unwrap();

        let sl = buf.slice(8, 16).unwrap();
        assert_eq!(sl.physical_address(), 0x8000 + 8 * 4);
        assert!(sl.byte_array().is_none());
    }

    #[test]
    fn update_address_keeps_identity() {
        let mut data = vec![0f32; 4];
        let (buf, dma) = host_buffer(&mut data, 0x1000);
        buf.update_address(0x9000);
        assert_eq!(buf.physical_address(), 0x9000);

        buf.sync_to_device().unwrap();
        assert_eq!(dma.writes.lock()[0].0, 0x9000);
    }
}
