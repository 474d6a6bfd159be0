//! Integration tests for the buffer model over the simulated DMA engine.

use std::sync::Arc;

use flightdeck::prelude::*;

#[test]
fn slice_view_matches_parent_layout() {
    let accel = SimAccelerator::new();
    let data: Vec<f32> = (0..32).map(|i| i as f32).collect();
    let buf = SimBuffer::from_slice(&accel, &data, DataType::Float32).unwrap();

    let a = 5;
    let b = 21;
    let sl = buf.slice(a, b).unwrap();

    let parent_ptr = buf.byte_array().unwrap().as_ptr() as usize;
    let slice_ptr = sl.byte_array().unwrap().as_ptr() as usize;
    assert_eq!(slice_ptr, parent_ptr + a * 4);
    assert_eq!(sl.size(), (b - a) * 4);
    assert_eq!(sl.physical_address(), buf.physical_address() + (a * 4) as u64);
    assert_eq!(sl.data_type(), DataType::Float32);
}

#[test]
fn invalid_slices_create_nothing() {
    let accel = SimAccelerator::new();
    let buf = SimBuffer::<i32>::new(&accel, 8, DataType::Int32).unwrap();

    assert!(matches!(
        buf.slice(6, 2).unwrap_err(),
        FlightdeckError::InvalidRange { start: 6, end: 2 }
    ));
    assert!(matches!(
        buf.slice(2, 12).unwrap_err(),
        FlightdeckError::OutOfRange { len: 8, .. }
    ));
}

#[test]
fn sliced_sync_moves_only_the_sub_range() {
    let accel = SimAccelerator::new();
    let data: Vec<i32> = (0..16).collect();
    let buf = SimBuffer::from_slice(&accel, &data, DataType::Int32).unwrap();
    buf.sync_to_device().unwrap();

    // Clobber one element device-side, then pull back just that window.
    let addr = buf.physical_address() + 4 * 4;
    let dma: Arc<dyn DmaTransport> = Arc::new(accel.clone());
    dma.to_device(addr, &99i32.to_ne_bytes()).unwrap();

    let window = buf.slice(4, 6).unwrap();
    window.sync_from_device().unwrap();

    assert_eq!(&buf.as_slice()[3..7], &[3, 99, 5, 6]);
}

#[test]
fn host_buffer_over_caller_memory() {
    let accel = SimAccelerator::new();
    let mut data: Vec<i64> = (0..8).collect();
    let addr = accel.alloc(8 * 8);
    let dma: Arc<dyn DmaTransport> = Arc::new(accel.clone());

    let buf = unsafe {
        HostBuffer::new(data.as_mut_ptr(), 8, DataType::Int64, addr, dma)
    }
    .unwrap();
    assert!(!buf.is_simulated());
    buf.sync_to_device().unwrap();

    let mut readback = [0u8; 64];
    let dma2: Arc<dyn DmaTransport> = Arc::new(accel.clone());
    dma2.from_device(addr, &mut readback).unwrap();
    assert_eq!(&readback[..8], &0i64.to_ne_bytes()[..]);
    assert_eq!(&readback[56..], &7i64.to_ne_bytes()[..]);

    drop(buf);
    drop(data);
}

#[test]
fn device_only_operands_encode_their_address() {
    let accel = SimAccelerator::new();
    let device = Device::new(Arc::new(accel.clone()));

    let dma: Arc<dyn DmaTransport> = Arc::new(accel.clone());
    let scratch = DeviceOnlyBuffer::new(256, DataType::Float32, accel.alloc(256 * 4), dma);
    assert!(scratch.byte_array().is_none());
    let scratch_addr = scratch.physical_address();

    let handle = device
        .call(
            Options::new(Scenario::Scatter)
                .with_count(256)
                .with_buffers(Some(Arc::new(scratch)), None, None),
        )
        .unwrap();
    assert!(device.test(handle));

    let trace = accel.launch_trace();
    assert_eq!(trace[0].args[9], KernelArg::U64(scratch_addr));
}

#[test]
fn freed_buffer_fails_loudly_everywhere() {
    let accel = SimAccelerator::new();
    let buf = SimBuffer::<f32>::new(&accel, 4, DataType::Float32).unwrap();
    let sl = buf.slice(0, 2).unwrap();

    sl.free_buffer().unwrap();

    for err in [
        buf.sync_to_device().unwrap_err(),
        buf.sync_from_device().unwrap_err(),
        sl.sync_to_device().unwrap_err(),
    ] {
        assert!(matches!(err, FlightdeckError::UseAfterFree { .. }));
    }
}
