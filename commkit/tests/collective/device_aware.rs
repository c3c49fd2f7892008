use super::helpers::run_device_ranks;
use commkit::{BufferMut, CommError, Communicator, DataType, ReduceOp, Staging};

#[test]
fn test_bcast_device_root_matches_host_bcast() {
    run_device_ranks(3, false, |mut comm, dev| {
        let rank = comm.rank();
        if rank == 0 {
            let mut data = dev.alloc_from(&[1.0f32, 2.0, 3.0]);
            comm.bcast(&mut data.as_buffer_mut(), 0).unwrap();
            assert_eq!(data.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
            assert_eq!(dev.copies_to_host(), 1);
            assert_eq!(dev.copies_to_device(), 0);
        } else {
            // Host receivers see exactly what a host-to-host bcast delivers.
            let mut data = [0f32; 3];
            comm.bcast(&mut BufferMut::from_slice(&mut data), 0).unwrap();
            assert_eq!(data, [1.0, 2.0, 3.0], "rank {rank}");
            assert_eq!(dev.copies_to_host(), 0);
            assert_eq!(dev.copies_to_device(), 0);
        }
    });
}

#[test]
fn test_bcast_device_everywhere() {
    run_device_ranks(2, false, |mut comm, dev| {
        let rank = comm.rank();
        let init: Vec<i64> = if rank == 1 { vec![7, 8] } else { vec![0, 0] };
        let mut data = dev.alloc_from(&init);
        comm.bcast(&mut data.as_buffer_mut(), 1).unwrap();
        assert_eq!(data.to_vec::<i64>().unwrap(), vec![7, 8]);
        if rank == 1 {
            assert_eq!((dev.copies_to_host(), dev.copies_to_device()), (1, 0));
        } else {
            assert_eq!((dev.copies_to_host(), dev.copies_to_device()), (0, 1));
        }
    });
}

#[test]
fn test_scatter_stages_root_input_only_on_root() {
    run_device_ranks(2, false, |mut comm, dev| {
        let rank = comm.rank();
        let send = if rank == 0 {
            dev.alloc_from(&[1u32, 2, 3, 4])
        } else {
            dev.alloc([0], DataType::U32)
        };
        let mut recv = dev.alloc([2], DataType::U32);
        comm.scatter(&send.as_buffer(), &mut recv.as_buffer_mut(), 0)
            .unwrap();

        let expected = if rank == 0 { vec![1, 2] } else { vec![3, 4] };
        assert_eq!(recv.to_vec::<u32>().unwrap(), expected);
        let to_host = if rank == 0 { 1 } else { 0 };
        assert_eq!(dev.copies_to_host(), to_host, "rank {rank}");
        assert_eq!(dev.copies_to_device(), 1, "rank {rank}");
    });
}

#[test]
fn test_gather_stages_output_only_on_root() {
    run_device_ranks(3, false, |mut comm, dev| {
        let rank = comm.rank();
        let send = dev.alloc_from(&[rank as f64]);
        let mut recv = if rank == 0 {
            dev.alloc([3], DataType::F64)
        } else {
            dev.alloc([0], DataType::F64)
        };
        comm.gather(&send.as_buffer(), &mut recv.as_buffer_mut(), 0)
            .unwrap();

        assert_eq!(dev.copies_to_host(), 1, "rank {rank}");
        if rank == 0 {
            assert_eq!(recv.to_vec::<f64>().unwrap(), vec![0.0, 1.0, 2.0]);
            assert_eq!(dev.copies_to_device(), 1);
        } else {
            assert_eq!(dev.copies_to_device(), 0);
        }
    });
}

#[test]
fn test_reduce_device_input_host_output() {
    run_device_ranks(2, false, |mut comm, dev| {
        let rank = comm.rank();
        let send = dev.alloc_from(&[rank as i32 + 1, 10]);
        let mut recv = if rank == 0 { vec![0i32; 2] } else { Vec::new() };
        comm.reduce(&send.as_buffer(), &mut BufferMut::from_slice(&mut recv), ReduceOp::Sum, 0)
            .unwrap();
        if rank == 0 {
            assert_eq!(recv, vec![3, 20]);
        }
        assert_eq!(dev.copies_to_host(), 1);
        assert_eq!(dev.copies_to_device(), 0);
    });
}

#[test]
fn test_allgather_and_alltoall_on_device() {
    run_device_ranks(2, false, |mut comm, dev| {
        let rank = comm.rank();

        let send = dev.alloc_from(&[rank as u8, rank as u8 + 10]);
        let mut recv = dev.alloc([4], DataType::U8);
        comm.allgather(&send.as_buffer(), &mut recv.as_buffer_mut())
            .unwrap();
        assert_eq!(recv.to_vec::<u8>().unwrap(), vec![0, 10, 1, 11]);

        let mut swapped = dev.alloc([2], DataType::U8);
        comm.alltoall(&send.as_buffer(), &mut swapped.as_buffer_mut())
            .unwrap();
        let expected = if rank == 0 { vec![0, 1] } else { vec![10, 11] };
        assert_eq!(swapped.to_vec::<u8>().unwrap(), expected);

        assert_eq!(dev.copies_to_host(), 2);
        assert_eq!(dev.copies_to_device(), 2);
    });
}

#[test]
fn test_p2p_device_buffers() {
    run_device_ranks(2, false, |mut comm, dev| {
        if comm.rank() == 0 {
            let data = dev.alloc_from(&[1.25f32, -4.0]);
            comm.send(&data.as_buffer(), 1, 3).unwrap();
            assert_eq!(dev.copies_to_host(), 1);
        } else {
            let mut buf = dev.alloc([2], DataType::F32);
            comm.recv(&mut buf.as_buffer_mut(), 0, 3).unwrap();
            assert_eq!(buf.to_vec::<f32>().unwrap(), vec![1.25, -4.0]);
            assert_eq!(dev.copies_to_device(), 1);
        }
    });
}

#[test]
fn test_caller_supplied_staging_is_used() {
    run_device_ranks(2, false, |mut comm, dev| {
        let rank = comm.rank();
        let send = dev.alloc_from(&[rank as u64 + 1; 3]);
        let mut recv = dev.alloc([3], DataType::U64);
        let mut send_stage = [0u64; 3];
        let mut recv_stage = [0u64; 3];

        let staging = Staging::none()
            .with_send(BufferMut::from_slice(&mut send_stage))
            .with_recv(BufferMut::from_slice(&mut recv_stage));
        comm.allreduce_staged(&send.as_buffer(), &mut recv.as_buffer_mut(), ReduceOp::Sum, staging)
            .unwrap();

        assert_eq!(recv.to_vec::<u64>().unwrap(), vec![3, 3, 3]);
        // The staging buffers hold the data that crossed the boundary.
        assert_eq!(send_stage, [rank as u64 + 1; 3]);
        assert_eq!(recv_stage, [3; 3]);
    });
}

#[test]
fn test_device_resident_staging_rejected_on_every_rank() {
    run_device_ranks(2, false, |mut comm, dev| {
        let data = dev.alloc_from(&[1i32, 2]);
        let mut out = dev.alloc([2], DataType::I32);
        let mut bad = dev.alloc([2], DataType::I32);

        let staging = Staging::none().with_send(bad.as_buffer_mut());
        let err = comm
            .allreduce_staged(&data.as_buffer(), &mut out.as_buffer_mut(), ReduceOp::Sum, staging)
            .unwrap_err();
        assert!(matches!(err, CommError::InvalidStagingBuffer { .. }), "{err:?}");
        assert_eq!(out.to_vec::<i32>().unwrap(), vec![0, 0]);
    });
}

#[test]
fn test_mismatched_staging_rejected() {
    run_device_ranks(2, false, |mut comm, dev| {
        let mut data = dev.alloc([4], DataType::F32);
        let mut wrong = [0f32; 3];
        let err = comm
            .bcast_staged(&mut data.as_buffer_mut(), 0, Some(BufferMut::from_slice(&mut wrong)))
            .unwrap_err();
        assert!(matches!(err, CommError::InvalidStagingBuffer { .. }));
        assert_eq!(dev.copies_to_host() + dev.copies_to_device(), 0);
    });
}

#[test]
fn test_direct_transport_bypasses_staging() {
    run_device_ranks(2, true, |mut comm, dev| {
        let rank = comm.rank();
        let send = dev.alloc_from(&[rank as f64 * 2.0]);
        let mut recv = dev.alloc([1], DataType::F64);
        comm.allreduce(&send.as_buffer(), &mut recv.as_buffer_mut(), ReduceOp::Max)
            .unwrap();
        assert_eq!(recv.to_vec::<f64>().unwrap(), vec![2.0]);
        assert_eq!(dev.copies_to_host(), 0);
        assert_eq!(dev.copies_to_device(), 0);
    });
}

#[test]
fn test_split_keeps_staging() {
    run_device_ranks(4, false, |mut comm, dev| {
        let rank = comm.rank();
        let mut sub = comm.split(rank / 2, 0).unwrap();
        assert!(!sub.is_direct());

        let send = dev.alloc_from(&[rank as i64]);
        let mut recv = dev.alloc([1], DataType::I64);
        sub.allreduce(&send.as_buffer(), &mut recv.as_buffer_mut(), ReduceOp::Sum)
            .unwrap();
        let expected = if rank < 2 { 1 } else { 5 };
        assert_eq!(recv.to_vec::<i64>().unwrap(), vec![expected]);
        assert_eq!(dev.copies_to_host(), 1);
        assert_eq!(dev.copies_to_device(), 1);
    });
}
