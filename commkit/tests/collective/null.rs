use commkit::{BufferMut, BufferRef, CommError, Communicator, NullCommunicator, ReduceOp};

#[test]
fn test_send_then_mutate_then_recv() {
    let mut comm = NullCommunicator::new();
    let mut original = vec![1i64, 2, 3];

    comm.send(&BufferRef::from_slice(&original), 0, 5).unwrap();
    original.copy_from_slice(&[9, 9, 9]);

    let mut buf = vec![0i64; 3];
    comm.recv(&mut BufferMut::from_slice(&mut buf), 0, 5).unwrap();
    assert_eq!(buf, vec![1, 2, 3]);
    assert_eq!(original, vec![9, 9, 9]);
}

#[test]
fn test_recv_without_send_is_empty_queue() {
    let mut comm = NullCommunicator::new();
    for tag in [0, 1, 5, u32::MAX] {
        let mut buf = [0f32; 2];
        let err = comm
            .recv(&mut BufferMut::from_slice(&mut buf), 0, tag)
            .unwrap_err();
        assert!(
            matches!(err, CommError::EmptyQueue { tag: t } if t == tag),
            "tag {tag}: {err:?}"
        );
    }
}

#[test]
fn test_non_zero_peers_are_protocol_errors() {
    let mut comm = NullCommunicator::new();
    let data = [1u8];
    for peer in [1, 2, 100] {
        let err = comm.send(&BufferRef::from_slice(&data), peer, 0).unwrap_err();
        assert!(matches!(err, CommError::Protocol { operation: "send", .. }));

        let mut buf = [0u8];
        let err = comm
            .recv(&mut BufferMut::from_slice(&mut buf), peer, 0)
            .unwrap_err();
        assert!(matches!(err, CommError::Protocol { operation: "recv", .. }));
    }
    assert_eq!(comm.pending(0), 0);
}

#[test]
fn test_bcast_root_zero_only() {
    let mut comm = NullCommunicator::new();
    let mut data = [4.0f64, 5.0];
    comm.bcast(&mut BufferMut::from_slice(&mut data), 0).unwrap();
    assert_eq!(data, [4.0, 5.0]);

    for root in [1, 7] {
        let err = comm
            .bcast(&mut BufferMut::from_slice(&mut data), root)
            .unwrap_err();
        assert!(matches!(err, CommError::Protocol { operation: "bcast", .. }));
    }
}

#[test]
fn test_collectives_require_equal_shapes() {
    let mut comm = NullCommunicator::new();
    let send = [1i32, 2, 3, 4];
    let mut short = [0i32; 3];

    let err = comm
        .scatter(&BufferRef::from_slice(&send), &mut BufferMut::from_slice(&mut short), 0)
        .unwrap_err();
    assert!(matches!(err, CommError::ShapeMismatch { operation: "scatter", .. }));

    let err = comm
        .gather(&BufferRef::from_slice(&send), &mut BufferMut::from_slice(&mut short), 0)
        .unwrap_err();
    assert!(matches!(err, CommError::ShapeMismatch { operation: "gather", .. }));

    let err = comm
        .allgather(&BufferRef::from_slice(&send), &mut BufferMut::from_slice(&mut short))
        .unwrap_err();
    assert!(matches!(err, CommError::ShapeMismatch { operation: "allgather", .. }));

    let err = comm
        .alltoall(&BufferRef::from_slice(&send), &mut BufferMut::from_slice(&mut short))
        .unwrap_err();
    assert!(matches!(err, CommError::ShapeMismatch { operation: "alltoall", .. }));
    assert_eq!(short, [0; 3]);

    // Same element count, different shape.
    let mut square = [0i32; 4];
    let mut recv = BufferMut::from_slice_shaped(&mut square, [2, 2]).unwrap();
    let err = comm
        .allgather(&BufferRef::from_slice(&send), &mut recv)
        .unwrap_err();
    assert!(matches!(err, CommError::ShapeMismatch { .. }));
}

#[test]
fn test_collectives_copy_through() {
    let mut comm = NullCommunicator::new();
    let send = [1u32, 2, 3, 4];

    let mut recv = [0u32; 4];
    comm.scatter(&BufferRef::from_slice(&send), &mut BufferMut::from_slice(&mut recv), 0)
        .unwrap();
    assert_eq!(recv, send);

    let mut recv = [0u32; 4];
    comm.alltoall(&BufferRef::from_slice(&send), &mut BufferMut::from_slice(&mut recv))
        .unwrap();
    assert_eq!(recv, send);

    let mut recv = [0u32; 4];
    comm.reduce(
        &BufferRef::from_slice(&send),
        &mut BufferMut::from_slice(&mut recv),
        ReduceOp::Sum,
        0,
    )
    .unwrap();
    assert_eq!(recv, send);
}

#[test]
fn test_unknown_reduce_op_is_invalid_operation() {
    for name in ["prod", "mean", "Sum", "bor"] {
        let err = name.parse::<ReduceOp>().unwrap_err();
        assert!(matches!(err, CommError::InvalidOperation(_)), "{name}");
    }
}

#[test]
fn test_split_and_dup() {
    let mut comm = NullCommunicator::new();
    for key in [0, 3, 42] {
        let sub = comm.split(0, key).unwrap();
        assert_eq!(sub.rank(), 0);
        assert_eq!(sub.size(), 1);
    }
    for color in [1, 2, 9] {
        let err = comm.split(color, 0).unwrap_err();
        assert!(matches!(err, CommError::Protocol { operation: "split", .. }));
    }

    comm.send(&BufferRef::from_slice(&[1u8]), 0, 2).unwrap();
    let dup = comm.dup().unwrap();
    assert_eq!(dup.pending(2), 0);
    assert_eq!(comm.pending(2), 1);
}

#[test]
fn test_barrier_is_noop() {
    let mut comm = NullCommunicator::new();
    comm.barrier().unwrap();
    comm.barrier().unwrap();
}
