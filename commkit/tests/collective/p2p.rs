use super::helpers::run_ranks;
use commkit::{BufferMut, BufferRef, CommError, Communicator, NullCommunicator};

#[test]
fn test_ring_4_ranks() {
    run_ranks(4, |mut comm| {
        let rank = comm.rank();
        let size = comm.size();
        let next = (rank + 1) % size;
        let prev = (rank + size - 1) % size;

        let send = [rank as f32; 3];
        comm.send(&BufferRef::from_slice(&send), next, 100 + rank).unwrap();

        let mut recv = [0f32; 3];
        comm.recv(&mut BufferMut::from_slice(&mut recv), prev, 100 + prev)
            .unwrap();
        assert_eq!(recv, [prev as f32; 3], "rank {rank} ring recv failed");
    });
}

#[test]
fn test_tags_do_not_cross() {
    run_ranks(2, |mut comm| {
        if comm.rank() == 0 {
            comm.send(&BufferRef::from_slice(&[1u8, 2]), 1, 7).unwrap();
            comm.send(&BufferRef::from_slice(&[3u8, 4]), 1, 8).unwrap();
        } else {
            let mut b = [0u8; 2];
            comm.recv(&mut BufferMut::from_slice(&mut b), 0, 8).unwrap();
            assert_eq!(b, [3, 4]);
            comm.recv(&mut BufferMut::from_slice(&mut b), 0, 7).unwrap();
            assert_eq!(b, [1, 2]);
        }
    });
}

#[test]
fn test_fifo_per_tag() {
    run_ranks(2, |mut comm| {
        if comm.rank() == 0 {
            for v in 0..5u32 {
                comm.send(&BufferRef::from_slice(&[v]), 1, 0).unwrap();
            }
        } else {
            for v in 0..5u32 {
                let mut b = [u32::MAX];
                comm.recv(&mut BufferMut::from_slice(&mut b), 0, 0).unwrap();
                assert_eq!(b, [v]);
            }
        }
    });
}

#[test]
fn test_peer_out_of_range() {
    run_ranks(2, |mut comm| {
        let err = comm
            .send(&BufferRef::from_slice(&[0u8]), 2, 0)
            .unwrap_err();
        assert!(matches!(err, CommError::Protocol { operation: "send", .. }));

        let mut b = [0u8];
        let err = comm
            .recv(&mut BufferMut::from_slice(&mut b), 5, 0)
            .unwrap_err();
        assert!(matches!(err, CommError::Protocol { operation: "recv", .. }));
    });
}

#[test]
fn test_mismatched_recv_keeps_message() {
    run_ranks(2, |mut comm| {
        if comm.rank() == 0 {
            let data = [1.5f64, 2.5, 3.5];
            comm.send(&BufferRef::from_slice(&data), 1, 9).unwrap();
        } else {
            let mut short = [0f64; 2];
            let err = comm
                .recv(&mut BufferMut::from_slice(&mut short), 0, 9)
                .unwrap_err();
            assert!(matches!(err, CommError::ShapeMismatch { operation: "recv", .. }), "{err:?}");
            assert_eq!(short, [0.0; 2]);

            let mut wrong_dtype = [0i64; 3];
            let err = comm
                .recv(&mut BufferMut::from_slice(&mut wrong_dtype), 0, 9)
                .unwrap_err();
            assert!(matches!(err, CommError::ShapeMismatch { .. }));

            let mut full = [0f64; 3];
            comm.recv(&mut BufferMut::from_slice(&mut full), 0, 9).unwrap();
            assert_eq!(full, [1.5, 2.5, 3.5]);
        }
    });
}

#[test]
fn test_reshaped_recv_matches_null_backend() {
    let data = [1i32, 2, 3, 4, 5, 6];

    let mut null = NullCommunicator::new();
    null.send(&BufferRef::from_slice(&data), 0, 0).unwrap();
    let mut out = [0i32; 6];
    let mut square = BufferMut::from_slice_shaped(&mut out, [2, 3]).unwrap();
    let null_err = null.recv(&mut square, 0, 0).unwrap_err();
    assert!(matches!(null_err, CommError::ShapeMismatch { .. }));

    run_ranks(2, |mut comm| {
        if comm.rank() == 0 {
            comm.send(&BufferRef::from_slice(&data), 1, 0).unwrap();
        } else {
            let mut out = [0i32; 6];
            let mut square = BufferMut::from_slice_shaped(&mut out, [2, 3]).unwrap();
            let err = comm.recv(&mut square, 0, 0).unwrap_err();
            assert!(matches!(err, CommError::ShapeMismatch { operation: "recv", .. }));

            let mut flat = BufferMut::from_slice(&mut out);
            comm.recv(&mut flat, 0, 0).unwrap();
            assert_eq!(out, data);
        }
    });
}
