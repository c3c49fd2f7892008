use super::helpers::run_ranks;
use commkit::{BufferMut, BufferRef, CommError, Communicator};

#[test]
fn test_alltoall_3_ranks() {
    run_ranks(3, |mut comm| {
        let rank = comm.rank();
        // Chunk j of rank i carries 10 * i + j.
        let send: Vec<u32> = (0..3).map(|j| 10 * rank + j).collect();
        let mut recv = vec![0u32; 3];
        comm.alltoall(&BufferRef::from_slice(&send), &mut BufferMut::from_slice(&mut recv))
            .unwrap();
        let expected: Vec<u32> = (0..3).map(|i| 10 * i + rank).collect();
        assert_eq!(recv, expected, "rank {rank} alltoall failed");
    });
}

#[test]
fn test_alltoall_2d_chunks() {
    run_ranks(2, |mut comm| {
        let rank = comm.rank() as i64;
        let send: Vec<i64> = (0..4).map(|k| rank * 100 + k).collect();
        let mut out = vec![0i64; 4];
        let send_buf = BufferRef::from_slice_shaped(&send, [2, 2]).unwrap();
        let mut recv_buf = BufferMut::from_slice_shaped(&mut out, [2, 2]).unwrap();
        comm.alltoall(&send_buf, &mut recv_buf).unwrap();
        // Row r of the result is row `rank` of rank r's input.
        let expected = if rank == 0 { vec![0, 1, 100, 101] } else { vec![2, 3, 102, 103] };
        assert_eq!(out, expected);
    });
}

#[test]
fn test_alltoall_indivisible() {
    run_ranks(2, |mut comm| {
        let send = [0u8; 3];
        let mut recv = [0u8; 3];
        let err = comm
            .alltoall(&BufferRef::from_slice(&send), &mut BufferMut::from_slice(&mut recv))
            .unwrap_err();
        assert!(matches!(err, CommError::ShapeMismatch { operation: "alltoall", .. }));
    });
}
