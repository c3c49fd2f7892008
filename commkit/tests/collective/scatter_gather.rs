use super::helpers::run_ranks;
use commkit::{BufferMut, BufferRef, CommError, Communicator};

#[test]
fn test_scatter_rows_3_ranks() {
    run_ranks(3, |mut comm| {
        let rank = comm.rank();
        // 3x2 matrix on the root; each rank gets one row.
        let send: Vec<i32> = if rank == 0 { (0..6).collect() } else { Vec::new() };
        let send = if rank == 0 {
            BufferRef::from_slice_shaped(&send, [3, 2]).unwrap()
        } else {
            BufferRef::from_slice(&send)
        };
        let mut row = [0i32; 2];
        let mut recv = BufferMut::from_slice_shaped(&mut row, [1, 2]).unwrap();
        comm.scatter(&send, &mut recv, 0).unwrap();

        let r = rank as i32;
        assert_eq!(row, [2 * r, 2 * r + 1], "rank {rank} scatter failed");
    });
}

#[test]
fn test_scatter_indivisible_fails_on_root() {
    run_ranks(2, |mut comm| {
        let rank = comm.rank();
        let mut recv = [0f64; 2];
        if rank == 0 {
            let send = [0f64; 5];
            let err = comm
                .scatter(&BufferRef::from_slice(&send), &mut BufferMut::from_slice(&mut recv), 0)
                .unwrap_err();
            assert!(matches!(err, CommError::ShapeMismatch { operation: "scatter", .. }));
        }
    });
}

#[test]
fn test_gather_to_non_zero_root() {
    run_ranks(3, |mut comm| {
        let rank = comm.rank();
        let send = [rank as u64 * 10, rank as u64 * 10 + 1];
        let mut recv = if rank == 1 { vec![0u64; 6] } else { Vec::new() };
        comm.gather(&BufferRef::from_slice(&send), &mut BufferMut::from_slice(&mut recv), 1)
            .unwrap();
        if rank == 1 {
            assert_eq!(recv, vec![0, 1, 10, 11, 20, 21]);
        } else {
            assert!(recv.is_empty());
        }
    });
}

#[test]
fn test_allgather_4_ranks() {
    run_ranks(4, |mut comm| {
        let rank = comm.rank();
        let send = [rank as u8; 2];
        let mut recv = [0u8; 8];
        comm.allgather(&BufferRef::from_slice(&send), &mut BufferMut::from_slice(&mut recv))
            .unwrap();
        assert_eq!(recv, [0, 0, 1, 1, 2, 2, 3, 3], "rank {rank} allgather failed");
    });
}

#[test]
fn test_allgather_wrong_recv_size() {
    run_ranks(2, |mut comm| {
        let send = [1i8; 3];
        let mut recv = [0i8; 3];
        let err = comm
            .allgather(&BufferRef::from_slice(&send), &mut BufferMut::from_slice(&mut recv))
            .unwrap_err();
        assert!(matches!(err, CommError::ShapeMismatch { operation: "allgather", .. }));
    });
}

#[test]
fn test_scatter_into_bare_rows_and_gather_back() {
    run_ranks(3, |mut comm| {
        let rank = comm.rank();
        let matrix: Vec<u64> = if rank == 1 { (10..16).collect() } else { Vec::new() };
        let send = if rank == 1 {
            BufferRef::from_slice_shaped(&matrix, [3, 2]).unwrap()
        } else {
            BufferRef::from_slice(&matrix)
        };
        let mut row = [0u64; 2];
        comm.scatter(&send, &mut BufferMut::from_slice(&mut row), 1)
            .unwrap();
        let r = rank as u64;
        assert_eq!(row, [10 + 2 * r, 11 + 2 * r], "rank {rank}");

        let mut back = [0u64; 6];
        let mut shaped = BufferMut::from_slice_shaped(&mut back, [3, 2]).unwrap();
        comm.allgather(&BufferRef::from_slice(&row), &mut shaped)
            .unwrap();
        assert_eq!(back, [10, 11, 12, 13, 14, 15]);
    });
}

#[test]
fn test_allgather_scalars_into_vector() {
    run_ranks(4, |mut comm| {
        let rank = comm.rank();
        let mine = [rank as i32 * 3];
        let scalar = BufferRef::from_slice_shaped(&mine, Vec::<usize>::new()).unwrap();
        let mut all = [0i32; 4];
        comm.allgather(&scalar, &mut BufferMut::from_slice(&mut all))
            .unwrap();
        assert_eq!(all, [0, 3, 6, 9]);
    });
}
