use super::helpers::run_ranks;
use commkit::{BufferMut, CommError, Communicator};

#[test]
fn test_bcast_3_ranks_f32() {
    run_ranks(3, |mut comm| {
        let rank = comm.rank();
        let mut data = if rank == 0 {
            vec![1.5f32, 2.5, 3.5]
        } else {
            vec![0.0f32; 3]
        };
        comm.bcast(&mut BufferMut::from_slice(&mut data), 0).unwrap();
        assert_eq!(data, vec![1.5, 2.5, 3.5], "rank {rank} bcast failed");
    });
}

#[test]
fn test_bcast_non_zero_root_2d() {
    run_ranks(4, |mut comm| {
        let rank = comm.rank();
        let mut data = vec![rank as i64; 6];
        let mut buf = BufferMut::from_slice_shaped(&mut data, [2, 3]).unwrap();
        comm.bcast(&mut buf, 2).unwrap();
        assert_eq!(data, vec![2i64; 6], "rank {rank} bcast failed");
    });
}

#[test]
fn test_bcast_root_out_of_range() {
    run_ranks(2, |mut comm| {
        let mut data = [0u8; 2];
        let err = comm
            .bcast(&mut BufferMut::from_slice(&mut data), 2)
            .unwrap_err();
        assert!(matches!(err, CommError::Protocol { operation: "bcast", .. }));
    });
}
