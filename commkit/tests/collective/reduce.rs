use super::helpers::run_ranks;
use commkit::{BufferMut, BufferRef, Communicator, ReduceOp};

#[test]
fn test_allreduce_sum_3_ranks_f32() {
    run_ranks(3, |mut comm| {
        let rank = comm.rank();
        let send = vec![(rank + 1) as f32; 4];
        let mut recv = vec![0f32; 4];
        comm.allreduce(
            &BufferRef::from_slice(&send),
            &mut BufferMut::from_slice(&mut recv),
            ReduceOp::Sum,
        )
        .unwrap();
        // 1 + 2 + 3
        assert_eq!(recv, vec![6.0; 4], "rank {rank} allreduce failed");
    });
}

#[test]
fn test_allreduce_max_min_i32() {
    run_ranks(4, |mut comm| {
        let rank = comm.rank() as i32;
        let send = [rank, -rank, 10 - rank];

        let mut max = [0i32; 3];
        let mut out = BufferMut::from_slice(&mut max);
        comm.allreduce(&BufferRef::from_slice(&send), &mut out, ReduceOp::Max)
            .unwrap();
        assert_eq!(max, [3, 0, 10]);

        let mut min = [0i32; 3];
        let mut out = BufferMut::from_slice(&mut min);
        comm.allreduce(&BufferRef::from_slice(&send), &mut out, ReduceOp::Min)
            .unwrap();
        assert_eq!(min, [0, -3, 7]);
    });
}

#[test]
fn test_reduce_to_root_only() {
    run_ranks(3, |mut comm| {
        let rank = comm.rank();
        let send = [rank as f64 + 0.5, 1.0];
        let mut recv = if rank == 2 { vec![0f64; 2] } else { Vec::new() };
        comm.reduce(
            &BufferRef::from_slice(&send),
            &mut BufferMut::from_slice(&mut recv),
            "sum".parse().unwrap(),
            2,
        )
        .unwrap();
        if rank == 2 {
            assert_eq!(recv, vec![4.5, 3.0]);
        }
    });
}
