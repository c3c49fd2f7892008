use super::helpers::run_ranks;
use commkit::Communicator;
use std::sync::atomic::{AtomicU32, Ordering};

#[test]
fn test_barrier_orders_phases() {
    let arrived = AtomicU32::new(0);
    run_ranks(4, |mut comm| {
        let rank = comm.rank();
        if rank == 3 {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        arrived.fetch_add(1, Ordering::SeqCst);
        comm.barrier().unwrap();
        assert_eq!(arrived.load(Ordering::SeqCst), 4, "rank {rank} left barrier early");
    });
}

#[test]
fn test_repeated_barriers() {
    run_ranks(3, |mut comm| {
        for _ in 0..10 {
            comm.barrier().unwrap();
        }
    });
}
