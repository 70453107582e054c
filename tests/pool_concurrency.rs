//! Acquisition under contention.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use vblk_bench::geometry::{punit_addresses, vblk_address, Geometry};
use vblk_bench::sim::SimDevice;
use vblk_bench::{BlockState, FlashDevice, Role, VblkPool};

const GEO: Geometry = Geometry {
    nchannels: 1,
    nluns: 1,
    blocks_per_unit: 256,
    unit_block_bytes: 32,
};

fn pool(dev: SimDevice, write: &[BlockState], read: &[BlockState]) -> VblkPool<SimDevice> {
    let dev = Arc::new(dev);
    let units = punit_addresses(&GEO, 1);
    let mut blk = 0;
    let mut alloc = |states: &[BlockState], prefill: bool| {
        states
            .iter()
            .map(|&s| {
                let vblk = dev.alloc_vblk(&vblk_address(blk, &units)).unwrap();
                blk += 1;
                if prefill && s == BlockState::Reserved {
                    dev.erase(&vblk).unwrap();
                    dev.write(&vblk, &[0x5a; 32]).unwrap();
                }
                (vblk, s)
            })
            .collect::<Vec<_>>()
    };
    let w = alloc(write, false);
    let r = alloc(read, true);
    VblkPool::from_parts(dev, w, r)
}

/// Hammer `acquire_for_write` from `threads` threads until exhaustion and
/// return every index handed out.
fn drain_writes(pool: &VblkPool<SimDevice>, threads: usize) -> Vec<usize> {
    let got = Mutex::new(Vec::new());
    thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                while let Some(acq) = pool.acquire_for_write() {
                    got.lock().push(acq.index);
                }
            });
        }
    });
    got.into_inner()
}

#[test]
fn no_vblk_is_held_by_two_writers() {
    let pool = pool(
        SimDevice::new(GEO).with_latency(Duration::from_micros(200)),
        &[BlockState::Free; 8],
        &[],
    );
    let held = Mutex::new(HashSet::new());
    let all = Mutex::new(Vec::new());
    let pattern = [0xa5; 32];

    thread::scope(|s| {
        for _ in 0..16 {
            s.spawn(|| {
                while let Some(acq) = pool.acquire_for_write() {
                    assert!(held.lock().insert(acq.index), "vblk {} issued twice", acq.index);
                    all.lock().push(acq.index);
                    // the simulator rejects a concurrent or repeated program
                    pool.device().write(acq.vblk, &pattern).unwrap();
                    held.lock().remove(&acq.index);
                }
            });
        }
    });

    let mut all = all.into_inner();
    all.sort_unstable();
    assert_eq!(all, (0..8).collect::<Vec<_>>());
    assert_eq!(pool.device().stats().programs, 8);
}

#[test]
fn exhaustion_is_independent_of_thread_count() {
    for threads in [1, 2, 4, 8, 32] {
        let pool = pool(SimDevice::new(GEO), &[BlockState::Free; 20], &[]);
        let mut got = drain_writes(&pool, threads);
        got.sort_unstable();
        assert_eq!(got, (0..20).collect::<Vec<_>>(), "{} threads", threads);
        assert!(pool.acquire_for_write().is_none());
    }
}

#[test]
fn bad_vblk_is_never_issued() {
    let pool = pool(
        SimDevice::new(GEO).fail_erase_on(3),
        &[BlockState::Free; 10],
        &[],
    );
    let got = drain_writes(&pool, 6);
    assert_eq!(got.len(), 9);
    assert!(!got.contains(&3));
    assert_eq!(pool.partition(Role::Write).states()[3], BlockState::Bad);
    assert_eq!(pool.partition(Role::Write).stats().bad, 1);
}

#[test]
fn reads_reuse_prefilled_vblks() {
    let pool = pool(SimDevice::new(GEO), &[], &[BlockState::Reserved; 5]);
    for _ in 0..10 {
        assert!(pool.acquire_for_read().is_some());
    }

    let hits = Mutex::new(0usize);
    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut buf = vec![0; 32];
                for _ in 0..25 {
                    let acq = pool.acquire_for_read().unwrap();
                    pool.device().read(acq.vblk, &mut buf).unwrap();
                    *hits.lock() += 1;
                }
            });
        }
    });
    assert_eq!(hits.into_inner(), 100);
    assert_eq!(pool.partition(Role::Read).stats().reserved, 5);
}

#[test]
fn write_and_read_partitions_do_not_mix() {
    let pool = pool(
        SimDevice::new(GEO),
        &[BlockState::Free; 30],
        &[BlockState::Reserved, BlockState::Free, BlockState::Reserved],
    );

    thread::scope(|s| {
        s.spawn(|| drain_writes(&pool, 4));
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..50 {
                    let acq = pool.acquire_for_read().unwrap();
                    assert_ne!(acq.index, 1);
                }
            });
        }
    });

    assert_eq!(pool.partition(Role::Write).stats().reserved, 30);
    assert_eq!(
        pool.partition(Role::Read).states(),
        vec![BlockState::Reserved, BlockState::Free, BlockState::Reserved]
    );
}
