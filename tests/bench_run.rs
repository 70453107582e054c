//! Whole runs through `execute` against the simulated and file backends.

use std::sync::Arc;
use std::time::Duration;

use vblk_bench::config::{BenchConfig, FailurePolicy, PartitionLayout, Phasing};
use vblk_bench::file::FileDevice;
use vblk_bench::geometry::Geometry;
use vblk_bench::sim::SimDevice;
use vblk_bench::{execute, Error, Role};

const VBLK: u64 = 64;

// one unit per vblk, 20 vblks of 64 bytes
const GEO: Geometry = Geometry {
    nchannels: 1,
    nluns: 1,
    blocks_per_unit: 20,
    unit_block_bytes: VBLK as usize,
};

fn ten_write_vblks() -> BenchConfig {
    BenchConfig {
        nr_punits: 1,
        nr_blocks: 20,
        nr_blks_in_vblk: 1,
        write_partition_vblks: Some(10),
        nr_w_threads: 4,
        nr_r_threads: 0,
        nbytes_to_write: 10 * VBLK,
        nbytes_to_read: 0,
        require_aligned_io: false,
        exhaustion_is_fatal: false,
        ..Default::default()
    }
}

#[test]
fn uneven_split_writes_exactly_the_partition() {
    let dev = Arc::new(SimDevice::new(GEO));
    let report = execute(Arc::clone(&dev), &ten_write_vblks()).unwrap();

    let write = report.write.unwrap();
    assert!(report.read.is_none());
    assert_eq!(write.role, Role::Write);
    assert_eq!(write.workers, 4);
    // 4 workers * ceil(2.5) iterations: two attempts find the pool empty
    assert_eq!(write.transfers, 10);
    assert!(write.exhausted_workers >= 1);
    assert_eq!(write.bytes, 10 * VBLK);
    assert_eq!(dev.stats().programs, 10);
    // the pool is gone, every vblk went back to the device
    assert_eq!(dev.stats().freed, 20);
}

#[test]
fn exhaustion_fails_the_run_when_fatal() {
    let dev = Arc::new(SimDevice::new(GEO));
    let cfg = BenchConfig {
        exhaustion_is_fatal: true,
        ..ten_write_vblks()
    };
    let err = execute(dev, &cfg).unwrap_err();
    assert!(matches!(
        err,
        Error::PoolExhausted {
            role: Role::Write,
            ..
        }
    ));
}

#[test]
fn invalid_config_fails_before_allocation() {
    let dev = Arc::new(SimDevice::new(GEO));
    let cfg = BenchConfig {
        nr_punits: 2,
        ..ten_write_vblks()
    };
    assert!(matches!(
        execute(Arc::clone(&dev), &cfg),
        Err(Error::Config(_))
    ));
    assert_eq!(dev.stats().allocated, 0);
}

#[test]
fn quarantined_vblk_shrinks_capacity() {
    let dev = Arc::new(SimDevice::new(GEO).fail_erase_on(4));
    let report = execute(Arc::clone(&dev), &ten_write_vblks()).unwrap();
    assert_eq!(report.write.unwrap().transfers, 9);
}

#[test]
fn transfer_failure_with_let_finish_runs_the_rest() {
    let dev = Arc::new(SimDevice::new(GEO).fail_program_on(0));
    let cfg = BenchConfig {
        write_partition_vblks: Some(20),
        nbytes_to_write: 16 * VBLK,
        failure_policy: FailurePolicy::LetFinish,
        require_aligned_io: true,
        ..ten_write_vblks()
    };
    let err = execute(Arc::clone(&dev), &cfg).unwrap_err();
    assert!(matches!(
        err,
        Error::Transfer {
            role: Role::Write,
            vblk: 0,
            ..
        }
    ));
    // the first claim is vblk 0, the other three writers move 4 vblks each
    assert_eq!(dev.stats().programs, 12);
}

#[test]
fn transfer_failure_with_abort_stops_the_others() {
    let dev = Arc::new(
        SimDevice::new(GEO)
            .fail_program_on(0)
            .with_latency(Duration::from_millis(2)),
    );
    let cfg = BenchConfig {
        write_partition_vblks: Some(20),
        nbytes_to_write: 16 * VBLK,
        failure_policy: FailurePolicy::AbortRun,
        ..ten_write_vblks()
    };
    assert!(matches!(
        execute(Arc::clone(&dev), &cfg),
        Err(Error::Transfer { vblk: 0, .. })
    ));
    assert!(dev.stats().programs <= 12);
}

fn mixed(phasing: Phasing) -> BenchConfig {
    BenchConfig {
        nr_punits: 4,
        nr_blocks: 8,
        nr_blks_in_vblk: 2,
        layout: PartitionLayout::Isolated,
        nr_w_threads: 2,
        nr_r_threads: 3,
        nbytes_to_write: 8 * 2 * VBLK,
        nbytes_to_read: 9 * 2 * VBLK,
        phasing,
        ..Default::default()
    }
}

#[test]
fn readers_and_writers_run_together() {
    let geo = Geometry {
        nchannels: 2,
        nluns: 2,
        blocks_per_unit: 8,
        unit_block_bytes: VBLK as usize,
    };
    for phasing in [Phasing::Concurrent, Phasing::WriteThenRead] {
        let dev = Arc::new(SimDevice::new(geo));
        let report = execute(Arc::clone(&dev), &mixed(phasing)).unwrap();

        let write = report.write.unwrap();
        let read = report.read.unwrap();
        assert_eq!(write.transfers, 8);
        // 9 reads cycle over the 8 prefilled vblks
        assert_eq!(read.transfers, 9);
        assert_eq!(dev.stats().reads, 9);
        // 8 prefill programs plus 8 writes
        assert_eq!(dev.stats().programs, 16);
    }
}

#[test]
fn readers_without_prefill_run_dry() {
    let geo = Geometry {
        nchannels: 2,
        nluns: 2,
        blocks_per_unit: 8,
        unit_block_bytes: VBLK as usize,
    };
    // every read vblk fails to erase during prefill
    let mut dev = SimDevice::new(geo);
    for id in (1..16).step_by(2) {
        dev = dev.fail_erase_on(id);
    }
    let err = execute(Arc::new(dev), &mixed(Phasing::WriteThenRead)).unwrap_err();
    assert!(matches!(
        err,
        Error::PoolExhausted {
            role: Role::Read,
            transfers: 0
        }
    ));
}

#[test]
fn read_failure_fails_the_run() {
    let geo = Geometry {
        nchannels: 2,
        nluns: 2,
        blocks_per_unit: 8,
        unit_block_bytes: VBLK as usize,
    };
    // allocation id 1 is the first read vblk
    let dev = Arc::new(SimDevice::new(geo).fail_read_on(1));
    let err = execute(Arc::clone(&dev), &mixed(Phasing::WriteThenRead)).unwrap_err();
    assert!(matches!(
        err,
        Error::Transfer {
            role: Role::Read,
            vblk: 0,
            ..
        }
    ));
    // the write phase completed before the readers started
    assert_eq!(dev.stats().programs, 16);
    assert_eq!(dev.stats().freed, 16);
}

#[test]
fn write_failure_stops_concurrent_readers() {
    // unit 0 holds the write partition, unit 1 the read partition
    let geo = Geometry {
        nchannels: 2,
        nluns: 1,
        blocks_per_unit: 4,
        unit_block_bytes: VBLK as usize,
    };
    let dev = Arc::new(
        SimDevice::new(geo)
            .fail_program_on(0)
            .with_latency(Duration::from_millis(5)),
    );
    let cfg = BenchConfig {
        nr_punits: 2,
        nr_blocks: 4,
        nr_blks_in_vblk: 1,
        layout: PartitionLayout::Isolated,
        nr_w_threads: 1,
        nr_r_threads: 1,
        nbytes_to_write: 4 * VBLK,
        nbytes_to_read: 200 * VBLK,
        phasing: Phasing::Concurrent,
        failure_policy: FailurePolicy::AbortRun,
        ..Default::default()
    };
    let err = execute(Arc::clone(&dev), &cfg).unwrap_err();
    assert!(matches!(
        err,
        Error::Transfer {
            role: Role::Write,
            vblk: 0,
            ..
        }
    ));
    // the reader saw the writer's failure long before its 200 reads
    assert!(dev.stats().reads < 100);
}

#[test]
fn file_backend_runs_end_to_end() {
    let path = std::env::temp_dir().join(format!("vblk-bench-e2e-{}", std::process::id()));
    let file = std::fs::File::create(&path).unwrap();
    // 2 channels * 2 luns * 64 bytes * 8 blocks
    file.set_len(4 * VBLK * 8).unwrap();
    drop(file);

    let dev = Arc::new(FileDevice::open(&path, 2, 2, VBLK as usize).unwrap());
    let report = execute(dev, &mixed(Phasing::WriteThenRead)).unwrap();
    assert_eq!(report.write.unwrap().transfers, 8);
    assert_eq!(report.read.unwrap().transfers, 9);

    std::fs::remove_file(path).unwrap();
}
