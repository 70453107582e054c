//! Run coordination and throughput reporting.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use byte_unit::Byte;
use log::{error, info, warn};

use crate::buffer::IoBuffers;
use crate::config::{BenchConfig, FailurePolicy, Phasing};
use crate::device::FlashDevice;
use crate::error::{Error, Result};
use crate::init::populate;
use crate::pool::VblkPool;
use crate::worker::{Role, Worker, WorkerExit, WorkerReport};

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleReport {
    pub role: Role,
    pub workers: usize,
    pub transfers: usize,
    pub bytes: u64,
    pub elapsed: Duration,
    pub exhausted_workers: usize,
}

impl RoleReport {
    pub fn throughput_bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / secs
    }

    pub fn mib_per_sec(&self) -> f64 {
        self.throughput_bytes_per_sec() / MIB
    }
}

impl fmt::Display for RoleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] elapsed time: {} ns, total_count: {}, {} by {} workers, MiB/s: {:.2}",
            self.role,
            self.elapsed.as_nanos(),
            self.transfers,
            Byte::from_bytes(self.bytes as u128).get_appropriate_unit(true),
            self.workers,
            self.mib_per_sec()
        )
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct BenchReport {
    pub write: Option<RoleReport>,
    pub read: Option<RoleReport>,
}

/// Policy knobs the coordinator applies to worker outcomes.
#[derive(Debug, Clone, Copy)]
pub struct RunPolicy {
    pub failure: FailurePolicy,
    pub exhaustion_is_fatal: bool,
}

impl From<&BenchConfig> for RunPolicy {
    fn from(cfg: &BenchConfig) -> Self {
        RunPolicy {
            failure: cfg.failure_policy,
            exhaustion_is_fatal: cfg.exhaustion_is_fatal,
        }
    }
}

/// Run `workers` threads of one role, each moving an equal share of
/// `total_bytes`, and time them from before the first spawn to after the
/// last join.
///
/// Workers report back over a channel as they finish. The first fatal
/// outcome is kept and returned once every worker has been joined; under
/// [`FailurePolicy::AbortRun`] it also raises `stop`, which every worker
/// sharing the flag checks before its next iteration.
pub fn run_role<D: FlashDevice>(
    role: Role,
    workers: usize,
    total_bytes: u64,
    pool: &VblkPool<D>,
    bufs: &IoBuffers,
    policy: RunPolicy,
    stop: &AtomicBool,
) -> Result<RoleReport> {
    if workers == 0 {
        return Err(Error::Config(format!("[{}] needs at least one worker", role)));
    }
    let share = total_bytes / workers as u64;
    info!(
        "[{}] {} workers, {} each",
        role,
        workers,
        Byte::from_bytes(share as u128).get_appropriate_unit(true)
    );

    let mut first_err: Option<Error> = None;
    let mut reports: Vec<WorkerReport> = Vec::with_capacity(workers);

    let start = Instant::now();
    thread::scope(|s| {
        let (tx, rx) = mpsc::channel();
        for id in 0..workers {
            let tx = tx.clone();
            let worker = Worker::new(id, role, pool, bufs, stop);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", role, id).to_lowercase())
                .spawn_scoped(s, move || {
                    let res = panic::catch_unwind(AssertUnwindSafe(|| worker.run(share)))
                        .unwrap_or(Err(Error::WorkerPanicked { role, worker: id }));
                    let _ = tx.send(res);
                });
            if let Err(e) = spawned {
                error!("[{}] thread create error: {}", role, e);
                stop.store(true, Ordering::Relaxed);
                first_err = Some(e.into());
                break;
            }
        }
        drop(tx);

        for res in rx {
            let fatal = match res {
                Ok(report) => {
                    let exhausted = report.exit == WorkerExit::Exhausted;
                    reports.push(report);
                    if exhausted && policy.exhaustion_is_fatal {
                        Some(Error::PoolExhausted {
                            role,
                            transfers: report.transfers,
                        })
                    } else {
                        None
                    }
                }
                Err(e) => Some(e),
            };
            if let Some(e) = fatal {
                error!("{}", e);
                if policy.failure == FailurePolicy::AbortRun {
                    stop.store(true, Ordering::Relaxed);
                }
                first_err.get_or_insert(e);
            }
        }
    });
    let elapsed = start.elapsed();

    if let Some(e) = first_err {
        return Err(e);
    }

    let transfers: usize = reports.iter().map(|r| r.transfers).sum();
    let exhausted_workers = reports
        .iter()
        .filter(|r| r.exit == WorkerExit::Exhausted)
        .count();
    if exhausted_workers > 0 {
        warn!(
            "[{}] {} of {} workers ran out of vblks",
            role, exhausted_workers, workers
        );
    }

    Ok(RoleReport {
        role,
        workers,
        transfers,
        bytes: transfers as u64 * bufs.block_size() as u64,
        elapsed,
        exhausted_workers,
    })
}

/// Run every configured role against an initialized pool. Both roles share
/// one stop flag, so a fatal outcome on either side ends the whole run.
pub fn run<D: FlashDevice>(
    cfg: &BenchConfig,
    pool: &VblkPool<D>,
    bufs: &IoBuffers,
) -> Result<BenchReport> {
    let policy = RunPolicy::from(cfg);
    let stop = AtomicBool::new(false);
    let stop = &stop;
    let write = || match cfg.nr_w_threads {
        0 => Ok(None),
        n => run_role(Role::Write, n, cfg.nbytes_to_write, pool, bufs, policy, stop).map(Some),
    };
    let read = || match cfg.nr_r_threads {
        0 => Ok(None),
        n => run_role(Role::Read, n, cfg.nbytes_to_read, pool, bufs, policy, stop).map(Some),
    };

    let (write, read) = match cfg.phasing {
        Phasing::Concurrent => thread::scope(|s| {
            let writer = s.spawn(write);
            let read = read();
            let write = writer
                .join()
                .unwrap_or_else(|e| panic::resume_unwind(e));
            (write, read)
        }),
        Phasing::WriteThenRead => {
            let write = write()?;
            (Ok(write), read())
        }
    };

    Ok(BenchReport {
        write: write?,
        read: read?,
    })
}

/// Allocate buffers, build the pool, run the workload and tear it all down.
pub fn execute<D: FlashDevice>(device: Arc<D>, cfg: &BenchConfig) -> Result<BenchReport> {
    let geo = device.geometry();
    cfg.validate(&geo)?;

    let bpb = cfg.bytes_per_vblk(&geo) as usize;
    info!("allocating I/O buffers");
    let mut bufs = IoBuffers::allocate(bpb)?;
    bufs.fill(cfg.pattern_seed);

    let pool = populate(device, cfg, &bufs)?;
    let report = run(cfg, &pool, &bufs);

    for role in [Role::Write, Role::Read] {
        info!("[{}] partition: {}", role, pool.partition(role).stats());
    }
    report
}
