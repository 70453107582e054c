use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use num_integer::Integer;

use crate::buffer::IoBuffers;
use crate::device::FlashDevice;
use crate::error::{Error, Result};
use crate::pool::VblkPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Write,
    Read,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Write => f.write_str("WRITE"),
            Role::Read => f.write_str("READ"),
        }
    }
}

/// Full-vblk transfers needed to move `target_bytes`; a partial vblk still
/// costs a whole transfer.
pub fn iterations(target_bytes: u64, bytes_per_vblk: u64) -> u64 {
    Integer::div_ceil(&target_bytes, &bytes_per_vblk)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Completed,
    /// The partition had no eligible vblk left.
    Exhausted,
    /// The stop flag was raised by the coordinator.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub transfers: usize,
    pub exit: WorkerExit,
}

pub struct Worker<'a, D: FlashDevice> {
    id: usize,
    role: Role,
    pool: &'a VblkPool<D>,
    bufs: &'a IoBuffers,
    stop: &'a AtomicBool,
}

impl<'a, D: FlashDevice> Worker<'a, D> {
    pub fn new(
        id: usize,
        role: Role,
        pool: &'a VblkPool<D>,
        bufs: &'a IoBuffers,
        stop: &'a AtomicBool,
    ) -> Self {
        Worker {
            id,
            role,
            pool,
            bufs,
            stop,
        }
    }

    /// Move `target_bytes` one vblk at a time.
    ///
    /// Writers program the shared pattern. Readers read into a scratch
    /// buffer of their own. The stop flag is checked before every
    /// acquisition.
    pub fn run(&self, target_bytes: u64) -> Result<WorkerReport> {
        let nr_iterate = iterations(target_bytes, self.bufs.block_size() as u64);
        debug!(
            "[{}] worker {}: {} bytes in {} iterations",
            self.role, self.id, target_bytes, nr_iterate
        );

        let mut scratch = match self.role {
            Role::Read => self.bufs.scratch()?,
            Role::Write => Vec::new(),
        };
        let device = self.pool.device();
        let mut transfers = 0;

        for _ in 0..nr_iterate {
            if self.stop.load(Ordering::Relaxed) {
                debug!("[{}] worker {} stopped", self.role, self.id);
                return Ok(self.report(transfers, WorkerExit::Stopped));
            }

            let Some(acq) = self.pool.acquire(self.role) else {
                debug!(
                    "[{}] worker {} out of vblks after {} transfers",
                    self.role, self.id, transfers
                );
                return Ok(self.report(transfers, WorkerExit::Exhausted));
            };

            let res = match self.role {
                Role::Write => device.write(acq.vblk, self.bufs.write_buf()),
                Role::Read => device.read(acq.vblk, &mut scratch),
            };
            res.map_err(|source| Error::Transfer {
                role: self.role,
                vblk: acq.index,
                source,
            })?;
            transfers += 1;
        }

        debug!("[{}] worker {} done", self.role, self.id);
        Ok(self.report(transfers, WorkerExit::Completed))
    }

    fn report(&self, transfers: usize, exit: WorkerExit) -> WorkerReport {
        WorkerReport {
            worker: self.id,
            transfers,
            exit,
        }
    }
}
