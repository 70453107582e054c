//! In-memory flash model.
//!
//! No data is stored. Each vblk only tracks whether it is erased, written or
//! being programmed, which is enough to catch a program without a prior
//! erase or two programs racing on the same vblk. Faults can be injected per
//! allocation id or at a random rate.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::prelude::*;

use crate::config::VblkId;
use crate::device::FlashDevice;
use crate::error::DeviceError;
use crate::geometry::{Geometry, PhysicalBlockAddress, VirtualBlockAddress};

#[derive(Debug, Default)]
struct Cell {
    erased: AtomicBool,
    written: AtomicBool,
    programming: AtomicBool,
}

#[derive(Debug)]
pub struct SimVblk {
    id: VblkId,
    addr: VirtualBlockAddress,
    nbytes: usize,
    cell: Arc<Cell>,
}

impl SimVblk {
    pub fn addr(&self) -> &VirtualBlockAddress {
        &self.addr
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimStats {
    pub allocated: u64,
    pub freed: u64,
    pub erases: u64,
    pub programs: u64,
    pub reads: u64,
}

#[derive(Debug, Default)]
struct Counters {
    allocated: AtomicU64,
    freed: AtomicU64,
    erases: AtomicU64,
    programs: AtomicU64,
    reads: AtomicU64,
}

#[derive(Debug, Default)]
struct Faults {
    alloc: HashSet<VblkId>,
    erase: HashSet<VblkId>,
    program: HashSet<VblkId>,
    read: HashSet<VblkId>,
    rate: f64,
}

pub struct SimDevice {
    geo: Geometry,
    latency: Option<Duration>,
    next_id: AtomicUsize,
    in_use: Mutex<HashSet<PhysicalBlockAddress>>,
    faults: Faults,
    rng: Mutex<SmallRng>,
    counters: Counters,
}

impl SimDevice {
    pub fn new(geo: Geometry) -> Self {
        SimDevice {
            geo,
            latency: None,
            next_id: AtomicUsize::new(0),
            in_use: Mutex::new(HashSet::new()),
            faults: Faults::default(),
            rng: Mutex::new(SmallRng::seed_from_u64(0)),
            counters: Counters::default(),
        }
    }

    /// Sleep this long inside every erase, program and read.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_alloc_on(mut self, id: VblkId) -> Self {
        self.faults.alloc.insert(id);
        self
    }

    pub fn fail_erase_on(mut self, id: VblkId) -> Self {
        self.faults.erase.insert(id);
        self
    }

    pub fn fail_program_on(mut self, id: VblkId) -> Self {
        self.faults.program.insert(id);
        self
    }

    pub fn fail_read_on(mut self, id: VblkId) -> Self {
        self.faults.read.insert(id);
        self
    }

    /// Fail any erase, program or read with probability `rate`.
    pub fn with_failure_rate(mut self, rate: f64, seed: u64) -> Self {
        self.faults.rate = rate.clamp(0.0, 1.0);
        self.rng = Mutex::new(SmallRng::seed_from_u64(seed));
        self
    }

    pub fn stats(&self) -> SimStats {
        SimStats {
            allocated: self.counters.allocated.load(Ordering::Relaxed),
            freed: self.counters.freed.load(Ordering::Relaxed),
            erases: self.counters.erases.load(Ordering::Relaxed),
            programs: self.counters.programs.load(Ordering::Relaxed),
            reads: self.counters.reads.load(Ordering::Relaxed),
        }
    }

    fn injected(&self, set: &HashSet<VblkId>, id: VblkId) -> bool {
        if set.contains(&id) {
            return true;
        }
        self.faults.rate > 0.0 && self.rng.lock().gen_bool(self.faults.rate)
    }

    fn stall(&self) {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
    }
}

impl FlashDevice for SimDevice {
    type Vblk = SimVblk;

    fn geometry(&self) -> Geometry {
        self.geo
    }

    fn alloc_vblk(&self, addr: &VirtualBlockAddress) -> Result<SimVblk, DeviceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.faults.alloc.contains(&id) {
            return Err(DeviceError::Address(format!("vblk {} refused", id)));
        }
        if addr.blocks.is_empty() {
            return Err(DeviceError::Address("empty vblk address".into()));
        }

        let mut in_use = self.in_use.lock();
        for pba in &addr.blocks {
            if pba.channel >= self.geo.nchannels
                || pba.lun >= self.geo.nluns
                || pba.block >= self.geo.blocks_per_unit
            {
                return Err(DeviceError::Address(format!("{:?} out of range", pba)));
            }
            if in_use.contains(pba) {
                return Err(DeviceError::Address(format!("{:?} already in a vblk", pba)));
            }
        }
        in_use.extend(addr.blocks.iter().copied());
        drop(in_use);

        self.counters.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(SimVblk {
            id,
            addr: addr.clone(),
            nbytes: addr.blocks.len() * self.geo.unit_block_bytes,
            cell: Arc::new(Cell::default()),
        })
    }

    fn erase(&self, vblk: &SimVblk) -> Result<(), DeviceError> {
        self.stall();
        self.counters.erases.fetch_add(1, Ordering::Relaxed);
        if self.injected(&self.faults.erase, vblk.id) {
            return Err(DeviceError::Erase { vblk: vblk.id });
        }
        vblk.cell.written.store(false, Ordering::Release);
        vblk.cell.erased.store(true, Ordering::Release);
        Ok(())
    }

    fn write(&self, vblk: &SimVblk, buf: &[u8]) -> Result<(), DeviceError> {
        if buf.len() != vblk.nbytes {
            return Err(DeviceError::BufferSize {
                len: buf.len(),
                expected: vblk.nbytes,
            });
        }
        if vblk
            .cell
            .programming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DeviceError::Program {
                vblk: vblk.id,
                reason: "concurrent program".into(),
            });
        }

        let res = if !vblk.cell.erased.swap(false, Ordering::AcqRel) {
            Err(DeviceError::Program {
                vblk: vblk.id,
                reason: "program without erase".into(),
            })
        } else if self.injected(&self.faults.program, vblk.id) {
            Err(DeviceError::Program {
                vblk: vblk.id,
                reason: "injected fault".into(),
            })
        } else {
            self.stall();
            vblk.cell.written.store(true, Ordering::Release);
            self.counters.programs.fetch_add(1, Ordering::Relaxed);
            Ok(())
        };

        vblk.cell.programming.store(false, Ordering::Release);
        res
    }

    fn read(&self, vblk: &SimVblk, buf: &mut [u8]) -> Result<(), DeviceError> {
        if buf.len() != vblk.nbytes {
            return Err(DeviceError::BufferSize {
                len: buf.len(),
                expected: vblk.nbytes,
            });
        }
        if !vblk.cell.written.load(Ordering::Acquire) {
            return Err(DeviceError::Read {
                vblk: vblk.id,
                reason: "vblk was never programmed".into(),
            });
        }
        if self.injected(&self.faults.read, vblk.id) {
            return Err(DeviceError::Read {
                vblk: vblk.id,
                reason: "injected fault".into(),
            });
        }
        self.stall();
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn free(&self, vblk: SimVblk) {
        let mut in_use = self.in_use.lock();
        for pba in &vblk.addr.blocks {
            in_use.remove(pba);
        }
        self.counters.freed.fetch_add(1, Ordering::Relaxed);
    }
}
