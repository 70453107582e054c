//! Virtual-block pool shared by all workers.
//!
//! The pool holds two partitions. Each one owns its vblk handles plus a
//! state array and a round-robin cursor guarded by a single mutex. The lock
//! covers the whole scan, including the erase of a claimed vblk, and is
//! released before the caller starts its transfer.

use std::fmt;
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::config::{Counter, VblkId};
use crate::device::FlashDevice;
use crate::worker::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Free,
    Reserved,
    Bad,
}

/// A vblk lent to one transfer.
#[derive(Debug)]
pub struct Acquired<'a, V> {
    pub index: VblkId,
    pub vblk: &'a V,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PartitionStats {
    pub free: Counter,
    pub reserved: Counter,
    pub bad: Counter,
}

impl PartitionStats {
    pub fn total(&self) -> Counter {
        self.free + self.reserved + self.bad
    }
}

impl fmt::Display for PartitionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} vblks (free: {}, reserved: {}, bad: {})",
            self.total(),
            self.free,
            self.reserved,
            self.bad
        )
    }
}

#[derive(Debug)]
struct Slots {
    states: Vec<BlockState>,
    // None until the first scan, so the first candidate is slot 0
    cursor: Option<VblkId>,
}

impl Slots {
    fn advance(&mut self) -> VblkId {
        let next = match self.cursor {
            None => 0,
            Some(c) => (c + 1) % self.states.len(),
        };
        self.cursor = Some(next);
        next
    }
}

pub struct Partition<V> {
    role: Role,
    blocks: Vec<V>,
    slots: Mutex<Slots>,
}

impl<V> Partition<V> {
    fn new(role: Role, entries: Vec<(V, BlockState)>) -> Self {
        let (blocks, states): (Vec<V>, Vec<BlockState>) = entries.into_iter().unzip();
        Partition {
            role,
            blocks,
            slots: Mutex::new(Slots {
                states,
                cursor: None,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Walk at most one full lap from the slot after the cursor and return
    /// the first slot `claim` accepts. `claim` runs under the partition lock
    /// and may rewrite the slot's state.
    fn scan<F>(&self, mut claim: F) -> Option<Acquired<'_, V>>
    where
        F: FnMut(VblkId, &V, &mut BlockState) -> bool,
    {
        let mut slots = self.slots.lock();
        for _ in 0..self.blocks.len() {
            let curs = slots.advance();
            let vblk = &self.blocks[curs];
            if claim(curs, vblk, &mut slots.states[curs]) {
                trace!("[{}] get vblk: {}", self.role, curs);
                return Some(Acquired { index: curs, vblk });
            }
        }
        debug!("[{}] no available vblk", self.role);
        None
    }

    pub fn stats(&self) -> PartitionStats {
        let slots = self.slots.lock();
        let mut stats = PartitionStats::default();
        for state in &slots.states {
            match state {
                BlockState::Free => stats.free += 1,
                BlockState::Reserved => stats.reserved += 1,
                BlockState::Bad => stats.bad += 1,
            }
        }
        stats
    }

    pub fn states(&self) -> Vec<BlockState> {
        self.slots.lock().states.clone()
    }
}

pub struct VblkPool<D: FlashDevice> {
    device: Arc<D>,
    write: Partition<D::Vblk>,
    read: Partition<D::Vblk>,
}

impl<D: FlashDevice> VblkPool<D> {
    /// Take ownership of already allocated vblks. Every handle is freed on
    /// the device when the pool is dropped.
    pub fn from_parts(
        device: Arc<D>,
        write: Vec<(D::Vblk, BlockState)>,
        read: Vec<(D::Vblk, BlockState)>,
    ) -> Self {
        VblkPool {
            device,
            write: Partition::new(Role::Write, write),
            read: Partition::new(Role::Read, read),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn partition(&self, role: Role) -> &Partition<D::Vblk> {
        match role {
            Role::Write => &self.write,
            Role::Read => &self.read,
        }
    }

    /// Claim the next free vblk of the write partition, erasing it first.
    ///
    /// A vblk whose erase fails is marked bad and skipped. Claimed vblks stay
    /// reserved for the rest of the run. `None` means the partition holds no
    /// free vblk anymore.
    pub fn acquire_for_write(&self) -> Option<Acquired<'_, D::Vblk>> {
        let device = &*self.device;
        self.write.scan(|curs, vblk, state| match *state {
            BlockState::Free => match device.erase(vblk) {
                Ok(()) => {
                    *state = BlockState::Reserved;
                    true
                }
                Err(e) => {
                    warn!("[{}] fail to erase vblk {}: {}", Role::Write, curs, e);
                    *state = BlockState::Bad;
                    false
                }
            },
            BlockState::Reserved | BlockState::Bad => false,
        })
    }

    /// Return the next prefilled vblk of the read partition. Reads do not
    /// consume a vblk, so the same one comes back on a later lap.
    pub fn acquire_for_read(&self) -> Option<Acquired<'_, D::Vblk>> {
        self.read
            .scan(|_, _, state| matches!(*state, BlockState::Reserved))
    }

    pub fn acquire(&self, role: Role) -> Option<Acquired<'_, D::Vblk>> {
        match role {
            Role::Write => self.acquire_for_write(),
            Role::Read => self.acquire_for_read(),
        }
    }
}

impl<D: FlashDevice> Drop for VblkPool<D> {
    fn drop(&mut self) {
        let blocks = std::mem::take(&mut self.write.blocks)
            .into_iter()
            .chain(std::mem::take(&mut self.read.blocks));
        let mut freed = 0;
        for vblk in blocks {
            self.device.free(vblk);
            freed += 1;
        }
        debug!("freed {} vblks", freed);
    }
}
