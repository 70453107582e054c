use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::geometry::Geometry;

pub type BaseType = usize;

pub type VblkId = BaseType;
pub type Counter = BaseType;

pub const DEV_PATH: &str = "/dev/nvme0n1";
// Drive the in-memory model instead of DEV_PATH.
pub const USE_SIMULATOR: bool = true;

// Geometry assumed for DEV_PATH and given to the simulator.
pub const NCHANNELS: BaseType = 16;
pub const NLUNS: BaseType = 8;

// Parallel units taken into account, starting at unit 0.
pub const NR_PUNITS: BaseType = 128;
pub const NR_BLOCKS: BaseType = 1020;

// Number of LUNs striped into one vblk; must not be beyond NR_PUNITS / 2
// when partitions are isolated.
pub const NR_BLKS_IN_VBLK: BaseType = 4;

pub const UNIT_BLOCK_BYTES: BaseType = 16 * 1024 * 1024;

pub const NR_W_THREADS: BaseType = 128;
pub const NR_R_THREADS: BaseType = 0;

pub const NBYTES_TO_WRITE: u64 = 64 * 1024 * 1024 * 1024;
pub const NBYTES_TO_READ: u64 = 64 * 1024 * 1024 * 1024;

pub const PATTERN_SEED: u64 = 7;

/// Which device backend the benchmark drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Simulated,
    File(PathBuf),
}

/// How allocated vblks are split between the write and read partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionLayout {
    /// The first `write_partition_vblks` allocations feed the write partition.
    #[default]
    Sequential,
    /// The lower half of the unit groups feeds the write partition, the upper
    /// half feeds the read partition, so readers and writers never share a LUN.
    Isolated,
}

/// Whether the write and read roles overlap in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phasing {
    #[default]
    Concurrent,
    WriteThenRead,
}

/// What the remaining workers do once one of them hits a fatal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Raise the stop flag; the others quit at their next iteration.
    #[default]
    AbortRun,
    /// Let the others run to completion, then report the first failure.
    LetFinish,
}

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub backend: Backend,
    pub nr_punits: BaseType,
    pub nr_blocks: BaseType,
    pub nr_blks_in_vblk: BaseType,
    pub layout: PartitionLayout,
    /// `None` gives half of all vblks to the write partition.
    pub write_partition_vblks: Option<BaseType>,
    pub nr_w_threads: BaseType,
    pub nr_r_threads: BaseType,
    pub nbytes_to_write: u64,
    pub nbytes_to_read: u64,
    pub phasing: Phasing,
    pub failure_policy: FailurePolicy,
    pub exhaustion_is_fatal: bool,
    /// Refuse per-worker volumes that are not a whole number of vblks.
    pub require_aligned_io: bool,
    pub pattern_seed: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            backend: if USE_SIMULATOR {
                Backend::Simulated
            } else {
                Backend::File(PathBuf::from(DEV_PATH))
            },
            nr_punits: NR_PUNITS,
            nr_blocks: NR_BLOCKS,
            nr_blks_in_vblk: NR_BLKS_IN_VBLK,
            layout: PartitionLayout::default(),
            write_partition_vblks: None,
            nr_w_threads: NR_W_THREADS,
            nr_r_threads: NR_R_THREADS,
            nbytes_to_write: NBYTES_TO_WRITE,
            nbytes_to_read: NBYTES_TO_READ,
            phasing: Phasing::default(),
            failure_policy: FailurePolicy::default(),
            exhaustion_is_fatal: true,
            require_aligned_io: true,
            pattern_seed: PATTERN_SEED,
        }
    }
}

impl BenchConfig {
    /// Number of unit groups, i.e. vblks allocated per block index.
    pub fn groups(&self) -> BaseType {
        if self.nr_blks_in_vblk == 0 {
            return 0;
        }
        self.nr_punits / self.nr_blks_in_vblk
    }

    /// Blocks per unit actually used on a device with the given geometry.
    pub fn blocks_per_unit(&self, geo: &Geometry) -> BaseType {
        self.nr_blocks.min(geo.blocks_per_unit)
    }

    pub fn total_vblks(&self, geo: &Geometry) -> BaseType {
        self.blocks_per_unit(geo) * self.groups()
    }

    pub fn bytes_per_vblk(&self, geo: &Geometry) -> u64 {
        self.nr_blks_in_vblk as u64 * geo.unit_block_bytes as u64
    }

    pub fn write_partition_size(&self, geo: &Geometry) -> BaseType {
        let total = self.total_vblks(geo);
        match self.layout {
            PartitionLayout::Sequential => self.write_partition_vblks.unwrap_or(total / 2),
            PartitionLayout::Isolated => self.blocks_per_unit(geo) * (self.groups() / 2),
        }
    }

    pub fn read_partition_size(&self, geo: &Geometry) -> BaseType {
        self.total_vblks(geo)
            .saturating_sub(self.write_partition_size(geo))
    }

    pub fn write_bytes_per_worker(&self) -> u64 {
        match self.nr_w_threads {
            0 => 0,
            n => self.nbytes_to_write / n as u64,
        }
    }

    pub fn read_bytes_per_worker(&self) -> u64 {
        match self.nr_r_threads {
            0 => 0,
            n => self.nbytes_to_read / n as u64,
        }
    }

    pub fn has_read_workload(&self) -> bool {
        self.nr_r_threads > 0 && self.nbytes_to_read > 0
    }

    pub fn validate(&self, geo: &Geometry) -> Result<()> {
        if self.nr_punits == 0 {
            return Err(Error::Config("nr_punits must be > 0".into()));
        }
        if self.nr_blks_in_vblk == 0 {
            return Err(Error::Config("nr_blks_in_vblk must be > 0".into()));
        }
        if self.nr_blks_in_vblk > self.nr_punits {
            return Err(Error::Config(format!(
                "nr_blks_in_vblk ({}) exceeds nr_punits ({})",
                self.nr_blks_in_vblk, self.nr_punits
            )));
        }
        if self.nr_punits > geo.total_units() {
            return Err(Error::Config(format!(
                "nr_punits ({}) exceeds the {} parallel units of the device",
                self.nr_punits,
                geo.total_units()
            )));
        }
        if self.layout == PartitionLayout::Isolated && self.groups() < 2 {
            return Err(Error::Config(
                "isolated partitions need at least two unit groups".into(),
            ));
        }
        if let (PartitionLayout::Sequential, Some(n)) = (self.layout, self.write_partition_vblks) {
            if n > self.total_vblks(geo) {
                return Err(Error::Config(format!(
                    "write partition of {} vblks exceeds the pool of {}",
                    n,
                    self.total_vblks(geo)
                )));
            }
        }

        let bpb = self.bytes_per_vblk(geo);
        if bpb == 0 {
            return Err(Error::Config("vblk size is zero".into()));
        }
        if self.require_aligned_io {
            if self.write_bytes_per_worker() % bpb != 0 {
                return Err(Error::Config(format!(
                    "write size per worker ({}) is not aligned to the vblk size ({})",
                    self.write_bytes_per_worker(),
                    bpb
                )));
            }
            if self.read_bytes_per_worker() % bpb != 0 {
                return Err(Error::Config(format!(
                    "read size per worker ({}) is not aligned to the vblk size ({})",
                    self.read_bytes_per_worker(),
                    bpb
                )));
            }
        }
        Ok(())
    }
}
