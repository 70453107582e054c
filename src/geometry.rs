//! Parallel-unit and virtual-block addressing.

use crate::config::BaseType;

/// Device geometry as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub nchannels: BaseType,
    pub nluns: BaseType,
    pub blocks_per_unit: BaseType,
    /// Bytes in one physical block of one parallel unit.
    pub unit_block_bytes: BaseType,
}

impl Geometry {
    pub fn total_units(&self) -> BaseType {
        self.nchannels * self.nluns
    }
}

/// One channel/LUN pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParallelUnitAddress {
    pub channel: BaseType,
    pub lun: BaseType,
}

impl ParallelUnitAddress {
    pub fn with_block(self, block: BaseType) -> PhysicalBlockAddress {
        PhysicalBlockAddress {
            channel: self.channel,
            lun: self.lun,
            block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalBlockAddress {
    pub channel: BaseType,
    pub lun: BaseType,
    pub block: BaseType,
}

/// The physical blocks striped into one vblk, all at the same block index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualBlockAddress {
    pub block: BaseType,
    pub blocks: Vec<PhysicalBlockAddress>,
}

/// Spread `count` unit addresses over the channels first, then the LUNs.
pub fn punit_addresses(geo: &Geometry, count: BaseType) -> Vec<ParallelUnitAddress> {
    (0..count)
        .map(|i| ParallelUnitAddress {
            channel: i % geo.nchannels,
            lun: (i / geo.nchannels) % geo.nluns,
        })
        .collect()
}

pub fn vblk_address(block: BaseType, units: &[ParallelUnitAddress]) -> VirtualBlockAddress {
    VirtualBlockAddress {
        block,
        blocks: units.iter().map(|u| u.with_block(block)).collect(),
    }
}

/// Units `[group * width, (group + 1) * width)`.
pub fn unit_group(
    units: &[ParallelUnitAddress],
    group: BaseType,
    width: BaseType,
) -> &[ParallelUnitAddress] {
    &units[group * width..(group + 1) * width]
}
