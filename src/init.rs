//! One-time construction of the vblk pool.

use std::sync::Arc;

use byte_unit::Byte;
use log::{debug, info, trace, warn};

use crate::buffer::IoBuffers;
use crate::config::{BenchConfig, Counter, PartitionLayout};
use crate::device::FlashDevice;
use crate::error::{Error, Result};
use crate::geometry::{punit_addresses, unit_group, vblk_address};
use crate::pool::{BlockState, VblkPool};
use crate::worker::Role;

/// Validate `cfg` against the device geometry, then [`populate`] the pool.
pub fn initialize<D: FlashDevice>(
    device: Arc<D>,
    cfg: &BenchConfig,
    bufs: &IoBuffers,
) -> Result<VblkPool<D>> {
    cfg.validate(&device.geometry())?;
    populate(device, cfg, bufs)
}

/// Allocate every vblk of the configured layout and split them between the
/// partitions. `cfg` must already be validated for the device.
///
/// Write vblks start free and are erased only when a writer claims them.
/// When a read workload is configured, read vblks are erased and programmed
/// with the write pattern up to the read volume; the rest stay free. Any
/// allocation failure aborts the whole construction.
pub fn populate<D: FlashDevice>(
    device: Arc<D>,
    cfg: &BenchConfig,
    bufs: &IoBuffers,
) -> Result<VblkPool<D>> {
    let geo = device.geometry();
    let width = cfg.nr_blks_in_vblk;
    let groups = cfg.groups();
    let blocks_per_unit = cfg.blocks_per_unit(&geo);
    let write_size = cfg.write_partition_size(&geo);
    let bpb = cfg.bytes_per_vblk(&geo);
    let prefill_target = if cfg.has_read_workload() {
        (cfg.nbytes_to_read / bpb) as Counter
    } else {
        0
    };

    info!(
        "allocating {} vblks of {} ({} units, {} per vblk, {} blocks per unit)",
        cfg.total_vblks(&geo),
        Byte::from_bytes(bpb as u128).get_appropriate_unit(true),
        cfg.nr_punits,
        width,
        blocks_per_unit
    );
    debug!("up to {} vblks prefilled for read", prefill_target);

    let units = punit_addresses(&geo, cfg.nr_punits);
    let mut write = Vec::with_capacity(write_size);
    let mut read = Vec::with_capacity(cfg.read_partition_size(&geo));
    let mut prefilled: Counter = 0;

    for blk_idx in 0..blocks_per_unit {
        trace!("blk_idx: {}", blk_idx);
        for group in 0..groups {
            let addr = vblk_address(blk_idx, unit_group(&units, group, width));
            let vblk = match device.alloc_vblk(&addr) {
                Ok(vblk) => vblk,
                Err(source) => {
                    let vblk = write.len() + read.len();
                    for (v, _) in write.into_iter().chain(read) {
                        device.free(v);
                    }
                    return Err(Error::BlockAlloc {
                        vblk,
                        blk_idx,
                        source,
                    });
                }
            };

            let for_write = match cfg.layout {
                PartitionLayout::Sequential => write.len() < write_size,
                PartitionLayout::Isolated => group < groups / 2,
            };
            if for_write {
                write.push((vblk, BlockState::Free));
                continue;
            }

            let state = if prefilled < prefill_target {
                let state = prefill(&*device, &vblk, read.len(), bufs);
                if state == BlockState::Reserved {
                    prefilled += 1;
                }
                state
            } else {
                BlockState::Free
            };
            read.push((vblk, state));
        }
    }

    if prefilled < prefill_target {
        warn!(
            "[{}] only {} of {} vblks prefilled; readers will run out early",
            Role::Read,
            prefilled,
            prefill_target
        );
    }

    let pool = VblkPool::from_parts(device, write, read);
    for role in [Role::Write, Role::Read] {
        info!("[{}] partition: {}", role, pool.partition(role).stats());
    }
    Ok(pool)
}

fn prefill<D: FlashDevice>(
    device: &D,
    vblk: &D::Vblk,
    index: usize,
    bufs: &IoBuffers,
) -> BlockState {
    if let Err(e) = device.erase(vblk) {
        warn!("[{}] fail to erase vblk {}: {}", Role::Read, index, e);
        return BlockState::Bad;
    }
    if let Err(e) = device.write(vblk, bufs.write_buf()) {
        warn!("[{}] fail to prefill vblk {}: {}", Role::Read, index, e);
        return BlockState::Bad;
    }
    BlockState::Reserved
}
