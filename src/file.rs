//! File or block-device backend.
//!
//! The target is cut into unit blocks laid out block-major:
//! `offset(unit, block) = (block * total_units + unit) * unit_block_bytes`.
//! A vblk built from consecutive units is therefore one contiguous range.
//! Erase has nothing to do on a plain file and always succeeds.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::Path;

use log::debug;

use crate::device::FlashDevice;
use crate::error::{DeviceError, Error, Result};
use crate::geometry::{Geometry, VirtualBlockAddress};

#[derive(Debug)]
pub struct FileVblk {
    offset: u64,
    len: usize,
}

impl FileVblk {
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

#[derive(Debug)]
pub struct FileDevice {
    file: File,
    geo: Geometry,
}

impl FileDevice {
    /// Open `path` and derive the number of blocks per unit from its size.
    pub fn open(
        path: impl AsRef<Path>,
        nchannels: usize,
        nluns: usize,
        unit_block_bytes: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        let open = |path: &Path| -> std::result::Result<(File, u64), DeviceError> {
            let mut file = OpenOptions::new().read(true).write(true).open(path)?;
            // metadata() reports 0 for block devices
            let len = file.seek(SeekFrom::End(0))?;
            Ok((file, len))
        };
        let (file, len) = open(path).map_err(|source| Error::DeviceOpen {
            path: path.to_path_buf(),
            source,
        })?;

        let stripe = (nchannels * nluns * unit_block_bytes) as u64;
        if stripe == 0 {
            return Err(Error::Config("file geometry has a zero dimension".into()));
        }
        let geo = Geometry {
            nchannels,
            nluns,
            blocks_per_unit: (len / stripe) as usize,
            unit_block_bytes,
        };
        debug!("{}: {} bytes, {:?}", path.display(), len, geo);

        Ok(FileDevice { file, geo })
    }
}

impl FlashDevice for FileDevice {
    type Vblk = FileVblk;

    fn geometry(&self) -> Geometry {
        self.geo
    }

    fn alloc_vblk(&self, addr: &VirtualBlockAddress) -> std::result::Result<FileVblk, DeviceError> {
        let first = addr
            .blocks
            .first()
            .ok_or_else(|| DeviceError::Address("empty vblk address".into()))?;
        let unit_of = |channel: usize, lun: usize| lun * self.geo.nchannels + channel;

        let start = unit_of(first.channel, first.lun);
        for (i, pba) in addr.blocks.iter().enumerate() {
            if pba.block >= self.geo.blocks_per_unit || pba.block != first.block {
                return Err(DeviceError::Address(format!("{:?} out of range", pba)));
            }
            if unit_of(pba.channel, pba.lun) != start + i {
                return Err(DeviceError::Address(format!(
                    "{:?} does not continue a contiguous unit run",
                    pba
                )));
            }
        }
        if start + addr.blocks.len() > self.geo.total_units() {
            return Err(DeviceError::Address("unit run past the device".into()));
        }

        let unit_block = first.block * self.geo.total_units() + start;
        Ok(FileVblk {
            offset: (unit_block * self.geo.unit_block_bytes) as u64,
            len: addr.blocks.len() * self.geo.unit_block_bytes,
        })
    }

    fn erase(&self, _vblk: &FileVblk) -> std::result::Result<(), DeviceError> {
        Ok(())
    }

    fn write(&self, vblk: &FileVblk, buf: &[u8]) -> std::result::Result<(), DeviceError> {
        if buf.len() != vblk.len {
            return Err(DeviceError::BufferSize {
                len: buf.len(),
                expected: vblk.len,
            });
        }
        self.file.write_all_at(buf, vblk.offset)?;
        Ok(())
    }

    fn read(&self, vblk: &FileVblk, buf: &mut [u8]) -> std::result::Result<(), DeviceError> {
        if buf.len() != vblk.len {
            return Err(DeviceError::BufferSize {
                len: buf.len(),
                expected: vblk.len,
            });
        }
        self.file.read_exact_at(buf, vblk.offset)?;
        Ok(())
    }

    fn free(&self, _vblk: FileVblk) {}
}
