//! Block-sized I/O buffers.

use rand::prelude::*;

use crate::error::{Error, Result};

/// The write pattern shared by every writer and the prefill pass.
///
/// Readers never share a target buffer; each one gets its own from
/// [`IoBuffers::scratch`].
#[derive(Debug)]
pub struct IoBuffers {
    write: Vec<u8>,
    block_size: usize,
}

impl IoBuffers {
    pub fn allocate(block_size: usize) -> Result<Self> {
        Ok(IoBuffers {
            write: zeroed(block_size)?,
            block_size,
        })
    }

    /// Fill the write buffer with a pattern derived from `seed`.
    pub fn fill(&mut self, seed: u64) {
        let mut rng = SmallRng::seed_from_u64(seed);
        rng.fill_bytes(&mut self.write);
    }

    pub fn write_buf(&self) -> &[u8] {
        &self.write
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// A fresh read target of one vblk.
    pub fn scratch(&self) -> Result<Vec<u8>> {
        zeroed(self.block_size)
    }
}

fn zeroed(size: usize) -> Result<Vec<u8>> {
    if size == 0 {
        return Err(Error::BufferAlloc { size });
    }
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| Error::BufferAlloc { size })?;
    buf.resize(size, 0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_is_deterministic() {
        let mut a = IoBuffers::allocate(4096).unwrap();
        let mut b = IoBuffers::allocate(4096).unwrap();
        a.fill(7);
        b.fill(7);
        assert_eq!(a.write_buf(), b.write_buf());
        assert!(a.write_buf().iter().any(|&x| x != 0));

        b.fill(8);
        assert_ne!(a.write_buf(), b.write_buf());
    }

    #[test]
    fn scratch_matches_block_size() {
        let bufs = IoBuffers::allocate(512).unwrap();
        assert_eq!(bufs.scratch().unwrap().len(), 512);
        assert_eq!(bufs.block_size(), 512);
    }

    #[test]
    fn zero_sized_allocation_fails() {
        assert!(matches!(
            IoBuffers::allocate(0),
            Err(Error::BufferAlloc { size: 0 })
        ));
    }
}
