//! Device abstraction the pool and workers drive.
//!
//! A backend is opened by its constructor and closed when dropped. Every
//! vblk it hands out must be given back through [`FlashDevice::free`]; the
//! pool does that when it is torn down.

use crate::error::DeviceError;
use crate::geometry::{Geometry, VirtualBlockAddress};

pub trait FlashDevice: Send + Sync {
    /// Handle to one allocated virtual block.
    type Vblk: Send + Sync;

    fn geometry(&self) -> Geometry;

    /// Bind the physical blocks in `addr` into one virtual block.
    fn alloc_vblk(&self, addr: &VirtualBlockAddress) -> Result<Self::Vblk, DeviceError>;

    fn erase(&self, vblk: &Self::Vblk) -> Result<(), DeviceError>;

    /// Program the whole vblk with `buf`.
    fn write(&self, vblk: &Self::Vblk, buf: &[u8]) -> Result<(), DeviceError>;

    /// Read the whole vblk into `buf`.
    fn read(&self, vblk: &Self::Vblk, buf: &mut [u8]) -> Result<(), DeviceError>;

    fn free(&self, vblk: Self::Vblk);
}
