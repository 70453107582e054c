//! Error types for the vblk benchmark

use std::path::PathBuf;

use thiserror::Error;

use crate::config::VblkId;
use crate::worker::Role;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a device backend.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("erase failed on vblk {vblk}")]
    Erase { vblk: VblkId },

    #[error("program failed on vblk {vblk}: {reason}")]
    Program { vblk: VblkId, reason: String },

    #[error("read failed on vblk {vblk}: {reason}")]
    Read { vblk: VblkId, reason: String },

    #[error("invalid address: {0}")]
    Address(String),

    #[error("buffer of {len} bytes does not match vblk size {expected}")]
    BufferSize { len: usize, expected: usize },
}

/// Errors that end a benchmark run
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to open device {}: {source}", .path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: DeviceError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to allocate vblk {vblk} at block {blk_idx}: {source}")]
    BlockAlloc {
        vblk: VblkId,
        blk_idx: usize,
        #[source]
        source: DeviceError,
    },

    #[error("failed to allocate {size} byte I/O buffer")]
    BufferAlloc { size: usize },

    #[error("[{role}] transfer failed on vblk {vblk}: {source}")]
    Transfer {
        role: Role,
        vblk: VblkId,
        #[source]
        source: DeviceError,
    },

    #[error("[{role}] no available vblk after {transfers} transfers")]
    PoolExhausted { role: Role, transfers: usize },

    #[error("[{role}] worker {worker} panicked")]
    WorkerPanicked { role: Role, worker: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
