//! Sequential throughput benchmark over virtual blocks of a flash device.
//!
//! A [`pool::VblkPool`] hands out erased vblks to writer threads and
//! prefilled vblks to reader threads; [`bench::run`] times both roles.

pub mod bench;
pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod file;
pub mod geometry;
pub mod init;
pub mod pool;
pub mod sim;
pub mod worker;

pub use bench::{execute, BenchReport, RoleReport};
pub use config::BenchConfig;
pub use device::FlashDevice;
pub use error::{DeviceError, Error, Result};
pub use pool::{BlockState, VblkPool};
pub use worker::Role;
