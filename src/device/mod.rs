//! Block Device Interface
//!
//! The buffer cache moves whole blocks to and from devices through the
//! [`BlockDevice`] trait. Transfers are synchronous: the call returns once
//! the device has completed the operation, and failures are not modelled.
//!
//! - `ramdisk`: a memory-backed device used at boot and by the tests

pub mod ramdisk;

pub use ramdisk::RamDisk;

use crate::config::BSIZE;
use crate::types::{BlockNo, DevNo};

/// Direction of a block transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOp {
    /// Device to memory
    Read,
    /// Memory to device
    Write,
}

impl BlockOp {
    pub const fn is_write(&self) -> bool {
        matches!(self, BlockOp::Write)
    }

    pub const fn from_write(write: bool) -> Self {
        if write {
            BlockOp::Write
        } else {
            BlockOp::Read
        }
    }
}

/// A device that transfers fixed-size blocks
pub trait BlockDevice: Send + Sync {
    /// Move one block between `data` and the device, blocking until done
    fn transfer(&self, dev: DevNo, blockno: BlockNo, data: &mut [u8; BSIZE], op: BlockOp);
}
