//! Common types used across memcore
//!
//! This module defines shared types to avoid circular dependencies.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::PGSIZE;

/// Device number
pub type DevNo = u32;

/// Block number on a device
pub type BlockNo = u32;

/// User virtual address
pub type VirtAddr = u64;

/// Physical address
pub type PhysAddr = u64;

/// "No device" marker carried by buffers that have never held a block
pub const NODEV: DevNo = u32::MAX;

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pid(pub u32);

impl Pid {
    /// Create a new process ID with a unique auto-incremented value
    pub fn new() -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        Pid(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Round an address down to its page boundary
#[inline]
pub const fn pg_round_down(addr: u64) -> u64 {
    addr & !(PGSIZE as u64 - 1)
}

/// Round a size or address up to the next page boundary
#[inline]
pub const fn pg_round_up(addr: u64) -> u64 {
    (addr + PGSIZE as u64 - 1) & !(PGSIZE as u64 - 1)
}

/// [`pg_round_up`] that reports overflow instead of wrapping
#[inline]
pub const fn pg_round_up_checked(addr: u64) -> Option<u64> {
    match addr.checked_add(PGSIZE as u64 - 1) {
        Some(a) => Some(a & !(PGSIZE as u64 - 1)),
        None => None,
    }
}
