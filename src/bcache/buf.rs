//! Buffer slots and the checkout handle
//!
//! A [`BufSlot`] is one entry of the cache arena. Its identity and reference
//! count belong to the shard whose list it is on and are only changed with
//! that shard's lock held; the pin count is changed under the cache-wide
//! pin lock; the payload is behind the slot's sleep lock.
//!
//! A [`Buf`] is a checked-out buffer: it holds one reference and the sleep
//! lock. Dropping it releases both, lock first, so a buffer can never be
//! written or released by someone who does not hold it.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::Bcache;
use crate::config::BSIZE;
use crate::kern::lock::{SleepLock, SleepLockGuard};
use crate::types::{BlockNo, DevNo, NODEV};

/// Block payload
pub type BlockData = [u8; BSIZE];

/// One arena entry
#[derive(Debug)]
pub(super) struct BufSlot {
    dev: AtomicU32,
    blockno: AtomicU32,
    refcnt: AtomicU32,
    pins: AtomicU32,
    /// Has data been read from disk?
    valid: AtomicBool,
    data: SleepLock<BlockData>,
}

impl BufSlot {
    pub(super) fn new() -> Self {
        Self {
            dev: AtomicU32::new(NODEV),
            blockno: AtomicU32::new(0),
            refcnt: AtomicU32::new(0),
            pins: AtomicU32::new(0),
            valid: AtomicBool::new(false),
            data: SleepLock::new([0; BSIZE], "buffer"),
        }
    }

    pub(super) fn is(&self, dev: DevNo, blockno: BlockNo) -> bool {
        self.dev.load(Ordering::Relaxed) == dev && self.blockno.load(Ordering::Relaxed) == blockno
    }

    /// Neither checked out nor pinned
    pub(super) fn is_reusable(&self) -> bool {
        self.refcnt.load(Ordering::Relaxed) == 0 && self.pins.load(Ordering::Relaxed) == 0
    }

    /// Never held a block, or parked after losing an install race
    pub(super) fn is_unused(&self) -> bool {
        self.dev.load(Ordering::Relaxed) == NODEV
    }

    /// Give the slot a new identity with one reference and no content
    pub(super) fn stamp(&self, dev: DevNo, blockno: BlockNo) {
        self.dev.store(dev, Ordering::Relaxed);
        self.blockno.store(blockno, Ordering::Relaxed);
        self.valid.store(false, Ordering::Relaxed);
        self.refcnt.store(1, Ordering::Relaxed);
    }

    /// Clear the identity of an unreferenced slot
    pub(super) fn park(&self) {
        self.dev.store(NODEV, Ordering::Relaxed);
        self.blockno.store(0, Ordering::Relaxed);
        self.valid.store(false, Ordering::Relaxed);
        self.refcnt.store(0, Ordering::Relaxed);
    }

    pub(super) fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Relaxed)
    }

    pub(super) fn get(&self) {
        self.refcnt.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn put(&self) {
        if self.refcnt.fetch_sub(1, Ordering::Relaxed) == 0 {
            log::error!("brelse: reference count underflow");
            panic!("brelse: refcnt");
        }
    }

    #[cfg(test)]
    pub(super) fn pins(&self) -> u32 {
        self.pins.load(Ordering::Relaxed)
    }

    pub(super) fn pin(&self) {
        self.pins.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn unpin(&self) {
        if self.pins.fetch_sub(1, Ordering::Relaxed) == 0 {
            log::error!("bunpin: pin count underflow");
            panic!("bunpin");
        }
    }

    pub(super) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(super) fn set_valid(&self) {
        self.valid.store(true, Ordering::Release);
    }

    pub(super) fn lock(&self) -> SleepLockGuard<'_, BlockData> {
        self.data.lock()
    }
}

// ============================================================================
// Checkout handle
// ============================================================================

/// A locked buffer holding the contents of one block
pub struct Buf<'a> {
    pub(super) cache: &'a Bcache,
    pub(super) index: usize,
    pub(super) dev: DevNo,
    pub(super) blockno: BlockNo,
    pub(super) data: ManuallyDrop<SleepLockGuard<'a, BlockData>>,
}

impl<'a> Buf<'a> {
    /// Device the block lives on
    pub fn dev(&self) -> DevNo {
        self.dev
    }

    /// Block number on the device
    pub fn blockno(&self) -> BlockNo {
        self.blockno
    }

    /// Write the buffer's contents to disk
    pub fn write(&mut self) {
        let cache = self.cache;
        cache.write(self);
    }

    /// Give the buffer back to the cache
    pub fn release(self) {}
}

impl<'a> Deref for Buf<'a> {
    type Target = BlockData;

    fn deref(&self) -> &BlockData {
        &self.data
    }
}

impl<'a> DerefMut for Buf<'a> {
    fn deref_mut(&mut self) -> &mut BlockData {
        &mut self.data
    }
}

impl<'a> core::fmt::Debug for Buf<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buf")
            .field("index", &self.index)
            .field("dev", &self.dev)
            .field("blockno", &self.blockno)
            .finish()
    }
}

impl<'a> Drop for Buf<'a> {
    fn drop(&mut self) {
        // Sleep lock first, then the reference under the shard lock
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.cache.brelse(self.index, self.blockno);
    }
}

/// A pin on a buffer, keeping it resident until unpinned
///
/// Dropping the handle unpins.
pub struct PinnedBlock<'a> {
    pub(super) cache: &'a Bcache,
    pub(super) index: usize,
}

impl<'a> PinnedBlock<'a> {
    /// Arena slot being held
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<'a> Drop for PinnedBlock<'a> {
    fn drop(&mut self) {
        self.cache.bunpin(self.index);
    }
}
