//! Buffer cache
//!
//! The buffer cache is a fixed arena of block buffers holding cached copies
//! of disk block contents. Caching blocks in memory reduces the number of
//! disk reads and provides a synchronization point for blocks used by more
//! than one thread.
//!
//! ## Interface
//!
//! - [`Bcache::read`] returns a locked [`Buf`] with the block's contents
//! - [`Buf::write`] (or [`Bcache::write`]) writes the contents to disk
//! - dropping the `Buf` (or [`Bcache::release`]) gives it back
//! - only one thread at a time can hold a buffer, so do not keep them
//!   longer than necessary
//!
//! ## Sharding
//!
//! Buffers are spread over `nbucket` shards keyed by `blockno % nbucket`.
//! A lookup takes only its target shard's lock. On a miss the target shard
//! is searched for an unreferenced buffer first; only then are the other
//! shards visited, one lock at a time, for a buffer to take over. Searching
//! locally first keeps two threads missing on the same block from each
//! installing a copy in a different shard.
//!
//! Running out of buffers halts the kernel: the pool is fixed and shared by
//! everything, and there is no safe way to continue.

mod buf;
mod shard;

pub use buf::{BlockData, Buf, PinnedBlock};

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem::ManuallyDrop;

use log::{error, trace};
use spin::{Mutex, Once};

use self::buf::BufSlot;
use self::shard::Shard;
use crate::config::BcacheConfig;
use crate::counter;
use crate::device::{BlockDevice, BlockOp};
use crate::error::KernResult;
use crate::kern::counters::{BcacheSnapshot, BcacheStats};
use crate::kern::queue::{QueueChain, QueueHead};
use crate::types::{BlockNo, DevNo, NODEV};

// ============================================================================
// Bcache
// ============================================================================

/// A sharded, fixed-capacity block cache
pub struct Bcache {
    device: Arc<dyn BlockDevice>,
    slots: Box<[BufSlot]>,
    chains: Box<[QueueChain]>,
    shards: Box<[Shard]>,
    /// Serializes pin count updates
    pin_lock: Mutex<()>,
    stats: BcacheStats,
}

impl Bcache {
    /// Create a cache over `device`
    ///
    /// Every buffer starts parked in shard 0 without an identity.
    pub fn new(device: Arc<dyn BlockDevice>, config: BcacheConfig) -> KernResult<Self> {
        config.validate()?;

        let slots: Vec<BufSlot> = (0..config.nbuf).map(|_| BufSlot::new()).collect();
        let chains: Vec<QueueChain> = (0..config.nbuf).map(|_| QueueChain::new()).collect();
        let shards: Vec<Shard> = (0..config.nbucket).map(|_| Shard::new()).collect();

        let cache = Self {
            device,
            slots: slots.into_boxed_slice(),
            chains: chains.into_boxed_slice(),
            shards: shards.into_boxed_slice(),
            pin_lock: Mutex::new(()),
            stats: BcacheStats::new(),
        };

        {
            let mut list = cache.shards[0].lock();
            for idx in 0..config.nbuf {
                list.enqueue_tail(&cache.chains, idx);
            }
        }

        Ok(cache)
    }

    /// Number of buffers in the arena
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of shards
    pub fn nbucket(&self) -> usize {
        self.shards.len()
    }

    fn shard_of(&self, blockno: BlockNo) -> usize {
        blockno as usize % self.shards.len()
    }

    /// Return a locked buffer with the contents of the indicated block
    pub fn read(&self, dev: DevNo, blockno: BlockNo) -> Buf<'_> {
        assert_ne!(dev, NODEV, "bread: reserved device number");

        let index = self.bget(dev, blockno);
        let slot = &self.slots[index];

        // Never under a shard lock
        let mut data = slot.lock();
        if !slot.is_valid() {
            self.device
                .transfer(dev, blockno, &mut data, BlockOp::Read);
            counter!(self.stats.disk_reads);
            slot.set_valid();
        }

        Buf {
            cache: self,
            index,
            dev,
            blockno,
            data: ManuallyDrop::new(data),
        }
    }

    /// Write a buffer's contents to disk
    ///
    /// Holding a `Buf` means holding its lock, so the buffer is always
    /// locked here.
    pub fn write(&self, b: &mut Buf<'_>) {
        debug_assert!(core::ptr::eq(self, b.cache), "bwrite: buffer from another cache");
        self.device
            .transfer(b.dev, b.blockno, &mut b.data, BlockOp::Write);
        counter!(self.stats.disk_writes);
    }

    /// Release a locked buffer
    pub fn release(&self, b: Buf<'_>) {
        debug_assert!(core::ptr::eq(self, b.cache), "brelse: buffer from another cache");
        drop(b);
    }

    /// Keep a checked-out buffer resident after it is released
    pub fn pin(&self, b: &Buf<'_>) -> PinnedBlock<'_> {
        debug_assert!(core::ptr::eq(self, b.cache), "bpin: buffer from another cache");
        let _guard = self.pin_lock.lock();
        self.slots[b.index].pin();
        PinnedBlock {
            cache: self,
            index: b.index,
        }
    }

    /// Drop a pin taken with [`Bcache::pin`]
    pub fn unpin(&self, pin: PinnedBlock<'_>) {
        drop(pin);
    }

    /// Cache counters
    pub fn stats(&self) -> BcacheSnapshot {
        self.stats.snapshot()
    }

    /// Number of resident copies of a block (0 or 1)
    pub fn residency(&self, dev: DevNo, blockno: BlockNo) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let list = shard.lock();
                list.iter(&self.chains)
                    .filter(|&idx| self.slots[idx].is(dev, blockno))
                    .count()
            })
            .sum()
    }

    /// Reference count of a resident block
    pub fn refcount(&self, dev: DevNo, blockno: BlockNo) -> Option<u32> {
        let list = self.shards[self.shard_of(blockno)].lock();
        self.lookup(&list, dev, blockno)
            .map(|idx| self.slots[idx].refcnt())
    }

    /// Number of buffers on each shard's list
    pub fn shard_occupancy(&self) -> Vec<usize> {
        self.shards.iter().map(|shard| shard.lock().len()).collect()
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    fn lookup(&self, list: &QueueHead, dev: DevNo, blockno: BlockNo) -> Option<usize> {
        list.iter(&self.chains)
            .find(|&idx| self.slots[idx].is(dev, blockno))
    }

    /// A buffer on the list nobody references
    ///
    /// Buffers without a block are taken first; otherwise the one nearest
    /// the tail, where the oldest installs sit.
    fn find_reusable(&self, list: &QueueHead) -> Option<usize> {
        let mut cached = None;
        for idx in list.iter_rev(&self.chains) {
            let slot = &self.slots[idx];
            if !slot.is_reusable() {
                continue;
            }
            if slot.is_unused() {
                return Some(idx);
            }
            cached.get_or_insert(idx);
        }
        cached
    }

    /// Look through the cache for a block. If not found, allocate a buffer.
    /// Either way, return its arena index with one reference taken.
    fn bget(&self, dev: DevNo, blockno: BlockNo) -> usize {
        let target = self.shard_of(blockno);

        {
            let list = self.shards[target].lock();

            if let Some(idx) = self.lookup(&list, dev, blockno) {
                self.slots[idx].get();
                counter!(self.stats.hits);
                trace!("bget: hit dev {} block {} in slot {}", dev, blockno, idx);
                return idx;
            }
            counter!(self.stats.misses);

            // Reuse from the target shard before looking anywhere else
            if let Some(idx) = self.find_reusable(&list) {
                self.slots[idx].stamp(dev, blockno);
                counter!(self.stats.local_reuse);
                trace!("bget: reuse slot {} in shard {} for block {}", idx, target, blockno);
                return idx;
            }
        }

        let stolen = (0..self.shards.len())
            .filter(|&i| i != target)
            .find_map(|i| {
                let mut list = self.shards[i].lock();
                let idx = self.find_reusable(&list)?;
                list.remove(&self.chains, idx);
                self.slots[idx].stamp(dev, blockno);
                trace!("bget: take slot {} from shard {} for block {}", idx, i, blockno);
                Some(idx)
            });

        let idx = match stolen {
            Some(idx) => idx,
            None => {
                error!("bget: all {} buffers in use", self.slots.len());
                panic!("bget: no buffers");
            }
        };

        self.install(target, idx, dev, blockno)
    }

    /// Put a buffer taken from another shard on the target shard's list
    ///
    /// Another thread may have installed the block while no lock was held;
    /// then the stolen buffer is parked and the existing copy is returned.
    fn install(&self, target: usize, idx: usize, dev: DevNo, blockno: BlockNo) -> usize {
        let mut list = self.shards[target].lock();

        if let Some(existing) = self.lookup(&list, dev, blockno) {
            self.slots[existing].get();
            self.slots[idx].park();
            list.enqueue_tail(&self.chains, idx);
            trace!("bget: lost install race for block {}, parked slot {}", blockno, idx);
            return existing;
        }

        list.enqueue_head(&self.chains, idx);
        counter!(self.stats.steals);
        idx
    }

    /// Drop one reference; the buffer's sleep lock is already released
    fn brelse(&self, index: usize, blockno: BlockNo) {
        let _list = self.shards[self.shard_of(blockno)].lock();
        self.slots[index].put();
    }

    fn bunpin(&self, index: usize) {
        let _guard = self.pin_lock.lock();
        self.slots[index].unpin();
    }

    #[cfg(test)]
    fn pins(&self, index: usize) -> u32 {
        self.slots[index].pins()
    }
}

impl core::fmt::Debug for Bcache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bcache")
            .field("nbuf", &self.slots.len())
            .field("nbucket", &self.shards.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

// ============================================================================
// Global State
// ============================================================================

static BCACHE: Once<Bcache> = Once::new();

/// Initialize the kernel's block cache
///
/// Later calls return the cache built by the first one.
pub fn init(device: Arc<dyn BlockDevice>, config: BcacheConfig) -> KernResult<&'static Bcache> {
    if let Some(cache) = BCACHE.get() {
        return Ok(cache);
    }
    let cache = Bcache::new(device, config)?;
    Ok(BCACHE.call_once(|| cache))
}

/// Get the kernel's block cache, if initialized
pub fn bcache() -> Option<&'static Bcache> {
    BCACHE.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BSIZE;
    use crate::device::RamDisk;

    fn cache(nbuf: usize, nbucket: usize) -> (Arc<RamDisk>, Bcache) {
        let disk = Arc::new(RamDisk::new());
        let cache = Bcache::new(disk.clone(), BcacheConfig::new(nbuf, nbucket)).unwrap();
        (disk, cache)
    }

    #[test]
    fn test_initial_layout() {
        let (_, cache) = cache(6, 3);
        assert_eq!(cache.capacity(), 6);
        assert_eq!(cache.nbucket(), 3);
        assert_eq!(cache.shard_occupancy(), [6, 0, 0]);
    }

    #[test]
    fn test_bad_config() {
        let disk = Arc::new(RamDisk::new());
        assert!(Bcache::new(disk, BcacheConfig::new(0, 1)).is_err());
    }

    #[test]
    fn test_read_returns_disk_contents() {
        let (disk, cache) = cache(4, 2);
        disk.preload(1, 5, b"hello");

        let b = cache.read(1, 5);
        assert_eq!(&b[..5], b"hello");
        assert_eq!(b.dev(), 1);
        assert_eq!(b.blockno(), 5);
        assert_eq!(cache.refcount(1, 5), Some(1));
        drop(b);

        assert_eq!(cache.refcount(1, 5), Some(0));
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn test_cache_hit_reads_once() {
        let (disk, cache) = cache(4, 2);

        cache.release(cache.read(1, 5));
        cache.release(cache.read(1, 5));

        assert_eq!(disk.reads(), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.disk_reads, 1);
    }

    #[test]
    fn test_write_reaches_disk() {
        let (disk, cache) = cache(4, 2);

        let mut b = cache.read(2, 9);
        b[0] = 0x5a;
        b[BSIZE - 1] = 0xa5;
        b.write();
        b.release();

        let block = disk.block(2, 9);
        assert_eq!(block[0], 0x5a);
        assert_eq!(block[BSIZE - 1], 0xa5);
        assert_eq!(cache.stats().disk_writes, 1);
    }

    #[test]
    fn test_steal_then_local_reuse() {
        // Everything starts in shard 0, so block 1 must be taken from there
        let (_, cache) = cache(2, 2);

        cache.read(1, 1).release();
        assert_eq!(cache.stats().steals, 1);
        assert_eq!(cache.shard_occupancy(), [1, 1]);

        // Block 3 maps to shard 1 too and reuses block 1's buffer in place
        cache.read(1, 3).release();
        let stats = cache.stats();
        assert_eq!(stats.local_reuse, 1);
        assert_eq!(stats.steals, 1);
        assert_eq!(cache.residency(1, 1), 0);
        assert_eq!(cache.residency(1, 3), 1);
        assert_eq!(cache.shard_occupancy(), [1, 1]);
    }

    #[test]
    fn test_lost_install_race_parks_buffer() {
        let (_, cache) = cache(2, 2);
        cache.read(1, 1).release();
        let resident = cache.lookup(&cache.shards[1].lock(), 1, 1).unwrap();

        // a second miss on block 1 takes the other buffer out of shard 0
        // while the first copy is already on shard 1
        let stolen = {
            let mut list = cache.shards[0].lock();
            let idx = cache.find_reusable(&list).unwrap();
            list.remove(&cache.chains, idx);
            cache.slots[idx].stamp(1, 1);
            idx
        };

        assert_eq!(cache.install(1, stolen, 1, 1), resident);
        assert_eq!(cache.residency(1, 1), 1);
        assert_eq!(cache.refcount(1, 1), Some(1));
        assert!(cache.slots[stolen].is_unused());
        assert!(cache.slots[stolen].is_reusable());
        assert_eq!(cache.shard_occupancy(), [0, 2]);
        assert_eq!(cache.stats().steals, 1);

        cache.brelse(resident, 1);
        assert_eq!(cache.refcount(1, 1), Some(0));

        // the parked buffer is the next one handed out on shard 1
        let b = cache.read(1, 3);
        assert_eq!(b.index, stolen);
        assert_eq!(cache.residency(1, 1), 1);
    }

    #[test]
    fn test_reuse_invalidates_contents() {
        let (disk, cache) = cache(1, 1);
        disk.preload(1, 0, b"zero");
        disk.preload(1, 1, b"one");

        cache.read(1, 0).release();
        let b = cache.read(1, 1);
        assert_eq!(&b[..3], b"one");
        drop(b);
        assert_eq!(disk.reads(), 2);
    }

    #[test]
    fn test_same_block_twice_shares_buffer() {
        let (_, cache) = cache(4, 2);
        let b = cache.read(1, 4);
        let idx = b.index;
        drop(b);
        let b = cache.read(1, 4);
        assert_eq!(b.index, idx);
    }

    #[test]
    fn test_pin_survives_release() {
        let (_, cache) = cache(1, 1);

        let b = cache.read(1, 1);
        let pin = cache.pin(&b);
        assert_eq!(cache.pins(pin.index()), 1);
        drop(b);

        assert_eq!(cache.refcount(1, 1), Some(0));
        cache.unpin(pin);
        assert_eq!(cache.pins(0), 0);

        // Now the only buffer can be reused
        cache.read(1, 2).release();
        assert_eq!(cache.residency(1, 1), 0);
    }

    #[test]
    #[should_panic(expected = "bget: no buffers")]
    fn test_pinned_buffer_not_reused() {
        let (_, cache) = cache(1, 1);

        let b = cache.read(1, 1);
        let _pin = cache.pin(&b);
        drop(b);

        let _ = cache.read(1, 2);
    }

    #[test]
    #[should_panic(expected = "bget: no buffers")]
    fn test_exhaustion_halts() {
        let (_, cache) = cache(3, 2);

        let _held: Vec<Buf<'_>> = (0..3).map(|n| cache.read(1, n)).collect();
        let _ = cache.read(1, 100);
    }

    #[test]
    fn test_global_init_is_idempotent() {
        let disk = Arc::new(RamDisk::new());
        let first = init(disk.clone(), BcacheConfig::default()).unwrap();
        let second = init(disk, BcacheConfig::new(1, 1)).unwrap();
        assert!(core::ptr::eq(first, second));
        assert!(core::ptr::eq(bcache().unwrap(), first));
        assert_eq!(first.capacity(), crate::config::NBUF);
    }
}
