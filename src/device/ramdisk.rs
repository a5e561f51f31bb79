//! Memory-backed block device
//!
//! Blocks that were never written read back as zeros. The disk keeps
//! per-direction transfer counts and refuses (by halting) overlapping
//! transfers of the same block, which would mean two holders of one buffer.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};

use spin::Mutex;

use super::{BlockDevice, BlockOp};
use crate::config::BSIZE;
use crate::kern::counters::Counter;
use crate::types::{BlockNo, DevNo};

type Block = Box<[u8; BSIZE]>;

/// An in-memory disk covering any number of device numbers
#[derive(Debug)]
pub struct RamDisk {
    blocks: Mutex<BTreeMap<(DevNo, BlockNo), Block>>,
    in_flight: Mutex<BTreeSet<(DevNo, BlockNo)>>,
    reads: Counter,
    writes: Counter,
}

impl RamDisk {
    /// Create an empty disk
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(BTreeMap::new()),
            in_flight: Mutex::new(BTreeSet::new()),
            reads: Counter::new("ramdisk_reads"),
            writes: Counter::new("ramdisk_writes"),
        }
    }

    /// Store `data` at the start of a block without going through a transfer
    pub fn preload(&self, dev: DevNo, blockno: BlockNo, data: &[u8]) {
        let mut block = Box::new([0u8; BSIZE]);
        let n = data.len().min(BSIZE);
        block[..n].copy_from_slice(&data[..n]);
        self.blocks.lock().insert((dev, blockno), block);
    }

    /// Copy of a block's current contents
    pub fn block(&self, dev: DevNo, blockno: BlockNo) -> [u8; BSIZE] {
        self.blocks
            .lock()
            .get(&(dev, blockno))
            .map(|b| **b)
            .unwrap_or([0u8; BSIZE])
    }

    /// Number of device reads served
    pub fn reads(&self) -> u64 {
        self.reads.get()
    }

    /// Number of device writes served
    pub fn writes(&self) -> u64 {
        self.writes.get()
    }
}

impl Default for RamDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for RamDisk {
    fn transfer(&self, dev: DevNo, blockno: BlockNo, data: &mut [u8; BSIZE], op: BlockOp) {
        let key = (dev, blockno);
        if !self.in_flight.lock().insert(key) {
            panic!("ramdisk: overlapping transfer of block {} on dev {}", blockno, dev);
        }

        match op {
            BlockOp::Read => {
                self.reads.inc();
                match self.blocks.lock().get(&key) {
                    Some(block) => data.copy_from_slice(&block[..]),
                    None => data.fill(0),
                }
            }
            BlockOp::Write => {
                self.writes.inc();
                self.blocks.lock().insert(key, Box::new(*data));
            }
        }

        self.in_flight.lock().remove(&key);
    }
}
