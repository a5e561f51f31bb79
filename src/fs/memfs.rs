//! In-memory file system
//!
//! Files are byte vectors keyed by inode number. Writes are only accepted
//! inside a transaction and never larger than one transaction can carry,
//! so callers that get the bracket or the chunking wrong halt here. A write
//! limit can be set to make every write come up short.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use spin::Mutex;

use super::{File, FileTxWriter, Ino};
use crate::kern::counters::Counter;

/// Memory-backed file store
#[derive(Debug)]
pub struct MemFs {
    files: Mutex<BTreeMap<Ino, Vec<u8>>>,
    next_ino: AtomicU32,
    outstanding: AtomicUsize,
    /// Cap on bytes accepted per write; `usize::MAX` means none
    write_limit: AtomicUsize,
    transactions: Counter,
    chunks: Counter,
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            next_ino: AtomicU32::new(1),
            outstanding: AtomicUsize::new(0),
            write_limit: AtomicUsize::new(usize::MAX),
            transactions: Counter::new("memfs_transactions"),
            chunks: Counter::new("memfs_chunks"),
        }
    }

    /// Create a file holding `data`; returns its inode number
    pub fn create(&self, data: &[u8]) -> Ino {
        let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
        self.files.lock().insert(ino, data.to_vec());
        ino
    }

    /// Copy of a file's contents
    pub fn contents(&self, ino: Ino) -> Vec<u8> {
        self.files.lock().get(&ino).cloned().unwrap_or_default()
    }

    /// Accept at most `limit` bytes per write (None lifts the cap)
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.write_limit
            .store(limit.unwrap_or(usize::MAX), Ordering::Relaxed);
    }

    /// Transactions begun and not yet ended
    pub fn open_transactions(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Transactions completed
    pub fn transactions(&self) -> u64 {
        self.transactions.get()
    }

    /// Writes issued
    pub fn chunks(&self) -> u64 {
        self.chunks.get()
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTxWriter for MemFs {
    fn begin_op(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    fn end_op(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 0 {
            panic!("end_op: no transaction");
        }
        self.transactions.inc();
    }

    fn write_chunk(&self, file: &File, src: &[u8], off: u64) -> usize {
        if self.open_transactions() == 0 {
            panic!("write: not in a transaction");
        }
        if src.len() > self.max_chunk() {
            panic!("write: too big a transaction");
        }
        self.chunks.inc();

        let n = src.len().min(self.write_limit.load(Ordering::Relaxed));
        let mut files = self.files.lock();
        let Some(data) = files.get_mut(&file.ino()) else {
            return 0;
        };

        let start = off as usize;
        let end = start + n;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(&src[..n]);
        n
    }

    fn read_at(&self, file: &File, dst: &mut [u8], off: u64) -> usize {
        let files = self.files.lock();
        let Some(data) = files.get(&file.ino()) else {
            return 0;
        };

        let start = (off as usize).min(data.len());
        let n = dst.len().min(data.len() - start);
        dst[..n].copy_from_slice(&data[start..start + n]);
        n
    }
}
