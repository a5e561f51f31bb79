//! Kernel parameters and runtime configuration
//!
//! The constants mirror the fixed parameters a small kernel is built with.
//! `BcacheConfig` and `VmConfig` let a boot path (or a test) size the cache
//! and tune the mapping code without touching those constants.

use crate::error::{KernError, KernResult};

// ============================================================================
// Kernel Parameters
// ============================================================================

/// Block size in bytes
pub const BSIZE: usize = 1024;

/// Page size in bytes
pub const PGSIZE: usize = 4096;

/// Max number of blocks any file-system operation writes
pub const MAXOPBLOCKS: usize = 10;

/// Number of buffers in the block cache
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Number of block cache shards
pub const NBUCKET: usize = 13;

/// Number of mapped-region slots per process
pub const NVMA: usize = 16;

/// Open files per process
pub const NOFILE: usize = 16;

/// One beyond the highest user virtual address (Sv39)
pub const MAXVA: u64 = 1 << 38;

/// Number of times the hole search may restart before giving up
pub const MMAP_SEARCH_RETRIES: usize = 10;

/// Largest write-back chunk that fits in one file-system transaction.
///
/// A transaction may dirty MAXOPBLOCKS blocks; the inode, the indirect block
/// and two allocation blocks are reserved, and the rest are split between
/// data blocks and their allocation-bitmap blocks.
pub const MAX_WRITE_CHUNK: usize = ((MAXOPBLOCKS - 1 - 1 - 2) / 2) * BSIZE;

// ============================================================================
// Block Cache Configuration
// ============================================================================

/// Sizing of a block cache instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BcacheConfig {
    /// Number of buffers in the arena
    pub nbuf: usize,
    /// Number of shards
    pub nbucket: usize,
}

impl BcacheConfig {
    pub const fn new(nbuf: usize, nbucket: usize) -> Self {
        Self { nbuf, nbucket }
    }

    /// Reject configurations the cache cannot run with
    pub fn validate(&self) -> KernResult<()> {
        if self.nbuf == 0 || self.nbucket == 0 {
            return Err(KernError::InvalidArgument);
        }
        // Arena indices are stored in 32-bit links
        if self.nbuf >= u32::MAX as usize {
            return Err(KernError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for BcacheConfig {
    fn default() -> Self {
        Self::new(NBUF, NBUCKET)
    }
}

// ============================================================================
// VM Configuration
// ============================================================================

/// What `munmap` does when a write-back chunk comes up short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritebackPolicy {
    /// Stop writing the page back, log it, and keep unmapping
    #[default]
    ContinueUnmapping,
    /// Fail the call with `KernError::Io` before revoking the page
    Abort,
}

/// Tuning of the mapping code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Restarts allowed in the hole search
    pub search_retries: usize,
    /// Upper bound of the user address space
    pub max_va: u64,
    /// Short write-back handling
    pub writeback: WritebackPolicy,
}

impl VmConfig {
    pub fn validate(&self) -> KernResult<()> {
        if self.max_va == 0 || self.max_va % PGSIZE as u64 != 0 {
            return Err(KernError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            search_retries: MMAP_SEARCH_RETRIES,
            max_va: MAXVA,
            writeback: WritebackPolicy::default(),
        }
    }
}
