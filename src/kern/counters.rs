//! Kernel Performance Counters
//!
//! Kernel-wide event counters for the block cache and the mapping code.
//! They are relaxed atomics: cheap to bump on hot paths, exact once the
//! threads touching them are quiescent.
//!
//! ## Counter Categories
//!
//! - **Bcache**: per-instance, see [`BcacheStats`]
//! - **Vm**: global, see the `C_VM_*` statics and [`VmSnapshot`]

use core::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Counter Type
// ============================================================================

/// Kernel counter type (atomically updated)
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
}

impl Counter {
    /// Create a new counter
    pub const fn new(name: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
        }
    }

    /// Increment counter by 1
    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment counter by n
    #[inline]
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get current value
    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Reset to zero
    #[inline]
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }

    /// Get counter name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Whether counters are enabled
pub const COUNTERS_ENABLED: bool = true;

/// Increment counter (only if counters enabled)
#[macro_export]
macro_rules! counter {
    ($counter:expr) => {
        if $crate::kern::counters::COUNTERS_ENABLED {
            $counter.inc();
        }
    };
}

// ============================================================================
// Block Cache Counters
// ============================================================================

/// Counters carried by each block cache
#[derive(Debug)]
pub struct BcacheStats {
    /// Lookups that found the block resident
    pub hits: Counter,
    /// Lookups that had to allocate a buffer
    pub misses: Counter,
    /// Misses satisfied from the target shard itself
    pub local_reuse: Counter,
    /// Misses satisfied by taking a buffer from another shard
    pub steals: Counter,
    /// Device reads issued
    pub disk_reads: Counter,
    /// Device writes issued
    pub disk_writes: Counter,
}

impl BcacheStats {
    pub const fn new() -> Self {
        Self {
            hits: Counter::new("bcache_hits"),
            misses: Counter::new("bcache_misses"),
            local_reuse: Counter::new("bcache_local_reuse"),
            steals: Counter::new("bcache_steals"),
            disk_reads: Counter::new("bcache_disk_reads"),
            disk_writes: Counter::new("bcache_disk_writes"),
        }
    }

    /// Copy out the current values
    pub fn snapshot(&self) -> BcacheSnapshot {
        BcacheSnapshot {
            hits: self.hits.get(),
            misses: self.misses.get(),
            local_reuse: self.local_reuse.get(),
            steals: self.steals.get(),
            disk_reads: self.disk_reads.get(),
            disk_writes: self.disk_writes.get(),
        }
    }
}

/// Plain copy of [`BcacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BcacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub local_reuse: u64,
    pub steals: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
}

// ============================================================================
// VM Counters
// ============================================================================

/// Successful mmap calls
pub static C_VM_MAPS: Counter = Counter::new("vm_maps");
/// Successful munmap calls
pub static C_VM_UNMAPS: Counter = Counter::new("vm_unmaps");
/// Regions whose last page was unmapped
pub static C_VM_REGIONS_FREED: Counter = Counter::new("vm_regions_freed");
/// Write-back chunks issued
pub static C_VM_WRITEBACK_CHUNKS: Counter = Counter::new("vm_writeback_chunks");
/// Write-back chunks that came up short
pub static C_VM_SHORT_WRITES: Counter = Counter::new("vm_short_writes");
/// Faults resolved on mapped regions
pub static C_VM_FAULTS: Counter = Counter::new("vm_faults");

/// Plain copy of the VM counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmSnapshot {
    pub maps: u64,
    pub unmaps: u64,
    pub regions_freed: u64,
    pub writeback_chunks: u64,
    pub short_writes: u64,
    pub faults: u64,
}

/// Copy out the VM counters
pub fn vm_snapshot() -> VmSnapshot {
    VmSnapshot {
        maps: C_VM_MAPS.get(),
        unmaps: C_VM_UNMAPS.get(),
        regions_freed: C_VM_REGIONS_FREED.get(),
        writeback_chunks: C_VM_WRITEBACK_CHUNKS.get(),
        short_writes: C_VM_SHORT_WRITES.get(),
        faults: C_VM_FAULTS.get(),
    }
}
