//! VM Map - Mapped File Regions
//!
//! Each process owns a small fixed table of virtual memory areas (VMAs).
//! A VMA records where a file is mapped, with which protection and sharing
//! mode, and holds its own reference to the file. `mmap` finds an unused
//! hole and reserves page-table entries for it; pages are loaded lazily by
//! the fault handler. `munmap` writes dirty shared pages back to the file
//! and revokes the entries; a VMA is freed once none of its pages remain.
//!
//! The table is not locked here. Callers hold `&mut Proc`, which already
//! serializes everything touching one process.

use alloc::boxed::Box;

use log::{debug, warn};

use crate::config::{WritebackPolicy, NVMA, PGSIZE};
use crate::error::{KernError, KernResult};
use crate::fs::{filedup, fileclose, FileRef, FileTxWriter, Transaction};
use crate::kern::counters::{
    C_VM_MAPS, C_VM_REGIONS_FREED, C_VM_SHORT_WRITES, C_VM_UNMAPS, C_VM_WRITEBACK_CHUNKS,
};
use crate::mach_vm::pmap::{PageTable, PteFlags};
use crate::task::Proc;
use crate::types::{pg_round_down, pg_round_up, pg_round_up_checked, VirtAddr};

const PAGE: u64 = PGSIZE as u64;

// ============================================================================
// Protection and Flags
// ============================================================================

/// Memory protection flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmProt(u32);

impl VmProt {
    /// No access
    pub const NONE: Self = Self(0);
    /// Read access
    pub const READ: Self = Self(1);
    /// Write access
    pub const WRITE: Self = Self(2);
    /// Execute access
    pub const EXECUTE: Self = Self(4);
    /// Read/write
    pub const DEFAULT: Self = Self(3);
    /// All permissions
    pub const ALL: Self = Self(7);

    /// Protection from user-supplied bits; unknown bits are rejected
    pub const fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::ALL.0 != 0 {
            None
        } else {
            Some(Self(bits))
        }
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn can_read(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn can_execute(&self) -> bool {
        self.contains(Self::EXECUTE)
    }
}

impl core::ops::BitOr for VmProt {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl Default for VmProt {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Sharing mode of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFlags(u32);

impl MapFlags {
    /// Stores reach the file on unmap
    pub const SHARED: Self = Self(0x01);
    /// Stores stay private to the process
    pub const PRIVATE: Self = Self(0x02);

    /// Flags from user-supplied bits; exactly one mode must be set
    pub const fn from_bits(bits: u32) -> Option<Self> {
        if bits == Self::SHARED.0 || bits == Self::PRIVATE.0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_shared(&self) -> bool {
        *self == Self::SHARED
    }
}

// ============================================================================
// VMA
// ============================================================================

/// One mapped file region
#[derive(Debug, Clone)]
pub struct Vma {
    pub base: VirtAddr,
    pub length: u64,
    pub prot: VmProt,
    pub flags: MapFlags,
    pub file: FileRef,
}

impl Vma {
    /// End of the region, page aligned
    pub fn end(&self) -> VirtAddr {
        self.base + pg_round_up(self.length)
    }

    pub fn npages(&self) -> usize {
        (pg_round_up(self.length) / PAGE) as usize
    }

    pub fn contains(&self, va: VirtAddr) -> bool {
        va >= self.base && va < self.end()
    }

    pub fn is_shared(&self) -> bool {
        self.flags.is_shared()
    }

    /// Whether any page of the region still has an entry
    fn any_mapped(&self, pagetable: &dyn PageTable) -> bool {
        (0..self.npages() as u64).any(|i| pagetable.walk(self.base + i * PAGE).is_some())
    }
}

/// Fixed table of VMA slots
#[derive(Debug)]
pub struct VmaTable {
    slots: [Option<Vma>; NVMA],
}

impl VmaTable {
    pub const fn new() -> Self {
        const EMPTY: Option<Vma> = None;
        Self {
            slots: [EMPTY; NVMA],
        }
    }

    /// Number of unused slots
    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    pub fn get(&self, slot: usize) -> Option<&Vma> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Slot of the VMA covering `va`
    pub fn find(&self, va: VirtAddr) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|v| v.contains(va)))
    }

    /// Slots currently in use
    pub fn live(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn install(&mut self, slot: usize, vma: Vma) {
        debug_assert!(self.slots[slot].is_none());
        self.slots[slot] = Some(vma);
    }

    fn take(&mut self, slot: usize) -> Option<Vma> {
        self.slots.get_mut(slot).and_then(Option::take)
    }
}

impl Default for VmaTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// mmap
// ============================================================================

/// Map `length` bytes of the file open at `fd`; returns the base address
pub fn mmap(
    proc: &mut Proc,
    length: u64,
    prot: VmProt,
    flags: MapFlags,
    fd: usize,
) -> KernResult<VirtAddr> {
    let config = proc.vm_config;
    let pid = proc.pid.0;
    if length == 0 || length > config.max_va {
        return Err(KernError::InvalidArgument);
    }

    let file = proc.file(fd)?;
    if flags.is_shared() && prot.can_write() && !file.writable() {
        warn!("mmap: pid {} fd {} not writable for a shared mapping", pid, fd);
        return Err(KernError::PermissionDenied);
    }
    let file = filedup(file);

    let Proc {
        pagetable, vmas, ..
    } = proc;

    let base = match find_hole(&**pagetable, vmas, length, config.search_retries, config.max_va) {
        Ok(base) => base,
        Err(e) => {
            warn!("mmap: no unused region of {:#x} bytes", length);
            fileclose(file);
            return Err(e);
        }
    };

    let Some(slot) = vmas.free_slot() else {
        warn!("mmap: no unused vma");
        fileclose(file);
        return Err(KernError::TooManyMappings);
    };
    vmas.install(
        slot,
        Vma {
            base,
            length,
            prot,
            flags,
            file,
        },
    );

    if let Err(e) = pagetable.map_pages(base, length, 0, PteFlags::U | PteFlags::M) {
        warn!("mmap: map failed at {:#x}: {}", base, e);
        if let Some(vma) = vmas.take(slot) {
            fileclose(vma.file);
        }
        return Err(e);
    }

    C_VM_MAPS.inc();
    debug!(
        "mmap: pid {} [{:#x}, {:#x}) slot {}",
        pid,
        base,
        base + pg_round_up(length),
        slot
    );
    Ok(base)
}

/// First-fit search for `length` unused bytes, upward from address 0
///
/// A page is in use when it has an entry or lies inside a live VMA; holes
/// left by partial unmaps still belong to their region. A probe that runs
/// into a used page restarts just past it (past the whole region for a
/// VMA); at most `retries` restarts are made.
fn find_hole(
    pagetable: &dyn PageTable,
    vmas: &VmaTable,
    length: u64,
    retries: usize,
    max_va: u64,
) -> KernResult<VirtAddr> {
    let span = pg_round_up(length);
    // first free address after the obstacle at `va`, if there is one
    let past_obstacle = |va: VirtAddr| match vmas.find(va).and_then(|slot| vmas.get(slot)) {
        Some(vma) => Some(vma.end()),
        None => pagetable.walk(va).map(|_| va + PAGE),
    };
    let mut base: VirtAddr = 0;

    for _ in 0..=retries {
        while base < max_va {
            match past_obstacle(base) {
                Some(next) => base = next,
                None => break,
            }
        }
        if base >= max_va || span > max_va - base {
            break;
        }

        match (0..span / PAGE).find_map(|i| past_obstacle(base + i * PAGE)) {
            None => return Ok(base),
            Some(next) => base = next,
        }
    }
    Err(KernError::NoSpace)
}

// ============================================================================
// munmap
// ============================================================================

/// Unmap `[addr, addr + length)` from the VMA containing `addr`
///
/// Dirty pages of shared mappings are written back first. The VMA and its
/// file reference are released once none of its pages remain mapped.
pub fn munmap(
    proc: &mut Proc,
    fs: &dyn FileTxWriter,
    addr: VirtAddr,
    length: u64,
) -> KernResult<()> {
    let addr = pg_round_down(addr);
    let policy = proc.vm_config.writeback;
    let pid = proc.pid.0;
    let Proc {
        pagetable, vmas, ..
    } = proc;

    let Some(slot) = vmas.find(addr) else {
        warn!("munmap: not a mmap addr {:#x}", addr);
        return Err(KernError::InvalidAddress(addr));
    };
    let Some(vma) = vmas.get(slot) else {
        return Err(KernError::InvalidAddress(addr));
    };

    let end = match pg_round_up_checked(length).and_then(|span| addr.checked_add(span)) {
        Some(end) if end <= vma.end() => end,
        end => {
            warn!("munmap: range runs past region end {:#x}", vma.end());
            return Err(KernError::InvalidAddress(end.unwrap_or(u64::MAX)));
        }
    };
    let npages = (end - addr) / PAGE;

    // refuse before touching anything if a page is already gone
    if let Some(va) = (0..npages)
        .map(|i| addr + i * PAGE)
        .find(|&va| pagetable.walk(va).is_none())
    {
        warn!("munmap: page not mapped {:#x}", va);
        return Err(KernError::InvalidState(va));
    }

    for i in 0..npages {
        let va = addr + i * PAGE;
        let pte = pagetable.walk(va).ok_or(KernError::InvalidState(va))?;

        if vma.is_shared() && pte.is_writable() {
            match write_back(&**pagetable, fs, vma, va) {
                Ok(()) => {}
                Err(KernError::Io { written, requested }) => {
                    C_VM_SHORT_WRITES.inc();
                    warn!(
                        "munmap: error on writing to file at {:#x}: {} of {} bytes",
                        va, written, requested
                    );
                    if policy == WritebackPolicy::Abort {
                        return Err(KernError::Io { written, requested });
                    }
                }
                Err(e) => return Err(e),
            }
        }

        pagetable.unmap_pages(va, 1, pte.flags & (PteFlags::R | PteFlags::W));
    }
    C_VM_UNMAPS.inc();
    debug!("munmap: pid {} [{:#x}, {:#x})", pid, addr, addr + npages * PAGE);

    if !vma.any_mapped(&**pagetable) {
        if let Some(vma) = vmas.take(slot) {
            debug!("munmap: pid {} freed slot {}", pid, slot);
            C_VM_REGIONS_FREED.inc();
            fileclose(vma.file);
        }
    }
    Ok(())
}

/// Write one dirty page back to the file in transaction-sized chunks
fn write_back(
    pagetable: &dyn PageTable,
    fs: &dyn FileTxWriter,
    vma: &Vma,
    va: VirtAddr,
) -> KernResult<()> {
    let mut page = Box::new([0u8; PGSIZE]);
    pagetable.copy_in(&mut page[..], va)?;

    let file_off = va - vma.base;
    let max = fs.max_chunk().max(1);
    let mut off = 0;
    while off < PGSIZE {
        let n = (PGSIZE - off).min(max);
        let written = {
            let tx = Transaction::begin(fs);
            tx.write(&vma.file, &page[off..off + n], file_off + off as u64)
        };
        C_VM_WRITEBACK_CHUNKS.inc();
        if written != n {
            return Err(KernError::Io {
                written,
                requested: n,
            });
        }
        off += written;
    }
    Ok(())
}

/// Unmap every live VMA of the process, writing dirty shared pages back
pub fn unmap_all(proc: &mut Proc, fs: &dyn FileTxWriter) -> KernResult<()> {
    let mut first_err = None;
    for slot in 0..NVMA {
        let Some(vma) = proc.vmas.get(slot) else {
            continue;
        };
        let (base, length) = (vma.base, vma.length);

        // only the pages still present; earlier partial unmaps leave holes
        let mut va = base;
        let end = base + pg_round_up(length);
        while va < end {
            if proc.pagetable.walk(va).is_none() {
                va += PAGE;
                continue;
            }
            let run_start = va;
            while va < end && proc.pagetable.walk(va).is_some() {
                va += PAGE;
            }
            if let Err(e) = munmap(proc, fs, run_start, va - run_start) {
                warn!("unmap_all: slot {} at {:#x}: {}", slot, run_start, e);
                first_err.get_or_insert(e);
                break;
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ============================================================================
// Tests
// ============================================================================
