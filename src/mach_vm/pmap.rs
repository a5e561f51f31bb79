//! Physical Map (pmap) - Page Table Interface
//!
//! The mapping code never touches hardware page tables directly. It goes
//! through the [`PageTable`] trait, which offers the handful of operations
//! a region manager needs:
//!
//! - `walk`: probe the entry for a virtual address
//! - `map_pages`: reserve entries for a range
//! - `unmap_pages`: revoke entries, freeing frames that were populated
//! - `populate` / `update_flags`: install a frame or change permissions
//! - `copy_in` / `copy_out`: move bytes through user mappings
//!
//! [`SoftPageTable`] is a software implementation backed by ordered maps;
//! it stands in for the hardware table on hosts and in tests.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use crate::config::PGSIZE;
use crate::error::{KernError, KernResult};
use crate::types::{pg_round_down, PhysAddr, VirtAddr};

const PAGE: u64 = PGSIZE as u64;

// ============================================================================
// Page Table Entry Flags
// ============================================================================

/// Page table entry flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PteFlags(u32);

impl PteFlags {
    /// Entry is valid
    pub const V: Self = Self(1 << 0);
    /// Readable
    pub const R: Self = Self(1 << 1);
    /// Writable; on a file mapping this doubles as the dirty bit
    pub const W: Self = Self(1 << 2);
    /// Executable
    pub const X: Self = Self(1 << 3);
    /// User accessible
    pub const U: Self = Self(1 << 4);
    /// Reserved for a mapped file, contents not loaded yet
    pub const M: Self = Self(1 << 8);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn intersects(&self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl core::ops::BitOr for PteFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for PteFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl core::ops::BitAnd for PteFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

/// A page table entry as seen by `walk`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pte {
    pub pa: PhysAddr,
    pub flags: PteFlags,
}

impl Pte {
    /// Reserved but not yet populated
    pub const fn is_pending(&self) -> bool {
        self.flags.contains(PteFlags::M)
    }

    pub const fn is_writable(&self) -> bool {
        self.flags.contains(PteFlags::W)
    }
}

// ============================================================================
// Page Table Trait
// ============================================================================

/// Per-process page table operations
pub trait PageTable: Send {
    /// Entry for the page containing `va`, if one exists
    fn walk(&self, va: VirtAddr) -> Option<Pte>;

    /// Create entries for `[va, va + size)` pointing at `pa` onwards with
    /// `flags | V`. Either every page is entered or none is.
    fn map_pages(&mut self, va: VirtAddr, size: u64, pa: PhysAddr, flags: PteFlags)
        -> KernResult<()>;

    /// Remove `npages` entries starting at `va`. Frames are released when
    /// `perm` carries any access bit. Panics if a page is not mapped.
    fn unmap_pages(&mut self, va: VirtAddr, npages: usize, perm: PteFlags);

    /// Replace the flags of an existing entry
    fn update_flags(&mut self, va: VirtAddr, flags: PteFlags) -> KernResult<()>;

    /// Back an existing entry with a fresh frame holding `page`
    fn populate(&mut self, va: VirtAddr, page: &[u8; PGSIZE], flags: PteFlags) -> KernResult<()>;

    /// Copy from user memory at `va` into `dst`
    fn copy_in(&self, dst: &mut [u8], va: VirtAddr) -> KernResult<()>;

    /// Store `src` into user memory at `va`; every page must be writable
    fn copy_out(&mut self, va: VirtAddr, src: &[u8]) -> KernResult<()>;
}

// ============================================================================
// Software Page Table
// ============================================================================

/// Page table kept in ordered maps, with its own frame allocator
#[derive(Debug)]
pub struct SoftPageTable {
    entries: BTreeMap<VirtAddr, Pte>,
    frames: BTreeMap<PhysAddr, Box<[u8; PGSIZE]>>,
    next_frame: PhysAddr,
    /// Fail the next `map_pages` with `OutOfMemory`
    fail_next_map: bool,
}

impl SoftPageTable {
    /// First physical address handed out by the frame allocator
    const FRAME_BASE: PhysAddr = 0x8000_0000;

    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            frames: BTreeMap::new(),
            next_frame: Self::FRAME_BASE,
            fail_next_map: false,
        }
    }

    /// Make the next `map_pages` call fail
    pub fn fail_next_map(&mut self) {
        self.fail_next_map = true;
    }

    /// Number of entries, pending or populated
    pub fn mapped_pages(&self) -> usize {
        self.entries.len()
    }

    /// Number of frames currently allocated
    pub fn frames_in_use(&self) -> usize {
        self.frames.len()
    }

    fn alloc_frame(&mut self, page: &[u8; PGSIZE]) -> PhysAddr {
        let pa = self.next_frame;
        self.next_frame += PAGE;
        self.frames.insert(pa, Box::new(*page));
        pa
    }

    /// Frame behind a populated, readable entry
    fn frame_of(&self, va: VirtAddr) -> KernResult<&[u8; PGSIZE]> {
        let pte = self.entries.get(&va).ok_or(KernError::InvalidAddress(va))?;
        if pte.is_pending() || !pte.flags.contains(PteFlags::R) {
            return Err(KernError::InvalidAddress(va));
        }
        self.frames
            .get(&pte.pa)
            .map(|f| &**f)
            .ok_or(KernError::InvalidState(va))
    }
}

impl Default for SoftPageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTable for SoftPageTable {
    fn walk(&self, va: VirtAddr) -> Option<Pte> {
        self.entries.get(&pg_round_down(va)).copied()
    }

    fn map_pages(
        &mut self,
        va: VirtAddr,
        size: u64,
        pa: PhysAddr,
        flags: PteFlags,
    ) -> KernResult<()> {
        if size == 0 {
            return Err(KernError::InvalidArgument);
        }
        if core::mem::take(&mut self.fail_next_map) {
            return Err(KernError::OutOfMemory);
        }

        let first = pg_round_down(va);
        let last = pg_round_down(va + size - 1);
        let mut a = first;
        while a <= last {
            if self.entries.contains_key(&a) {
                return Err(KernError::InvalidState(a));
            }
            a += PAGE;
        }

        let mut a = first;
        let mut pa = pa;
        while a <= last {
            self.entries.insert(
                a,
                Pte {
                    pa,
                    flags: flags | PteFlags::V,
                },
            );
            a += PAGE;
            if pa != 0 {
                pa += PAGE;
            }
        }
        Ok(())
    }

    fn unmap_pages(&mut self, va: VirtAddr, npages: usize, perm: PteFlags) {
        if va % PAGE != 0 {
            panic!("uvmunmap: not aligned");
        }
        for i in 0..npages as u64 {
            let a = va + i * PAGE;
            let Some(pte) = self.entries.remove(&a) else {
                panic!("uvmunmap: not mapped");
            };
            if !perm.is_empty() {
                self.frames.remove(&pte.pa);
            }
        }
    }

    fn update_flags(&mut self, va: VirtAddr, flags: PteFlags) -> KernResult<()> {
        let pte = self
            .entries
            .get_mut(&pg_round_down(va))
            .ok_or(KernError::InvalidState(va))?;
        pte.flags = flags | PteFlags::V;
        Ok(())
    }

    fn populate(&mut self, va: VirtAddr, page: &[u8; PGSIZE], flags: PteFlags) -> KernResult<()> {
        let va = pg_round_down(va);
        if !self.entries.contains_key(&va) {
            return Err(KernError::InvalidState(va));
        }
        let pa = self.alloc_frame(page);
        self.entries.insert(
            va,
            Pte {
                pa,
                flags: flags.difference(PteFlags::M) | PteFlags::V,
            },
        );
        Ok(())
    }

    fn copy_in(&self, dst: &mut [u8], va: VirtAddr) -> KernResult<()> {
        let mut done = 0;
        while done < dst.len() {
            let cur = va + done as u64;
            let page = pg_round_down(cur);
            let off = (cur - page) as usize;
            let n = (PGSIZE - off).min(dst.len() - done);
            let frame = self.frame_of(page)?;
            dst[done..done + n].copy_from_slice(&frame[off..off + n]);
            done += n;
        }
        Ok(())
    }

    fn copy_out(&mut self, va: VirtAddr, src: &[u8]) -> KernResult<()> {
        let mut done = 0;
        while done < src.len() {
            let cur = va + done as u64;
            let page = pg_round_down(cur);
            let off = (cur - page) as usize;
            let n = (PGSIZE - off).min(src.len() - done);
            let pte = self
                .entries
                .get(&page)
                .ok_or(KernError::InvalidAddress(page))?;
            if pte.is_pending() || !pte.is_writable() {
                return Err(KernError::PermissionDenied);
            }
            let pa = pte.pa;
            let frame = self
                .frames
                .get_mut(&pa)
                .ok_or(KernError::InvalidState(page))?;
            frame[off..off + n].copy_from_slice(&src[done..done + n]);
            done += n;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
