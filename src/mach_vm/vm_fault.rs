//! VM Fault - Lazy Population of Mapped Files
//!
//! `mmap` only reserves entries. The first access to a page traps here:
//! the page is read from the file inside a transaction and installed with
//! the region's permissions. Write access is granted only on a write fault,
//! so the W bit tells `munmap` which shared pages are dirty.

use alloc::boxed::Box;

use log::{trace, warn};

use crate::config::PGSIZE;
use crate::error::{KernError, KernResult};
use crate::fs::{FileTxWriter, Transaction};
use crate::kern::counters::C_VM_FAULTS;
use crate::mach_vm::pmap::PteFlags;
use crate::mach_vm::vm_map::VmProt;
use crate::task::Proc;
use crate::types::{pg_round_down, VirtAddr};

/// Fault type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// Read fault
    Read,
    /// Write fault
    Write,
    /// Execute fault
    Execute,
}

impl FaultType {
    /// Convert to required protection
    pub fn to_protection(&self) -> VmProt {
        match self {
            FaultType::Read => VmProt::READ,
            FaultType::Write => VmProt::WRITE,
            FaultType::Execute => VmProt::EXECUTE,
        }
    }
}

/// Resolve a fault at `va` against the process's mapped regions
pub fn vma_fault(
    proc: &mut Proc,
    fs: &dyn FileTxWriter,
    va: VirtAddr,
    fault: FaultType,
) -> KernResult<()> {
    C_VM_FAULTS.inc();
    let page = pg_round_down(va);
    let Proc {
        pagetable, vmas, ..
    } = proc;

    let vma = vmas
        .find(va)
        .and_then(|slot| vmas.get(slot))
        .ok_or(KernError::InvalidAddress(va))?;
    if !vma.prot.contains(fault.to_protection()) {
        warn!("vma_fault: {:?} access at {:#x} not permitted", fault, va);
        return Err(KernError::PermissionDenied);
    }

    let pte = pagetable.walk(page).ok_or(KernError::InvalidState(page))?;

    if pte.is_pending() {
        let mut frame = Box::new([0u8; PGSIZE]);
        let n = {
            let tx = Transaction::begin(fs);
            tx.read(&vma.file, &mut frame[..], page - vma.base)
        };

        let mut flags = PteFlags::R | PteFlags::U;
        if vma.prot.can_execute() {
            flags |= PteFlags::X;
        }
        if fault == FaultType::Write {
            flags |= PteFlags::W;
        }
        trace!("vma_fault: load {:#x} ({} bytes from file)", page, n);
        return pagetable.populate(page, &frame, flags);
    }

    if fault == FaultType::Write && !pte.is_writable() {
        trace!("vma_fault: dirty {:#x}", page);
        return pagetable.update_flags(page, pte.flags | PteFlags::W);
    }

    Err(KernError::InvalidState(page))
}
