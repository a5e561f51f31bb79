//! Process state seen by the mapping code
//!
//! A process here is only what `mmap`/`munmap` need: an id, a page table,
//! the open-file table and the VMA slots. Scheduling and lifecycle live
//! elsewhere.

use alloc::boxed::Box;
use core::fmt;

use log::trace;

use crate::config::{VmConfig, NOFILE};
use crate::error::{KernError, KernResult};
use crate::fs::{fileclose, FileRef};
use crate::mach_vm::pmap::PageTable;
use crate::mach_vm::vm_map::VmaTable;
use crate::types::Pid;

/// A process
pub struct Proc {
    pub pid: Pid,
    pub pagetable: Box<dyn PageTable>,
    pub ofile: [Option<FileRef>; NOFILE],
    pub vmas: VmaTable,
    pub vm_config: VmConfig,
}

impl Proc {
    /// New process with an empty file table and default VM tuning
    pub fn new(pagetable: Box<dyn PageTable>) -> Self {
        Self::build(pagetable, VmConfig::default())
    }

    /// New process with its own VM tuning
    pub fn with_config(pagetable: Box<dyn PageTable>, vm_config: VmConfig) -> KernResult<Self> {
        vm_config.validate()?;
        Ok(Self::build(pagetable, vm_config))
    }

    fn build(pagetable: Box<dyn PageTable>, vm_config: VmConfig) -> Self {
        const NOFD: Option<FileRef> = None;
        Self {
            pid: Pid::new(),
            pagetable,
            ofile: [NOFD; NOFILE],
            vmas: VmaTable::new(),
            vm_config,
        }
    }

    /// Install `file` in the lowest free descriptor
    pub fn fdalloc(&mut self, file: FileRef) -> KernResult<usize> {
        let fd = self
            .ofile
            .iter()
            .position(Option::is_none)
            .ok_or(KernError::TooManyOpenFiles)?;
        self.ofile[fd] = Some(file);
        trace!("fdalloc: pid {} fd {}", self.pid.0, fd);
        Ok(fd)
    }

    /// The open file behind `fd`
    pub fn file(&self, fd: usize) -> KernResult<&FileRef> {
        self.ofile
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(KernError::BadFileDescriptor(fd))
    }

    /// Close descriptor `fd`
    pub fn close(&mut self, fd: usize) -> KernResult<()> {
        let file = self
            .ofile
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(KernError::BadFileDescriptor(fd))?;
        fileclose(file);
        Ok(())
    }
}

impl fmt::Debug for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proc")
            .field("pid", &self.pid)
            .field("open_files", &self.ofile.iter().flatten().count())
            .field("vmas", &self.vmas)
            .finish()
    }
}
