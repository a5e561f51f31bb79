//! Mapped-file virtual memory
//!
//! - pmap: page table interface and a software page table
//! - vm_map: per-process VMA table, `mmap` and `munmap`
//! - vm_fault: lazy population of mapped pages

pub mod pmap;
pub mod vm_fault;
pub mod vm_map;

pub use pmap::{PageTable, Pte, PteFlags, SoftPageTable};
pub use vm_fault::{vma_fault, FaultType};
pub use vm_map::{mmap, munmap, unmap_all, MapFlags, Vma, VmaTable, VmProt};
