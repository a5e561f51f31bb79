//! Memcore - the memory/storage core of a small monolithic kernel
//!
//! This crate provides the two subsystems of the kernel that carry real
//! concurrency and resource-lifetime logic:
//!
//! - [`bcache`]: a fixed-capacity disk-block cache, sharded by block number
//!   to reduce lock contention
//! - [`mach_vm`]: the per-process memory-mapped-file region manager
//!   (`mmap`/`munmap`) and the fault path that populates its pages
//!
//! Block devices, page tables and the transactional file writer are consumed
//! through the traits in [`device`], [`mach_vm::pmap`] and [`fs`].

#![no_std]
#![allow(clippy::new_without_default)]
// Kernel code often needs explicit casts between address widths
#![allow(clippy::unnecessary_cast)]

// Standard library replacement for no_std
extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

// Core types
pub mod config;
pub mod error;
pub mod types;

pub mod console;
pub mod kern;

// Storage
pub mod bcache;
pub mod device;
pub mod fs;

// Memory-mapped regions
pub mod mach_vm;
pub mod task;

pub use bcache::{Bcache, Buf};
pub use error::{KernError, KernResult};
pub use task::Proc;

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = "memcore";
