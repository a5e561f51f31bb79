//! Kernel error type
//!
//! Recoverable failures of the cache and mapping code. Conditions that leave
//! shared kernel state without a safe way forward (an exhausted buffer pool,
//! a corrupted reference count) are not represented here: they halt with
//! `panic!`.

use thiserror::Error;

/// Result alias used throughout memcore
pub type KernResult<T> = Result<T, KernError>;

/// Errors returned to callers of the cache and mapping code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernError {
    /// No address hole large enough within the search bound
    #[error("no unused region large enough in the address space")]
    NoSpace,

    /// Every mapped-region slot of the process is in use
    #[error("too many mappings")]
    TooManyMappings,

    /// A shared writable mapping was requested over a file not open for writing
    #[error("permission denied")]
    PermissionDenied,

    /// The address is not covered by any mapped region
    #[error("not a mapped address: {0:#x}")]
    InvalidAddress(u64),

    /// Region bookkeeping and the page table disagree
    #[error("page not mapped: {0:#x}")]
    InvalidState(u64),

    /// A write-back chunk came up short
    #[error("short write: {written} of {requested} bytes")]
    Io { written: usize, requested: usize },

    /// Malformed length, flags or configuration
    #[error("invalid argument")]
    InvalidArgument,

    /// The descriptor does not name an open file
    #[error("bad file descriptor: {0}")]
    BadFileDescriptor(usize),

    /// The process file table is full
    #[error("too many open files")]
    TooManyOpenFiles,

    /// The page table could not allocate what it needed
    #[error("out of memory")]
    OutOfMemory,
}

impl KernError {
    /// Whether this error is one of the resource-exhaustion kinds
    pub const fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            KernError::NoSpace
                | KernError::TooManyMappings
                | KernError::TooManyOpenFiles
                | KernError::OutOfMemory
        )
    }

    /// Value handed back to user space for this failure
    pub const fn as_syscall_return(&self) -> u64 {
        u64::MAX
    }
}
