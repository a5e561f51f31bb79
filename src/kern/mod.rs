//! Kern subsystem - Core kernel primitives
//!
//! Locks, intrusive queues, statistics counters and the system call switch.

pub mod counters;
pub mod lock;
pub mod queue;
pub mod syscall_sw;

pub use counters::{BcacheSnapshot, BcacheStats, Counter, VmSnapshot};
pub use lock::{SleepLock, SleepLockGuard};
pub use queue::{QueueChain, QueueHead};
pub use syscall_sw::{syscall, trap_stats, TrapArgs, SYS_MMAP, SYS_MUNMAP};
