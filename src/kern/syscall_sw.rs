//! System Call Switch
//!
//! Maps system call numbers to the kernel functions behind them and
//! decodes their register arguments. Only the mapping calls are served
//! here; every other number is rejected.
//!
//! Handlers return the raw value handed back to user space: the result on
//! success, `u64::MAX` (-1) on failure.

use log::warn;

use crate::counter;
use crate::error::{KernError, KernResult};
use crate::fs::FileTxWriter;
use crate::kern::counters::Counter;
use crate::mach_vm::vm_map::{self, MapFlags, VmProt};
use crate::task::Proc;

// ============================================================================
// Call Numbers
// ============================================================================

/// mmap(addr, length, prot, flags, fd, offset)
pub const SYS_MMAP: usize = 22;
/// munmap(addr, length)
pub const SYS_MUNMAP: usize = 23;

/// Size of the call table
pub const NSYSCALL: usize = 32;

/// Returned to user space on failure
pub const SYSCALL_FAILED: u64 = u64::MAX;

// ============================================================================
// Arguments
// ============================================================================

/// Argument registers of a trapped call
#[derive(Debug, Clone)]
pub struct TrapArgs {
    /// Argument registers (a0..a6)
    pub args: [usize; 7],
    /// Number of valid arguments
    pub arg_count: usize,
}

impl TrapArgs {
    pub fn new() -> Self {
        Self {
            args: [0; 7],
            arg_count: 0,
        }
    }

    pub fn with_args(args: &[usize]) -> Self {
        let mut trap_args = Self::new();
        let count = args.len().min(7);
        trap_args.args[..count].copy_from_slice(&args[..count]);
        trap_args.arg_count = count;
        trap_args
    }

    pub fn arg(&self, index: usize) -> usize {
        if index < self.arg_count {
            self.args[index]
        } else {
            0
        }
    }

    /// Argument as a C `int`
    pub fn arg_int(&self, index: usize) -> i32 {
        self.arg(index) as i32
    }

    pub fn arg_u32(&self, index: usize) -> u32 {
        self.arg(index) as u32
    }

    pub fn arg_addr(&self, index: usize) -> u64 {
        self.arg(index) as u64
    }
}

impl Default for TrapArgs {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// System call handler signature
pub type SyscallHandler = fn(&mut Proc, &dyn FileTxWriter, &TrapArgs) -> u64;

fn to_user(result: KernResult<u64>) -> u64 {
    match result {
        Ok(v) => v,
        Err(e) => {
            counter!(TRAP_STATS.failed_calls);
            e.as_syscall_return()
        }
    }
}

/// `mmap(addr, length, prot, flags, fd, offset)`; `addr` and `offset` are ignored
pub fn sys_mmap(proc: &mut Proc, _fs: &dyn FileTxWriter, args: &TrapArgs) -> u64 {
    to_user(decode_mmap(proc, args))
}

fn decode_mmap(proc: &mut Proc, args: &TrapArgs) -> KernResult<u64> {
    let length = args.arg_int(1);
    let prot = VmProt::from_bits(args.arg_u32(2)).ok_or(KernError::InvalidArgument)?;
    let flags = MapFlags::from_bits(args.arg_u32(3)).ok_or(KernError::InvalidArgument)?;
    let fd = args.arg_int(4);

    if length <= 0 {
        return Err(KernError::InvalidArgument);
    }
    let fd = usize::try_from(fd).map_err(|_| KernError::BadFileDescriptor(usize::MAX))?;

    let pid = proc.pid.0;
    vm_map::mmap(proc, length as u64, prot, flags, fd)
        .inspect_err(|e| warn!("sys_mmap: pid {}: {}", pid, e))
}

/// `munmap(addr, length)`
pub fn sys_munmap(proc: &mut Proc, fs: &dyn FileTxWriter, args: &TrapArgs) -> u64 {
    to_user(decode_munmap(proc, fs, args))
}

fn decode_munmap(proc: &mut Proc, fs: &dyn FileTxWriter, args: &TrapArgs) -> KernResult<u64> {
    let addr = args.arg_addr(0);
    let length = args.arg_int(1);
    if length < 0 {
        return Err(KernError::InvalidArgument);
    }

    let pid = proc.pid.0;
    vm_map::munmap(proc, fs, addr, length as u64)
        .inspect_err(|e| warn!("sys_munmap: pid {}: {}", pid, e))?;
    Ok(0)
}

fn sys_invalid(proc: &mut Proc, _fs: &dyn FileTxWriter, _args: &TrapArgs) -> u64 {
    warn!("pid {}: unknown sys call", proc.pid.0);
    SYSCALL_FAILED
}

// ============================================================================
// Call Table
// ============================================================================

/// Call table entry
#[derive(Clone, Copy)]
pub struct Syscall {
    /// Number of register arguments
    pub arg_count: u8,
    /// Handler function
    pub handler: SyscallHandler,
    /// Call name for debugging
    pub name: &'static str,
}

impl Syscall {
    pub const fn new(name: &'static str, arg_count: u8, handler: SyscallHandler) -> Self {
        Self {
            arg_count,
            handler,
            name,
        }
    }
}

impl core::fmt::Debug for Syscall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Syscall")
            .field("name", &self.name)
            .field("arg_count", &self.arg_count)
            .finish()
    }
}

const INVALID: Syscall = Syscall::new("invalid", 0, sys_invalid);

static SYSCALLS: [Syscall; NSYSCALL] = {
    let mut table = [INVALID; NSYSCALL];
    table[SYS_MMAP] = Syscall::new("mmap", 6, sys_mmap);
    table[SYS_MUNMAP] = Syscall::new("munmap", 2, sys_munmap);
    table
};

/// Table entry for `num`
pub fn lookup(num: usize) -> Option<&'static Syscall> {
    SYSCALLS.get(num)
}

/// Dispatch call `num` for `proc`
pub fn syscall(proc: &mut Proc, fs: &dyn FileTxWriter, num: usize, args: &TrapArgs) -> u64 {
    counter!(TRAP_STATS.total_calls);
    match SYSCALLS.get(num) {
        Some(call) => (call.handler)(proc, fs, args),
        None => {
            counter!(TRAP_STATS.invalid_calls);
            sys_invalid(proc, fs, args)
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Call statistics
#[derive(Debug)]
pub struct TrapStats {
    /// Total calls dispatched
    pub total_calls: Counter,
    /// Calls with numbers outside the table
    pub invalid_calls: Counter,
    /// Calls that returned failure
    pub failed_calls: Counter,
}

impl TrapStats {
    pub const fn new() -> Self {
        Self {
            total_calls: Counter::new("syscall_total"),
            invalid_calls: Counter::new("syscall_invalid"),
            failed_calls: Counter::new("syscall_failed"),
        }
    }

    pub fn snapshot(&self) -> TrapStatsSnapshot {
        TrapStatsSnapshot {
            total_calls: self.total_calls.get(),
            invalid_calls: self.invalid_calls.get(),
            failed_calls: self.failed_calls.get(),
        }
    }
}

/// Snapshot of call statistics
#[derive(Debug, Clone, Default)]
pub struct TrapStatsSnapshot {
    pub total_calls: u64,
    pub invalid_calls: u64,
    pub failed_calls: u64,
}

static TRAP_STATS: TrapStats = TrapStats::new();

/// Get call statistics
pub fn trap_stats() -> TrapStatsSnapshot {
    TRAP_STATS.snapshot()
}
