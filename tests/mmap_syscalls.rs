//! Mapped files driven through the system call surface and the fault path

use std::sync::Arc;
use std::thread;

use memcore::config::{VmConfig, WritebackPolicy, NVMA, PGSIZE};
use memcore::fs::{file_refs, filedup, File, FileRef, FileTxWriter, MemFs, OpenMode};
use memcore::kern::syscall_sw::{syscall, TrapArgs, SYSCALL_FAILED, SYS_MMAP, SYS_MUNMAP};
use memcore::mach_vm::{mmap, munmap, unmap_all, vma_fault, FaultType, MapFlags, SoftPageTable, VmProt};
use memcore::{KernError, Proc};

const PAGE: u64 = PGSIZE as u64;
const PROT_READ: usize = 1;
const PROT_WRITE: usize = 2;
const MAP_SHARED: usize = 1;
const MAP_PRIVATE: usize = 2;

struct Fixture {
    fs: MemFs,
    proc: Proc,
    file: FileRef,
    fd: usize,
}

impl Fixture {
    fn new(data: &[u8], mode: OpenMode) -> Self {
        Self::with_config(data, mode, VmConfig::default())
    }

    fn with_config(data: &[u8], mode: OpenMode, config: VmConfig) -> Self {
        let fs = MemFs::new();
        let file = File::open(fs.create(data), mode);
        let mut proc = Proc::with_config(Box::new(SoftPageTable::new()), config).unwrap();
        let fd = proc.fdalloc(filedup(&file)).unwrap();
        Self { fs, proc, file, fd }
    }

    fn sys_mmap(&mut self, length: usize, prot: usize, flags: usize) -> u64 {
        let args = TrapArgs::with_args(&[0, length, prot, flags, self.fd, 0]);
        syscall(&mut self.proc, &self.fs, SYS_MMAP, &args)
    }

    fn sys_munmap(&mut self, addr: u64, length: usize) -> u64 {
        let args = TrapArgs::with_args(&[addr as usize, length]);
        syscall(&mut self.proc, &self.fs, SYS_MUNMAP, &args)
    }

    /// Store through the mapping the way a user program would
    fn store(&mut self, va: u64, bytes: &[u8]) {
        if self.proc.pagetable.copy_out(va, bytes).is_err() {
            vma_fault(&mut self.proc, &self.fs, va, FaultType::Write).unwrap();
            self.proc.pagetable.copy_out(va, bytes).unwrap();
        }
    }

    fn load(&mut self, va: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        if self.proc.pagetable.copy_in(&mut out, va).is_err() {
            vma_fault(&mut self.proc, &self.fs, va, FaultType::Read).unwrap();
            self.proc.pagetable.copy_in(&mut out, va).unwrap();
        }
        out
    }
}

fn file_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn shared_write_on_read_only_file_consumes_nothing() {
    let mut fx = Fixture::new(b"ro", OpenMode::Read);
    let refs = file_refs(&fx.file);

    assert_eq!(fx.sys_mmap(PGSIZE, PROT_READ | PROT_WRITE, MAP_SHARED), SYSCALL_FAILED);
    assert_eq!(fx.proc.vmas.free_slots(), NVMA);
    assert_eq!(file_refs(&fx.file), refs);
    assert!(fx.proc.pagetable.walk(0).is_none());

    // private writable mappings of the same file are fine
    assert_ne!(fx.sys_mmap(PGSIZE, PROT_READ | PROT_WRITE, MAP_PRIVATE), SYSCALL_FAILED);
}

#[test]
fn map_then_unmap_frees_slot_and_file() {
    let mut fx = Fixture::new(&file_data(3 * PGSIZE), OpenMode::Read);
    let refs = file_refs(&fx.file);

    let base = fx.sys_mmap(3 * PGSIZE, PROT_READ, MAP_PRIVATE);
    assert_ne!(base, SYSCALL_FAILED);
    assert_eq!(fx.proc.vmas.free_slots(), NVMA - 1);
    assert_eq!(file_refs(&fx.file), refs + 1);

    assert_eq!(fx.load(base + PAGE + 10, 4), file_data(PGSIZE + 14)[PGSIZE + 10..]);

    assert_eq!(fx.sys_munmap(base, 3 * PGSIZE), 0);
    assert_eq!(fx.proc.vmas.free_slots(), NVMA);
    assert_eq!(file_refs(&fx.file), refs);
    for i in 0..3 {
        assert!(fx.proc.pagetable.walk(base + i * PAGE).is_none());
    }
}

#[test]
fn unmapping_unknown_address_changes_nothing() {
    let mut fx = Fixture::new(b"", OpenMode::Read);
    let base = fx.sys_mmap(PGSIZE, PROT_READ, MAP_PRIVATE);

    assert_eq!(fx.sys_munmap(base + 16 * PAGE, PGSIZE), SYSCALL_FAILED);
    assert_eq!(
        munmap(&mut fx.proc, &fx.fs, base + 16 * PAGE, PAGE),
        Err(KernError::InvalidAddress(base + 16 * PAGE))
    );
    assert!(fx.proc.pagetable.walk(base).is_some());
    assert_eq!(fx.proc.vmas.free_slots(), NVMA - 1);
}

#[test]
fn partial_unmaps_keep_region_until_last_page() {
    let mut fx = Fixture::new(b"", OpenMode::Read);
    let refs = file_refs(&fx.file);
    let base = fx.sys_mmap(4 * PGSIZE, PROT_READ, MAP_PRIVATE);

    assert_eq!(fx.sys_munmap(base + PAGE, 2 * PGSIZE), 0);
    assert_eq!(fx.proc.vmas.free_slots(), NVMA - 1);
    assert_eq!(fx.sys_munmap(base, PGSIZE), 0);
    assert_eq!(fx.proc.vmas.free_slots(), NVMA - 1);
    assert_eq!(file_refs(&fx.file), refs + 1);

    assert_eq!(fx.sys_munmap(base + 3 * PAGE, PGSIZE), 0);
    assert_eq!(fx.proc.vmas.free_slots(), NVMA);
    assert_eq!(file_refs(&fx.file), refs);
}

#[test]
fn dirty_shared_pages_reach_the_file() {
    let mut fx = Fixture::new(&file_data(2 * PGSIZE), OpenMode::ReadWrite);
    let base = fx.sys_mmap(2 * PGSIZE, PROT_READ | PROT_WRITE, MAP_SHARED);

    // read page 0 only, dirty page 1
    assert_eq!(fx.load(base, 3), [0, 1, 2]);
    fx.store(base + PAGE + 100, b"written through the mapping");
    let before = fx.fs.transactions();

    assert_eq!(fx.sys_munmap(base, 2 * PGSIZE), 0);

    let mut expected = file_data(2 * PGSIZE);
    expected[PGSIZE + 100..PGSIZE + 127].copy_from_slice(b"written through the mapping");
    assert_eq!(fx.fs.contents(fx.file.ino()), expected);

    // one dirty page, split into chunks of at most one transaction each
    let chunks = PGSIZE.div_ceil(fx.fs.max_chunk()) as u64;
    assert_eq!(fx.fs.transactions() - before, chunks);
    assert_eq!(fx.fs.open_transactions(), 0);
}

#[test]
fn private_pages_are_not_written_back() {
    let mut fx = Fixture::new(&file_data(PGSIZE), OpenMode::ReadWrite);
    let base = fx.sys_mmap(PGSIZE, PROT_READ | PROT_WRITE, MAP_PRIVATE);

    fx.store(base, b"scratch");
    assert_eq!(fx.load(base, 7), b"scratch");
    assert_eq!(fx.sys_munmap(base, PGSIZE), 0);
    assert_eq!(fx.fs.contents(fx.file.ino()), file_data(PGSIZE));
    assert_eq!(fx.fs.chunks(), 0);
}

#[test]
fn short_write_back_continues_unmapping_by_default() {
    let mut fx = Fixture::new(&file_data(PGSIZE), OpenMode::ReadWrite);
    let base = fx.sys_mmap(PGSIZE, PROT_READ | PROT_WRITE, MAP_SHARED);
    fx.store(base, &[0xee; 200]);

    fx.fs.set_write_limit(Some(100));
    assert_eq!(fx.sys_munmap(base, PGSIZE), 0);

    // first chunk came up short, the rest of the page was abandoned
    assert_eq!(fx.fs.chunks(), 1);
    let contents = fx.fs.contents(fx.file.ino());
    assert_eq!(&contents[..100], &[0xee; 100][..]);
    assert_eq!(&contents[100..200], &file_data(PGSIZE)[100..200]);
    assert!(fx.proc.pagetable.walk(base).is_none());
    assert_eq!(fx.proc.vmas.free_slots(), NVMA);
}

#[test]
fn short_write_back_can_abort_the_unmap() {
    let config = VmConfig {
        writeback: WritebackPolicy::Abort,
        ..VmConfig::default()
    };
    let mut fx = Fixture::with_config(&file_data(PGSIZE), OpenMode::ReadWrite, config);
    let base = fx.sys_mmap(PGSIZE, PROT_READ | PROT_WRITE, MAP_SHARED);
    fx.store(base, b"dirty");

    fx.fs.set_write_limit(Some(0));
    assert_eq!(
        munmap(&mut fx.proc, &fx.fs, base, PAGE),
        Err(KernError::Io {
            written: 0,
            requested: fx.fs.max_chunk()
        })
    );
    assert!(fx.proc.pagetable.walk(base).is_some());
    assert_eq!(fx.proc.vmas.free_slots(), NVMA - 1);

    // once the file system recovers the unmap goes through
    fx.fs.set_write_limit(None);
    assert_eq!(fx.sys_munmap(base, PGSIZE), 0);
    assert_eq!(&fx.fs.contents(fx.file.ino())[..5], b"dirty");
}

#[test]
fn slot_table_limit() {
    let mut fx = Fixture::new(b"", OpenMode::Read);
    for _ in 0..NVMA {
        assert_ne!(fx.sys_mmap(PGSIZE, PROT_READ, MAP_PRIVATE), SYSCALL_FAILED);
    }
    let refs = file_refs(&fx.file);

    assert_eq!(
        mmap(&mut fx.proc, PAGE, VmProt::READ, MapFlags::PRIVATE, fx.fd),
        Err(KernError::TooManyMappings)
    );
    assert_eq!(file_refs(&fx.file), refs);
    assert!(KernError::TooManyMappings.is_exhaustion());
}

#[test]
fn address_space_exhaustion() {
    let config = VmConfig {
        max_va: 4 * PAGE,
        ..VmConfig::default()
    };
    let mut fx = Fixture::with_config(b"", OpenMode::Read, config);
    assert_eq!(fx.sys_mmap(3 * PGSIZE, PROT_READ, MAP_PRIVATE), 0);
    assert_eq!(
        mmap(&mut fx.proc, 2 * PAGE, VmProt::READ, MapFlags::PRIVATE, fx.fd),
        Err(KernError::NoSpace)
    );
    assert_eq!(fx.proc.vmas.free_slots(), NVMA - 1);
}

#[test]
fn regions_do_not_overlap() {
    let mut fx = Fixture::new(b"", OpenMode::Read);
    let lengths = [PGSIZE, 3 * PGSIZE + 1, 1, 2 * PGSIZE];
    let bases: Vec<u64> = lengths
        .iter()
        .map(|&len| fx.sys_mmap(len, PROT_READ, MAP_PRIVATE))
        .collect();

    // free a hole in the middle and let a smaller mapping fill it
    assert_eq!(fx.sys_munmap(bases[1], 4 * PGSIZE), 0);
    let refill = fx.sys_mmap(2 * PGSIZE, PROT_READ, MAP_PRIVATE);
    assert_eq!(refill, bases[1]);

    let live: Vec<_> = fx.proc.vmas.live().filter_map(|s| fx.proc.vmas.get(s)).collect();
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            assert!(a.end() <= b.base || b.end() <= a.base);
        }
    }
}

#[test]
fn hole_left_by_partial_unmap_is_not_reused() {
    let mut fx = Fixture::new(b"", OpenMode::Read);
    let refs = file_refs(&fx.file);
    let a = fx.sys_mmap(3 * PGSIZE, PROT_READ, MAP_PRIVATE);
    assert_eq!(fx.sys_munmap(a + PAGE, PGSIZE), 0);

    let b = fx.sys_mmap(PGSIZE, PROT_READ, MAP_PRIVATE);
    assert_ne!(b, SYSCALL_FAILED);
    assert!(b >= a + 3 * PAGE);

    // each region comes back whole
    assert_eq!(fx.sys_munmap(b, PGSIZE), 0);
    assert_eq!(fx.proc.vmas.free_slots(), NVMA - 1);
    unmap_all(&mut fx.proc, &fx.fs).unwrap();
    assert_eq!(fx.proc.vmas.free_slots(), NVMA);
    assert_eq!(file_refs(&fx.file), refs);
}

#[test]
fn unmap_with_overflowing_length_fails_cleanly() {
    let mut fx = Fixture::new(b"", OpenMode::Read);
    let base = fx.sys_mmap(PGSIZE, PROT_READ, MAP_PRIVATE);

    assert!(matches!(
        munmap(&mut fx.proc, &fx.fs, base, u64::MAX),
        Err(KernError::InvalidAddress(_))
    ));
    assert!(fx.proc.pagetable.walk(base).is_some());
    assert_eq!(fx.proc.vmas.free_slots(), NVMA - 1);
}

#[test]
fn teardown_writes_back_and_frees_everything() {
    let mut fx = Fixture::new(&file_data(2 * PGSIZE), OpenMode::ReadWrite);
    let refs = file_refs(&fx.file);
    let a = fx.sys_mmap(2 * PGSIZE, PROT_READ | PROT_WRITE, MAP_SHARED);
    let b = fx.sys_mmap(PGSIZE, PROT_READ, MAP_PRIVATE);
    fx.store(a + PAGE, b"exit");
    fx.load(b, 1);
    assert_eq!(fx.sys_munmap(a, PGSIZE), 0);

    unmap_all(&mut fx.proc, &fx.fs).unwrap();
    assert_eq!(fx.proc.vmas.free_slots(), NVMA);
    assert_eq!(file_refs(&fx.file), refs);
    assert_eq!(&fx.fs.contents(fx.file.ino())[PGSIZE..PGSIZE + 4], b"exit");
}

#[test]
fn processes_map_independently() {
    let fs = Arc::new(MemFs::new());
    let ino = fs.create(&file_data(PGSIZE));

    thread::scope(|s| {
        for t in 0..4u8 {
            let fs = Arc::clone(&fs);
            s.spawn(move || {
                let mut proc = Proc::new(Box::new(SoftPageTable::new()));
                let fd = proc
                    .fdalloc(File::open(ino, OpenMode::Read))
                    .unwrap();
                for _ in 0..50 {
                    let base = mmap(&mut proc, PAGE, VmProt::READ, MapFlags::PRIVATE, fd).unwrap();
                    // every process starts from an empty address space
                    assert_eq!(base, 0);
                    vma_fault(&mut proc, &*fs, base + t as u64, FaultType::Read).unwrap();
                    munmap(&mut proc, &*fs, base, PAGE).unwrap();
                }
                assert_eq!(proc.vmas.free_slots(), NVMA);
            });
        }
    });
}
