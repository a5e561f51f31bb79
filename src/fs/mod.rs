//! File handles and the transactional file writer
//!
//! The mapping code sees files only through this module: reference-counted
//! open-file handles ([`FileRef`]) and the [`FileTxWriter`] trait through
//! which page contents are read from and written back to the file system.
//!
//! - `memfs`: an in-memory file system implementing [`FileTxWriter`]

pub mod memfs;

pub use memfs::MemFs;

use alloc::sync::Arc;

use log::trace;

use crate::config::MAX_WRITE_CHUNK;

/// Inode number
pub type Ino = u32;

/// File open modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    pub const fn readable(&self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite)
    }

    pub const fn writable(&self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// An open file
#[derive(Debug)]
pub struct File {
    ino: Ino,
    readable: bool,
    writable: bool,
}

/// Shared handle to an open file; the strong count is the file's refcount
pub type FileRef = Arc<File>;

impl File {
    /// Open inode `ino` with `mode`
    pub fn open(ino: Ino, mode: OpenMode) -> FileRef {
        Arc::new(Self {
            ino,
            readable: mode.readable(),
            writable: mode.writable(),
        })
    }

    pub fn ino(&self) -> Ino {
        self.ino
    }

    pub fn readable(&self) -> bool {
        self.readable
    }

    pub fn writable(&self) -> bool {
        self.writable
    }
}

/// Take another reference to an open file
pub fn filedup(f: &FileRef) -> FileRef {
    let dup = Arc::clone(f);
    trace!("filedup: ino {} refs {}", f.ino, Arc::strong_count(f));
    dup
}

/// Drop a reference to an open file
pub fn fileclose(f: FileRef) {
    trace!("fileclose: ino {} refs {}", f.ino, Arc::strong_count(&f) - 1);
    drop(f);
}

/// Number of live references to an open file
pub fn file_refs(f: &FileRef) -> usize {
    Arc::strong_count(f)
}

// ============================================================================
// Transactional writer
// ============================================================================

/// File-system operations the mapping code relies on
///
/// Writes must happen inside a transaction (`begin_op` .. `end_op`), and no
/// single write may exceed [`FileTxWriter::max_chunk`] bytes.
pub trait FileTxWriter: Send + Sync {
    /// Start a file-system transaction, waiting for log space if needed
    fn begin_op(&self);

    /// Finish the current transaction
    fn end_op(&self);

    /// Write `src` at byte `off`; returns the number of bytes written
    fn write_chunk(&self, file: &File, src: &[u8], off: u64) -> usize;

    /// Read into `dst` from byte `off`; returns the number of bytes read
    fn read_at(&self, file: &File, dst: &mut [u8], off: u64) -> usize;

    /// Largest write one transaction can carry
    fn max_chunk(&self) -> usize {
        MAX_WRITE_CHUNK
    }
}

/// An open transaction, ended when dropped
pub struct Transaction<'a> {
    fs: &'a dyn FileTxWriter,
}

impl<'a> Transaction<'a> {
    /// Begin a transaction on `fs`
    pub fn begin(fs: &'a dyn FileTxWriter) -> Self {
        fs.begin_op();
        Self { fs }
    }

    /// Write a chunk inside this transaction
    pub fn write(&self, file: &File, src: &[u8], off: u64) -> usize {
        self.fs.write_chunk(file, src, off)
    }

    /// Read inside this transaction
    pub fn read(&self, file: &File, dst: &mut [u8], off: u64) -> usize {
        self.fs.read_at(file, dst, off)
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        self.fs.end_op();
    }
}
