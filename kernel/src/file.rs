//! Open-file table: a fixed-size array of open-file descriptions, shared and
//! reference-counted across `dup` and `fork`. Each process stores a raw `usize` index
//! into this table (see `ProcData::open_files`) rather than an owned handle, the same
//! way `proc.rs` addresses PCBs by index instead of by pointer.
//!
//! Unlike the split meta/per-file-sleeplock table this is descended from, every slot
//! here sits behind one spinlock. Critical sections only ever touch the small
//! `FileSlot` bookkeeping (ref count, kind, offset); the actual disk or pipe I/O runs
//! against a cloned `Inode`/`Arc<Pipe>` with the table lock already released, so a
//! blocking read on one fd never stalls opens/closes on another.

use alloc::sync::Arc;
use core::mem::size_of;
use core::slice;

use crate::buf::BSIZE;
use crate::error::KernelError;
use crate::fs::{Inode, Stat};
use crate::log::Operation;
use crate::param::{MAXOPBLOCKS, NDEV, NFILE};
use crate::pipe::Pipe;
use crate::spinlock::SpinLock;
use crate::vm::VA;

/// `sys_open`'s mode flags, re-exported to user space via `abi.rs`.
pub mod OpenFlag {
    pub const READ_ONLY: usize = 0x000;
    pub const WRITE_ONLY: usize = 0x001;
    pub const READ_WRITE: usize = 0x002;
    pub const CREATE: usize = 0x200;
    pub const TRUNCATE: usize = 0x400;
}

/// Console's device major number.
pub const CONSOLE: u16 = 1;

#[derive(Clone)]
enum FileKind {
    Inode(Inode),
    Device { inode: Inode, major: u16 },
    PipeRead(Arc<Pipe>),
    PipeWrite(Arc<Pipe>),
}

struct FileSlot {
    ref_count: usize,
    readable: bool,
    writable: bool,
    offset: u32,
    kind: Option<FileKind>,
}

impl FileSlot {
    const fn empty() -> Self {
        Self { ref_count: 0, readable: false, writable: false, offset: 0, kind: None }
    }
}

static TABLE: SpinLock<[FileSlot; NFILE]> =
    SpinLock::new([const { FileSlot::empty() }; NFILE], "filetable");

#[derive(Clone, Copy)]
struct Device {
    read: fn(VA, usize) -> Result<usize, KernelError>,
    write: fn(VA, usize) -> Result<usize, KernelError>,
}

fn console_read(addr: VA, n: usize) -> Result<usize, KernelError> {
    crate::console::read(addr, n)
}

fn console_write(addr: VA, n: usize) -> Result<usize, KernelError> {
    crate::console::write(addr, n)
}

static DEVICES: [Option<Device>; NDEV] = {
    let mut devices = [None; NDEV];
    devices[CONSOLE as usize] = Some(Device { read: console_read, write: console_write });
    devices
};

pub struct File;

impl File {
    /// Reserves a free slot with ref count 1 and no kind assigned. The caller must
    /// install a kind (`set_inode`/`set_device`) before the descriptor reaches user
    /// space.
    pub fn alloc() -> Result<usize, KernelError> {
        let mut table = TABLE.lock();
        for (id, slot) in table.iter_mut().enumerate() {
            if slot.ref_count == 0 {
                *slot = FileSlot { ref_count: 1, ..FileSlot::empty() };
                return Ok(id);
            }
        }
        Err(KernelError::OutOfFiles)
    }

    pub(crate) fn set_inode(id: usize, inode: Inode, readable: bool, writable: bool) {
        let mut table = TABLE.lock();
        table[id].kind = Some(FileKind::Inode(inode));
        table[id].readable = readable;
        table[id].writable = writable;
        table[id].offset = 0;
    }

    pub(crate) fn set_device(id: usize, inode: Inode, major: u16, readable: bool, writable: bool) {
        let mut table = TABLE.lock();
        table[id].kind = Some(FileKind::Device { inode, major });
        table[id].readable = readable;
        table[id].writable = writable;
    }

    pub(crate) fn set_pipe_read(id: usize, pipe: Arc<Pipe>) {
        let mut table = TABLE.lock();
        table[id].kind = Some(FileKind::PipeRead(pipe));
        table[id].readable = true;
        table[id].writable = false;
    }

    pub(crate) fn set_pipe_write(id: usize, pipe: Arc<Pipe>) {
        let mut table = TABLE.lock();
        table[id].kind = Some(FileKind::PipeWrite(pipe));
        table[id].readable = false;
        table[id].writable = true;
    }

    /// Bumps the reference count and returns the same id, for `dup`/`fork`.
    pub fn dup(id: usize) -> usize {
        let mut table = TABLE.lock();
        assert!(table[id].ref_count >= 1, "File::dup: closed file");
        table[id].ref_count += 1;
        id
    }

    /// Drops a reference; on the last one, releases the underlying inode or pipe end.
    pub fn close(id: usize) {
        let kind = {
            let mut table = TABLE.lock();
            assert!(table[id].ref_count >= 1, "File::close: already closed");
            table[id].ref_count -= 1;
            if table[id].ref_count > 0 {
                return;
            }
            table[id].kind.take()
        };

        match kind {
            None => {}
            Some(FileKind::Inode(inode)) | Some(FileKind::Device { inode, .. }) => {
                let _op = Operation::begin();
                inode.put();
            }
            Some(FileKind::PipeRead(pipe)) => pipe.close(false),
            Some(FileKind::PipeWrite(pipe)) => pipe.close(true),
        }
    }

    /// Fills in the `Stat` at `addr` for an inode-backed or device file.
    pub fn stat(id: usize, addr: VA) -> Result<(), KernelError> {
        let inode = {
            let table = TABLE.lock();
            match &table[id].kind {
                Some(FileKind::Inode(inode)) | Some(FileKind::Device { inode, .. }) => inode.dup(),
                _ => return Err(KernelError::Fs),
            }
        };

        let stat = inode.stat();
        inode.put();

        let src =
            unsafe { slice::from_raw_parts(&stat as *const Stat as *const u8, size_of::<Stat>()) };

        let (_idx, data) = crate::proc::current_proc_and_data_mut();
        data.pagetable.as_mut().ok_or(KernelError::BadAddress)?.copy_to_user(addr, src)
    }

    pub fn read(id: usize, addr: VA, n: usize) -> Result<usize, KernelError> {
        let (readable, offset, kind) = {
            let table = TABLE.lock();
            (table[id].readable, table[id].offset, table[id].kind.clone())
        };
        if !readable {
            return Err(KernelError::Io);
        }

        match kind {
            None => panic!("File::read: empty slot"),
            Some(FileKind::PipeRead(pipe)) => pipe.read(addr, n),
            Some(FileKind::PipeWrite(_)) => Err(KernelError::Io),
            Some(FileKind::Device { major, .. }) => match &DEVICES[major as usize] {
                Some(dev) => (dev.read)(addr, n),
                None => Err(KernelError::Io),
            },
            Some(FileKind::Inode(inode)) => {
                let read = inode.read_user(offset, addr, n)?;
                TABLE.lock()[id].offset += read as u32;
                Ok(read)
            }
        }
    }

    pub fn write(id: usize, addr: VA, n: usize) -> Result<usize, KernelError> {
        let (writable, kind) = {
            let table = TABLE.lock();
            (table[id].writable, table[id].kind.clone())
        };
        if !writable {
            return Err(KernelError::Io);
        }

        match kind {
            None => panic!("File::write: empty slot"),
            Some(FileKind::PipeWrite(pipe)) => pipe.write(addr, n),
            Some(FileKind::PipeRead(_)) => Err(KernelError::Io),
            Some(FileKind::Device { major, .. }) => match &DEVICES[major as usize] {
                Some(dev) => (dev.write)(addr, n),
                None => Err(KernelError::Io),
            },
            Some(FileKind::Inode(inode)) => {
                // Chunk writes so each logged transaction stays within the log's
                // block budget: inode block, indirect block, two allocations of
                // slop for a non-block-aligned write.
                let max = ((MAXOPBLOCKS - 4) / 2) * BSIZE;
                let mut written = 0;

                while written < n {
                    let chunk = (n - written).min(max);
                    let offset = TABLE.lock()[id].offset;

                    let _op = Operation::begin();
                    let w = inode.write_user(offset, addr + written, chunk)?;
                    drop(_op);

                    TABLE.lock()[id].offset += w as u32;
                    written += w;
                    if w < chunk {
                        break;
                    }
                }

                Ok(written)
            }
        }
    }
}
