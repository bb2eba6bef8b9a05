//! Syscall numbering, argument-fetch helpers, and the dispatcher `usertrap` calls into
//! after an `ecall` exception.

use alloc::string::String;

use crate::error::KernelError;
use crate::param::NOFILE;
use crate::proc::{self, TrapFrame};
use crate::sysfile::*;
use crate::sysproc::*;
use crate::vm::VA;

/// System call numbers, shared with `user` via `abi::Syscall`.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Fork = 1,
    Exit = 2,
    Wait = 3,
    Pipe = 4,
    Read = 5,
    Kill = 6,
    Exec = 7,
    Fstat = 8,
    Chdir = 9,
    Dup = 10,
    Getpid = 11,
    Sbrk = 12,
    Sleep = 13,
    Uptime = 14,
    Open = 15,
    Write = 16,
    Mknod = 17,
    Unlink = 18,
    Link = 19,
    Mkdir = 20,
    Close = 21,
    /// Non-standard: feeds `ps`.
    GetProcs = 22,
}

impl TryFrom<usize> for Syscall {
    type Error = KernelError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Syscall::Fork,
            2 => Syscall::Exit,
            3 => Syscall::Wait,
            4 => Syscall::Pipe,
            5 => Syscall::Read,
            6 => Syscall::Kill,
            7 => Syscall::Exec,
            8 => Syscall::Fstat,
            9 => Syscall::Chdir,
            10 => Syscall::Dup,
            11 => Syscall::Getpid,
            12 => Syscall::Sbrk,
            13 => Syscall::Sleep,
            14 => Syscall::Uptime,
            15 => Syscall::Open,
            16 => Syscall::Write,
            17 => Syscall::Mknod,
            18 => Syscall::Unlink,
            19 => Syscall::Link,
            20 => Syscall::Mkdir,
            21 => Syscall::Close,
            22 => Syscall::GetProcs,
            _ => return Err(KernelError::Invalid),
        })
    }
}

/// Fetches typed arguments for the syscall currently trapped into, out of the calling
/// process's trapframe. Built fresh per syscall; never outlives the dispatch.
pub struct SyscallArgs {
    idx: usize,
}

impl SyscallArgs {
    fn new(idx: usize) -> Self {
        Self { idx }
    }

    fn trapframe(&self) -> &'static TrapFrame {
        proc::PROC_TABLE.get(self.idx).data().trapframe.as_ref().unwrap()
    }

    pub fn raw(&self, index: usize) -> usize {
        let tf = self.trapframe();
        match index {
            0 => tf.a0,
            1 => tf.a1,
            2 => tf.a2,
            3 => tf.a3,
            4 => tf.a4,
            5 => tf.a5,
            _ => panic!("invalid syscall argument index {index}"),
        }
    }

    /// The syscall number, passed in `a7` by convention (not one of the five argument
    /// registers `raw` serves).
    fn number(&self) -> usize {
        self.trapframe().a7
    }

    pub fn int(&self, index: usize) -> isize {
        self.raw(index) as isize
    }

    /// Does not validate the address; `copy_to_user`/`copy_from_user` do that.
    pub fn addr(&self, index: usize) -> VA {
        VA(self.raw(index))
    }

    /// Resolves the nth argument as a process-local file descriptor, returning both
    /// that local slot number and the global open-file-table id it names.
    pub fn fd(&self, index: usize) -> Result<(usize, usize), KernelError> {
        let fd = self.raw(index);
        if fd >= NOFILE {
            return Err(KernelError::Invalid);
        }
        let (_idx, data) = proc::current_proc_and_data_mut();
        let id = data.open_files[fd].ok_or(KernelError::Invalid)?;
        Ok((fd, id))
    }

    /// Reserves the first free local fd slot and points it at open-file-table id
    /// `file_id`.
    pub fn alloc_fd(&self, file_id: usize) -> Result<usize, KernelError> {
        let (_idx, data) = proc::current_proc_and_data_mut();
        for (fd, slot) in data.open_files.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file_id);
                return Ok(fd);
            }
        }
        Err(KernelError::Invalid)
    }

    /// Fetches a NUL-terminated string from user space, one byte at a time, up to
    /// `max` bytes (not counting the terminator).
    pub fn string(&self, index: usize, max: usize) -> Result<String, KernelError> {
        let addr = self.addr(index);
        let (_idx, data) = proc::current_proc_and_data_mut();
        let pagetable = data.pagetable.as_mut().ok_or(KernelError::BadAddress)?;

        let mut out = String::with_capacity(max.min(64));
        let mut byte = [0u8; 1];
        for i in 0..max {
            pagetable.copy_from_user(addr + i, &mut byte)?;
            if byte[0] == 0 {
                return Ok(out);
            }
            out.push(byte[0] as char);
        }
        Err(KernelError::Invalid)
    }
}

/// Entered from `trap::usertrap` right after the `ecall` instruction has been stepped
/// past. Reads the syscall number and arguments out of the trapframe and writes the
/// result back into `a0`; never itself propagates an error to its caller.
#[unsafe(no_mangle)]
pub extern "C" fn syscall() {
    let idx = proc::current_proc();
    let args = SyscallArgs::new(idx);
    let num = args.number();

    let result = match Syscall::try_from(num) {
        Ok(Syscall::Fork) => sys_fork(&args),
        Ok(Syscall::Exit) => sys_exit(&args),
        Ok(Syscall::Wait) => sys_wait(&args),
        Ok(Syscall::Pipe) => sys_pipe(&args),
        Ok(Syscall::Read) => sys_read(&args),
        Ok(Syscall::Kill) => sys_kill(&args),
        Ok(Syscall::Exec) => sys_exec(&args),
        Ok(Syscall::Fstat) => sys_fstat(&args),
        Ok(Syscall::Chdir) => sys_chdir(&args),
        Ok(Syscall::Dup) => sys_dup(&args),
        Ok(Syscall::Getpid) => sys_getpid(&args),
        Ok(Syscall::Sbrk) => sys_sbrk(&args),
        Ok(Syscall::Sleep) => sys_sleep(&args),
        Ok(Syscall::Uptime) => sys_uptime(&args),
        Ok(Syscall::Open) => sys_open(&args),
        Ok(Syscall::Write) => sys_write(&args),
        Ok(Syscall::Mknod) => sys_mknod(&args),
        Ok(Syscall::Unlink) => sys_unlink(&args),
        Ok(Syscall::Link) => sys_link(&args),
        Ok(Syscall::Mkdir) => sys_mkdir(&args),
        Ok(Syscall::Close) => sys_close(&args),
        Ok(Syscall::GetProcs) => sys_getprocs(&args),
        Err(e) => Err(e),
    };

    let (_idx, data) = proc::current_proc_and_data_mut();
    let trapframe = data.trapframe.as_mut().unwrap();
    trapframe.a0 = match result {
        Ok(v) => v,
        Err(e) => {
            crate::log!("syscall {num} failed: {e}");
            -1isize as usize
        }
    };
}
