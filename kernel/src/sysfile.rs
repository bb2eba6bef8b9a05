//! File, directory, and pipe syscalls: open/read/write/close/dup/fstat/link/unlink/
//! mkdir/mknod/chdir/pipe/exec.

use core::mem::size_of;

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::KernelError;
use crate::exec;
use crate::file::{File, OpenFlag};
use crate::fs::{self, InodeType, Path};
use crate::log::Operation;
use crate::param::{MAXARG, MAXPATH};
use crate::pipe::Pipe;
use crate::proc;
use crate::syscall::SyscallArgs;
use crate::vm::VA;

pub fn sys_dup(args: &SyscallArgs) -> Result<usize, KernelError> {
    let (_fd, id) = args.fd(0)?;
    let dup_id = File::dup(id);
    args.alloc_fd(dup_id)
}

pub fn sys_read(args: &SyscallArgs) -> Result<usize, KernelError> {
    let (_fd, id) = args.fd(0)?;
    let addr = args.addr(1);
    let n = args.int(2).max(0) as usize;
    File::read(id, addr, n)
}

pub fn sys_write(args: &SyscallArgs) -> Result<usize, KernelError> {
    let (_fd, id) = args.fd(0)?;
    let addr = args.addr(1);
    let n = args.int(2).max(0) as usize;
    File::write(id, addr, n)
}

pub fn sys_close(args: &SyscallArgs) -> Result<usize, KernelError> {
    let (fd, id) = args.fd(0)?;
    let (_idx, data) = proc::current_proc_and_data_mut();
    data.open_files[fd] = None;
    File::close(id);
    Ok(0)
}

pub fn sys_fstat(args: &SyscallArgs) -> Result<usize, KernelError> {
    let (_fd, id) = args.fd(0)?;
    let addr = args.addr(1);
    File::stat(id, addr)?;
    Ok(0)
}

pub fn sys_link(args: &SyscallArgs) -> Result<usize, KernelError> {
    let old = args.string(0, MAXPATH)?;
    let new = args.string(1, MAXPATH)?;
    let _op = Operation::begin();
    fs::link(&old, &new)?;
    Ok(0)
}

pub fn sys_unlink(args: &SyscallArgs) -> Result<usize, KernelError> {
    let path = args.string(0, MAXPATH)?;
    let _op = Operation::begin();
    fs::remove_link(&path)?;
    Ok(0)
}

pub fn sys_mkdir(args: &SyscallArgs) -> Result<usize, KernelError> {
    let path = args.string(0, MAXPATH)?;
    let _op = Operation::begin();
    fs::create(&path, InodeType::Directory, 0, 0)?.put();
    Ok(0)
}

pub fn sys_mknod(args: &SyscallArgs) -> Result<usize, KernelError> {
    let path = args.string(0, MAXPATH)?;
    let major = args.int(1) as u16;
    let minor = args.int(2) as u16;
    let _op = Operation::begin();
    fs::create(&path, InodeType::Device, major, minor)?.put();
    Ok(0)
}

pub fn sys_chdir(args: &SyscallArgs) -> Result<usize, KernelError> {
    let path = args.string(0, MAXPATH)?;
    let _op = Operation::begin();

    let (_idx, data) = proc::current_proc_and_data_mut();
    let ip = Path(&path).resolve(data.cwd)?;
    if ip.r#type() != InodeType::Directory {
        ip.put();
        return Err(KernelError::Invalid);
    }
    if let Some(old) = data.cwd.replace(ip) {
        old.put();
    }
    Ok(0)
}

pub fn sys_open(args: &SyscallArgs) -> Result<usize, KernelError> {
    let path = args.string(0, MAXPATH)?;
    let flags = args.raw(1);

    let _op = Operation::begin();

    let inode = if flags & OpenFlag::CREATE != 0 {
        fs::create(&path, InodeType::File, 0, 0)?
    } else {
        let (_idx, data) = proc::current_proc_and_data_mut();
        let ip = Path(&path).resolve(data.cwd)?;
        if ip.r#type() == InodeType::Directory && flags != OpenFlag::READ_ONLY {
            ip.put();
            return Err(KernelError::Invalid);
        }
        ip
    };

    let readable = flags & OpenFlag::WRITE_ONLY == 0;
    let writable = flags & OpenFlag::WRITE_ONLY != 0 || flags & OpenFlag::READ_WRITE != 0;
    let is_device = inode.r#type() == InodeType::Device;
    let major = inode.major();

    let file_id = match File::alloc() {
        Ok(id) => id,
        Err(e) => {
            inode.put();
            return Err(e);
        }
    };

    let fd = match args.alloc_fd(file_id) {
        Ok(fd) => fd,
        Err(e) => {
            File::close(file_id);
            inode.put();
            return Err(e);
        }
    };

    if is_device {
        File::set_device(file_id, inode, major, readable, writable);
    } else {
        File::set_inode(file_id, inode, readable, writable);
    }

    Ok(fd)
}

pub fn sys_pipe(args: &SyscallArgs) -> Result<usize, KernelError> {
    let fd_array = args.addr(0);
    let (read_id, write_id) = Pipe::alloc()?;

    let fd0 = match args.alloc_fd(read_id) {
        Ok(fd) => fd,
        Err(e) => {
            File::close(read_id);
            File::close(write_id);
            return Err(e);
        }
    };
    let fd1 = match args.alloc_fd(write_id) {
        Ok(fd) => fd,
        Err(e) => {
            let (_idx, data) = proc::current_proc_and_data_mut();
            data.open_files[fd0] = None;
            File::close(read_id);
            File::close(write_id);
            return Err(e);
        }
    };

    let (_idx, data) = proc::current_proc_and_data_mut();
    let word = size_of::<usize>();
    let copy_ok = {
        let pagetable = match data.pagetable.as_mut() {
            Some(pt) => pt,
            None => return Err(KernelError::BadAddress),
        };
        pagetable.copy_to_user(fd_array, &fd0.to_ne_bytes()).is_ok()
            && pagetable.copy_to_user(fd_array + word, &fd1.to_ne_bytes()).is_ok()
    };

    if !copy_ok {
        data.open_files[fd0] = None;
        data.open_files[fd1] = None;
        File::close(read_id);
        File::close(write_id);
        return Err(KernelError::BadAddress);
    }

    Ok(0)
}

pub fn sys_exec(args: &SyscallArgs) -> Result<usize, KernelError> {
    let path = args.string(0, MAXPATH)?;
    let argv_addr = args.addr(1);

    let argv: Vec<String> = {
        let (_idx, data) = proc::current_proc_and_data_mut();
        let pagetable = data.pagetable.as_mut().ok_or(KernelError::BadAddress)?;
        let word = size_of::<usize>();

        let mut argv = Vec::new();
        for i in 0..MAXARG {
            let mut ptr_bytes = [0u8; size_of::<usize>()];
            pagetable.copy_from_user(argv_addr + i * word, &mut ptr_bytes)?;
            let ptr = usize::from_ne_bytes(ptr_bytes);
            if ptr == 0 {
                break;
            }

            let mut s = String::new();
            let mut byte = [0u8; 1];
            for j in 0..MAXPATH {
                pagetable.copy_from_user(VA(ptr) + j, &mut byte)?;
                if byte[0] == 0 {
                    break;
                }
                s.push(byte[0] as char);
            }
            argv.push(s);
        }
        argv
    };

    let refs: Vec<&str> = argv.iter().map(String::as_str).collect();
    exec::exec(&path, &refs)
}
