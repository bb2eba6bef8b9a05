//! Process-management syscalls: fork/exit/wait/kill/sleep/sbrk/getpid/uptime/getprocs.

use core::mem::size_of;

use crate::abi::RawProc;
use crate::error::KernelError;
use crate::param::NPROC;
use crate::proc::{self, Pid, UProc};
use crate::syscall::SyscallArgs;
use crate::trap;

pub fn sys_fork(_args: &SyscallArgs) -> Result<usize, KernelError> {
    Ok(proc::fork()?.0 as usize)
}

pub fn sys_exit(args: &SyscallArgs) -> ! {
    proc::exit(args.int(0))
}

pub fn sys_wait(args: &SyscallArgs) -> Result<usize, KernelError> {
    let addr = args.addr(0);

    let (pid, status) = proc::wait().ok_or(KernelError::Invalid)?;

    if addr.as_usize() != 0 {
        let (_idx, data) = proc::current_proc_and_data_mut();
        let pagetable = data.pagetable.as_mut().ok_or(KernelError::BadAddress)?;
        pagetable.copy_to_user(addr, &(status as i32).to_ne_bytes())?;
    }

    Ok(pid.0 as usize)
}

pub fn sys_kill(args: &SyscallArgs) -> Result<usize, KernelError> {
    let pid = Pid(args.int(0) as u32);
    if proc::kill(pid) { Ok(0) } else { Err(KernelError::Invalid) }
}

pub fn sys_getpid(_args: &SyscallArgs) -> Result<usize, KernelError> {
    Ok(proc::pid_of(proc::current_proc()).0 as usize)
}

pub fn sys_sbrk(args: &SyscallArgs) -> Result<usize, KernelError> {
    let delta = args.int(0);
    let (_idx, data) = proc::current_proc_and_data_mut();
    let old = data.size;
    proc::growproc(delta)?;
    Ok(old)
}

pub fn sys_sleep(args: &SyscallArgs) -> Result<usize, KernelError> {
    let n = args.int(0);
    if n > 0 {
        trap::sleep_ticks(n as usize);
    }
    Ok(0)
}

pub fn sys_uptime(_args: &SyscallArgs) -> Result<usize, KernelError> {
    Ok(trap::current_ticks())
}

/// Copies up to `max` `RawProc` records (the `abi::UProc` wire encoding) into the
/// user buffer at arg 1. Returns the count copied.
pub fn sys_getprocs(args: &SyscallArgs) -> Result<usize, KernelError> {
    let max = (args.int(0).max(0) as usize).min(NPROC);
    let addr = args.addr(1);

    let mut buf = [UProc {
        pid: 0,
        ppid: 0,
        uid: 0,
        gid: 0,
        size: 0,
        state: "unused",
        start_ticks: 0,
        cpu_ticks: 0,
        name: [0; crate::param::PROCNAME],
    }; NPROC];

    let count = proc::getprocs(max, &mut buf);

    let (_idx, data) = proc::current_proc_and_data_mut();
    let pagetable = data.pagetable.as_mut().ok_or(KernelError::BadAddress)?;

    for (i, entry) in buf.iter().take(count).enumerate() {
        let raw = RawProc::from(entry);
        let bytes = unsafe {
            core::slice::from_raw_parts(&raw as *const RawProc as *const u8, size_of::<RawProc>())
        };
        pagetable.copy_to_user(addr + i * size_of::<RawProc>(), bytes)?;
    }

    Ok(count)
}
