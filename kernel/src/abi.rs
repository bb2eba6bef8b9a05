//! Shared constants and wire types re-exported to `user`. Kept as a flat re-export
//! module so the user crate depends on this one surface rather than reaching into
//! kernel internals directly.

pub use crate::file::{CONSOLE, OpenFlag};
pub use crate::fs::{DIRSIZE, Directory, InodeType, Stat};
pub use crate::param::{MAXARG, MAXPATH, PROCNAME};
pub use crate::syscall::Syscall;

/// Timer ticks per second (`start.rs`'s `stimecmp` interval on the 10MHz `qemu virt`
/// clock), the conversion `ps`/`time` need to render tick counts as seconds.
pub const TICKS_PER_SEC: usize = 10;

/// Fixed-layout, address-space-portable form of `proc::UProc`, for `getprocs`'s
/// copy-out to user memory. `state` is a NUL-padded short tag ("run", "sleep", ...)
/// rather than the kernel's `&'static str`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawProc {
    pub pid: u32,
    pub ppid: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub start_ticks: u64,
    pub cpu_ticks: u64,
    pub state: [u8; 8],
    pub name: [u8; PROCNAME],
}

impl From<&crate::proc::UProc> for RawProc {
    fn from(p: &crate::proc::UProc) -> Self {
        let mut state = [0u8; 8];
        let bytes = p.state.as_bytes();
        let n = bytes.len().min(state.len());
        state[..n].copy_from_slice(&bytes[..n]);

        Self {
            pid: p.pid,
            ppid: p.ppid,
            uid: p.uid,
            gid: p.gid,
            size: p.size as u64,
            start_ticks: p.start_ticks as u64,
            cpu_ticks: p.cpu_ticks as u64,
            state,
            name: p.name,
        }
    }
}
