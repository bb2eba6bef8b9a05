//! Kernel-wide error type and logging macros.
//!
//! Subsystems define their own small error enums where it's useful (`VmError`,
//! `FsError`, ...) and fold them into `KernelError` via `From`, so call sites deep in
//! `proc.rs`/`syscall.rs` can use `?` without naming the originating subsystem.

use core::alloc::AllocError;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No free slot in the process table.
    OutOfProc,
    /// A physical or virtual memory allocation failed.
    Alloc,
    /// A page table operation failed (bad mapping, already mapped, misaligned).
    BadAddress,
    /// Filesystem/inode layer error.
    Fs,
    /// No free slot in the open-file table.
    OutOfFiles,
    /// exec() argument list too long or image malformed.
    BadExec,
    /// Device I/O failure (disk, console).
    Io,
    /// Bad syscall argument: unknown syscall number, out-of-range fd, unknown pid, no
    /// children to wait for.
    Invalid,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::OutOfProc => "out of process table slots",
            KernelError::Alloc => "allocation failed",
            KernelError::BadAddress => "bad address",
            KernelError::Fs => "filesystem error",
            KernelError::OutOfFiles => "out of file table slots",
            KernelError::BadExec => "malformed executable",
            KernelError::Io => "i/o error",
            KernelError::Invalid => "invalid argument",
        };
        f.write_str(msg)
    }
}

impl From<AllocError> for KernelError {
    fn from(_: AllocError) -> Self {
        KernelError::Alloc
    }
}

/// Logs `$fmt, $args` with file/line prefix, at "error" severity, unconditionally.
#[macro_export]
macro_rules! err {
    ($($arg:tt)*) => {
        $crate::println!("[error {}:{}] {}", file!(), line!(), format_args!($($arg)*))
    };
}

/// Logs `$fmt, $args` with file/line prefix; compiled out entirely in release builds.
#[macro_export]
macro_rules! log {
    ($($arg:tt)*) => {
        #[cfg(debug_assertions)]
        $crate::println!("[log {}:{}] {}", file!(), line!(), format_args!($($arg)*));
    };
}

/// Evaluates `$e`; on `Err`, logs it via `err!` and propagates with `?`.
#[macro_export]
macro_rules! try_log {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => {
                $crate::err!("{}", e);
                return Err(e.into());
            }
        }
    };
}
