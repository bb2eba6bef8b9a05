//! Command-line argument access, reconstructed from the registers `_start` receives
//! from `exec`'s trapframe setup (`a0` = argc, `a1` = argv), not from a libc-style
//! `main(argc, argv)` signature.

use core::arch::asm;
use core::slice;
use core::str::Utf8Error;

/// Command-line arguments passed to the program, including the program name at
/// index 0.
pub struct Args {
    argc: usize,
    argv: *const *const u8,
}

/// Iterator over raw byte-slice arguments.
pub struct ArgsIter {
    argv: *const *const u8,
    current: usize,
    end: usize,
}

/// Iterator over `&str` arguments; skips any entry that is not valid UTF-8.
pub struct ArgsStrIter {
    iter: ArgsIter,
}

impl Args {
    /// Constructs `Args` from the stack registers left by `exec`.
    ///
    /// # Safety
    /// Must be called at program start, before any other function call disturbs
    /// `a0`/`a1`.
    #[inline(always)]
    pub unsafe fn from_stack() -> Self {
        let argc: usize;
        let argv: *const *const u8;

        unsafe {
            asm!(
                "mv {0}, a0",
                "mv {1}, a1",
                out(reg) argc,
                out(reg) argv,
            )
        };

        Self { argc, argv }
    }

    /// Number of arguments, including the program name.
    #[allow(clippy::len_without_is_empty)] // empty arg list is not possible
    pub fn len(&self) -> usize {
        self.argc
    }

    /// Number of arguments, excluding the program name.
    pub fn args_len(&self) -> usize {
        self.argc.saturating_sub(1)
    }

    /// Program name as a byte slice.
    pub fn program(&self) -> Option<&'static [u8]> {
        self.get(0)
    }

    /// Argument at `index` as a byte slice.
    pub fn get(&self, index: usize) -> Option<&'static [u8]> {
        if index >= self.argc {
            return None;
        }

        unsafe {
            let ptr = *self.argv.add(index);
            let mut len = 0;
            while *ptr.add(len) != 0 {
                len += 1;
            }
            Some(slice::from_raw_parts(ptr, len))
        }
    }

    /// Argument at `index` as a `&str`, or `None` if out of range or not UTF-8.
    pub fn get_str(&self, index: usize) -> Option<&'static str> {
        self.get(index).and_then(|b| str::from_utf8(b).ok())
    }

    /// Iterates all args, including the program name.
    pub fn iter(&self) -> ArgsIter {
        ArgsIter { argv: self.argv, current: 0, end: self.argc }
    }

    /// Iterates all args as `&str`, including the program name.
    pub fn iter_as_str(&self) -> ArgsStrIter {
        ArgsStrIter { iter: self.iter() }
    }

    /// Iterates args, excluding the program name.
    pub fn args(&self) -> ArgsIter {
        ArgsIter { argv: self.argv, current: 1, end: self.argc }
    }

    /// Iterates args as `&str`, excluding the program name.
    pub fn args_as_str(&self) -> ArgsStrIter {
        ArgsStrIter { iter: self.args() }
    }
}

impl Iterator for ArgsIter {
    type Item = &'static [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.end {
            return None;
        }

        unsafe {
            let ptr = *self.argv.add(self.current);
            self.current += 1;

            let mut len = 0;
            while *ptr.add(len) != 0 {
                len += 1;
            }

            Some(slice::from_raw_parts(ptr, len))
        }
    }
}

impl Iterator for ArgsStrIter {
    type Item = &'static str;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().and_then(|arg| str::from_utf8(arg).ok())
    }
}

impl IntoIterator for &Args {
    type Item = &'static [u8];
    type IntoIter = ArgsIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Converts a NUL-terminated byte slice to `&str`, stopping at the first NUL.
///
/// # Safety
/// `cstr` must point at a valid NUL-terminated byte sequence of at least
/// `cstr.len()` bytes readable past any embedded NUL.
pub unsafe fn str_from_cstr<'a>(cstr: &[u8]) -> Result<&'a str, Utf8Error> {
    let ptr = cstr.as_ptr();
    unsafe {
        let mut len = 0;
        while *ptr.add(len) != 0 {
            len += 1;
        }
        str::from_utf8(slice::from_raw_parts(ptr, len))
    }
}
