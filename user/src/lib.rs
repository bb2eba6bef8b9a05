//! Userspace libc-lite: re-exports the syscall ABI (`kernel::abi`), the checked
//! syscall wrappers, `print!`/`println!`, and `Args` as one flat prelude so every
//! `user/bin/*.rs` program can just `use user::*;`.

#![no_std]

use core::panic::PanicInfo;

#[macro_use]
mod io;
mod args;
mod syscall;

pub use kernel::abi::*;

pub use args::*;
pub use io::*;
pub use syscall::*;

pub use core::mem::size_of;

unsafe extern "Rust" {
    /// Entry point every user binary defines with `#[unsafe(no_mangle)] fn
    /// main(args: Args)`. Called by `_start` after `Args` is reconstructed from
    /// the registers `exec` left behind.
    fn main(args: Args);
}

/// Process entry point, placed in `.text.entry` so the loader can jump straight to
/// it regardless of which binary is mapped in. Extracts `Args` from the stack,
/// calls the binary's `main`, and exits with status 0 if `main` returns.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.entry")]
extern "C" fn _start() -> ! {
    unsafe {
        let args = Args::from_stack();
        main(args);
        exit(0);
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    eprintln!("! {}", info);
    exit(1)
}
