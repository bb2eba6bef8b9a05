//! `print!`/`println!`/`eprint!` over the console driver, plus the panic handler.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::spinlock::SpinLock;

struct Writer;

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            crate::console::putc(b);
        }
        Ok(())
    }
}

struct Printf {
    writer: SpinLock<Writer>,
    locking: AtomicBool,
    panicked: AtomicBool,
}

static PRINTF: Printf = Printf {
    writer: SpinLock::new(Writer, "printf"),
    locking: AtomicBool::new(true),
    panicked: AtomicBool::new(false),
};

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    if PRINTF.locking.load(Ordering::Relaxed) {
        let mut w = PRINTF.writer.lock();
        let _ = w.write_fmt(args);
    } else {
        let _ = Writer.write_fmt(args);
    }
}

#[doc(hidden)]
pub fn _eprint(args: fmt::Arguments<'_>) {
    _print(args);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::printf::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => { $crate::print!("\n") };
    ($($arg:tt)*) => {
        $crate::printf::_print(format_args!("{}\n", format_args!($($arg)*)))
    };
}

#[macro_export]
macro_rules! eprint {
    ($($arg:tt)*) => {
        $crate::printf::_eprint(format_args!($($arg)*))
    };
}

pub fn handle_panic(info: &core::panic::PanicInfo<'_>) -> ! {
    PRINTF.locking.store(false, Ordering::Relaxed);
    let id = unsafe { crate::proc::current_id() };
    crate::println!("cpu{id} panic: {info}");
    PRINTF.panicked.store(true, Ordering::Relaxed);

    loop {
        unsafe { core::arch::asm!("wfi") };
    }
}
