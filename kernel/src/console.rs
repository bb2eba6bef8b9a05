//! Line-discipline console: buffers raw UART input into lines, handles backspace and
//! EOF (^D), and wakes blocked readers once a full line is available.

use crate::error::KernelError;
use crate::proc::{self, Channel};
use crate::spinlock::SpinLock;
use crate::vm::VA;

const fn ctrl(c: u8) -> u8 {
    c.wrapping_sub(b'@')
}

const INPUT_BUF_SIZE: usize = 128;

// Debug hotkeys, matching spec.md §4.10's introspection contract: dump PCBs by list.
const CTRL_P: u8 = ctrl(b'P');
const CTRL_R: u8 = ctrl(b'R');
const CTRL_F: u8 = ctrl(b'F');
const CTRL_S: u8 = ctrl(b'S');
const CTRL_Z: u8 = ctrl(b'Z');

struct Console {
    buf: [u8; INPUT_BUF_SIZE],
    /// next index `read` will consume
    r: usize,
    /// end of the last completed line
    w: usize,
    /// current edit position
    e: usize,
}

impl Console {
    const fn new() -> Self {
        Self { buf: [0; INPUT_BUF_SIZE], r: 0, w: 0, e: 0 }
    }
}

static CONSOLE: SpinLock<Console> = SpinLock::new(Console::new(), "console");

/// Sleep channel identity for "a line is available" / "there is room to edit".
const LINE_CHAN: usize = 0xC075_0000;

pub fn putc(c: u8) {
    crate::uart::putc(c);
}

fn put_backspace() {
    putc(0x08);
    putc(b' ');
    putc(0x08);
}

/// Copies up to `len` bytes of a completed line into the user buffer at `dst`.
/// Blocks until at least one line (or EOF) is available.
pub fn read(dst: VA, len: usize) -> Result<usize, KernelError> {
    let mut console = CONSOLE.lock();
    let mut dst = dst;
    let mut remaining = len;
    let target = len;

    while remaining > 0 {
        while console.r == console.w {
            if proc::is_killed(proc::current_proc()) {
                return Err(KernelError::Io);
            }
            console = proc::sleep(Channel::Buffer(LINE_CHAN), console);
        }

        let idx = console.r % INPUT_BUF_SIZE;
        let c = console.buf[idx];
        console.r += 1;

        if c == ctrl(b'D') {
            if remaining < target {
                // leave ^D queued so a subsequent read sees a clean zero-byte result.
                console.r -= 1;
            }
            break;
        }

        let (_idx, data) = proc::current_proc_and_data_mut();
        if data
            .pagetable
            .as_mut()
            .unwrap()
            .copy_to_user(dst, &[c])
            .is_err()
        {
            break;
        }

        dst = VA(dst.as_usize() + 1);
        remaining -= 1;

        if c == b'\n' {
            break;
        }
    }

    Ok(target - remaining)
}

/// Copies `len` bytes from the user buffer at `src` out to the UART, one byte at a
/// time. Returns the number of bytes actually sent before a copy failure, if any.
pub fn write(src: VA, len: usize) -> Result<usize, KernelError> {
    for i in 0..len {
        let (_idx, data) = proc::current_proc_and_data_mut();
        let mut byte = [0u8; 1];
        if data
            .pagetable
            .as_mut()
            .unwrap()
            .copy_from_user(VA(src.as_usize() + i), &mut byte)
            .is_err()
        {
            return Ok(i);
        }
        putc(byte[0]);
    }
    Ok(len)
}

/// Called from `uart::handle_interrupt` for every received byte: does echo and
/// backspace/kill processing, appends to the line buffer, and wakes `read` once a
/// whole line (or ^D) has arrived.
pub fn handle_interrupt(c: u8) {
    let mut console = CONSOLE.lock();

    match c {
        _ if c == CTRL_P => {
            drop(console);
            proc::procdump();
            return;
        }
        _ if c == CTRL_R => {
            drop(console);
            proc::readydump();
            return;
        }
        _ if c == CTRL_F => {
            drop(console);
            proc::freedump();
            return;
        }
        _ if c == CTRL_S => {
            drop(console);
            proc::sleepdump();
            return;
        }
        _ if c == CTRL_Z => {
            drop(console);
            proc::zombiedump();
            return;
        }
        c if c == ctrl(b'H') || c == 0x7f => {
            if console.e != console.w {
                console.e -= 1;
                drop(console);
                put_backspace();
                return;
            }
        }
        mut c => {
            if c != 0 && console.e - console.r < INPUT_BUF_SIZE {
                if c == b'\r' {
                    c = b'\n';
                }
                putc(c);

                let idx = console.e % INPUT_BUF_SIZE;
                console.buf[idx] = c;
                console.e += 1;

                if c == b'\n' || c == ctrl(b'D') || console.e - console.r == INPUT_BUF_SIZE {
                    console.w = console.e;
                    proc::wakeup(Channel::Buffer(LINE_CHAN));
                }
            }
        }
    }
}

/// # Safety
/// Must be called exactly once during kernel bring-up, before interrupts are enabled.
pub unsafe fn init() {
    unsafe { crate::uart::init() };
}
