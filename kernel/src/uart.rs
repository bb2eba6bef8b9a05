//! 16550 UART driver: interrupt-driven transmit with a small ring buffer, polled
//! receive. http://byterunner.com/16550.html

use core::ptr;

use crate::memlayout::UART0;
use crate::proc::{self, Channel};
use crate::spinlock::SpinLock;

const RHR: usize = 0;
const THR: usize = 0;

const IER: usize = 1;
const IER_RX_ENABLE: u8 = 1 << 0;
const IER_TX_ENABLE: u8 = 1 << 1;

const FCR: usize = 2;
const FCR_FIFO_ENABLE: u8 = 1 << 0;
const FCR_FIFO_CLEAR: u8 = 3 << 1;

const ISR: usize = 2;

const LCR: usize = 3;
const LCR_EIGHT_BITS: u8 = 3;
const LCR_BAUD_LATCH: u8 = 1 << 7;

const LSR: usize = 5;
const LSR_RX_READY: u8 = 1 << 0;
const LSR_TX_IDLE: u8 = 1 << 5;

const TX_BUF_SIZE: usize = 32;

struct Uart {
    tx_buf: [u8; TX_BUF_SIZE],
    tx_w: usize,
    tx_r: usize,
}

impl Uart {
    const fn new() -> Self {
        Self { tx_buf: [0; TX_BUF_SIZE], tx_w: 0, tx_r: 0 }
    }

    fn read(&self, reg: usize) -> u8 {
        unsafe { ptr::read_volatile((UART0 as *mut u8).add(reg)) }
    }

    fn write(&self, reg: usize, value: u8) {
        unsafe { ptr::write_volatile((UART0 as *mut u8).add(reg), value) }
    }

    fn init(&self) {
        self.write(IER, 0x00);
        self.write(LCR, LCR_BAUD_LATCH);
        self.write(0, 0x03);
        self.write(1, 0x00);
        self.write(LCR, LCR_EIGHT_BITS);
        self.write(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);
        self.write(IER, IER_TX_ENABLE | IER_RX_ENABLE);
    }

    /// Sends whatever is buffered while the UART has room. Must be called with `UART`
    /// held.
    fn start(&mut self) {
        loop {
            if self.tx_w == self.tx_r {
                self.read(ISR);
                return;
            }
            if self.read(LSR) & LSR_TX_IDLE == 0 {
                // not ready for another byte; it will interrupt again once it is.
                return;
            }

            let c = self.tx_buf[self.tx_r % TX_BUF_SIZE];
            self.tx_r += 1;
            proc::wakeup(Channel::Buffer(UART_TX_CHAN));
            self.write(THR, c);
        }
    }
}

static UART: SpinLock<Uart> = SpinLock::new(Uart::new(), "uart");

/// Arbitrary but stable address used as this UART's sleep channel identity.
const UART_TX_CHAN: usize = UART0 + 1;

/// Queues `c` for transmission, blocking the caller if the ring buffer is full.
/// Must not be called from interrupt context.
pub fn putc(c: u8) {
    let mut uart = UART.lock();

    while uart.tx_w.wrapping_sub(uart.tx_r) == TX_BUF_SIZE {
        uart = proc::sleep(Channel::Buffer(UART_TX_CHAN), uart);
    }

    let idx = uart.tx_w % TX_BUF_SIZE;
    uart.tx_buf[idx] = c;
    uart.tx_w += 1;
    uart.start();
}

/// Writes directly to the transmit register, spinning until idle. Used by the panic
/// handler, which cannot rely on interrupts or the scheduler still being alive.
pub fn putc_sync(c: u8) {
    crate::spinlock::push_off();
    let uart = unsafe { UART.get_mut_unchecked() };
    while uart.read(LSR) & LSR_TX_IDLE == 0 {}
    uart.write(THR, c);
    crate::spinlock::pop_off();
}

fn getc() -> Option<u8> {
    let uart = unsafe { UART.get_mut_unchecked() };
    if uart.read(LSR) & LSR_RX_READY != 0 {
        Some(uart.read(RHR))
    } else {
        None
    }
}

pub fn handle_interrupt() {
    while let Some(c) = getc() {
        crate::console::handle_interrupt(c);
    }
    UART.lock().start();
}

/// # Safety
/// Must be called exactly once during kernel bring-up.
pub unsafe fn init() {
    UART.lock().init();
}
