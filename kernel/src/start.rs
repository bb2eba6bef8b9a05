//! Machine-mode to supervisor-mode boot handoff, run once per hart.

use crate::riscv::{
    mcounteren, medeleg, mepc, mhartid, mideleg, mie, mstatus, menvcfg, pmpaddr0, pmpcfg0, satp,
    sie, stimecmp, time, tp,
};

const INTERVAL: u64 = 1_000_000;

/// Ask each hart to generate timer interrupts via the sstc extension: timer interrupts
/// arrive straight at supervisor mode as ordinary `SupervisorTimer` traps, with no
/// machine-mode timer vector involved.
unsafe fn timer_init() {
    unsafe {
        // enable supervisor-mode timer interrupts.
        mie::write(mie::read() | mie::STIE);

        // enable the sstc extension (i.e. stimecmp).
        menvcfg::write(menvcfg::read() | (1 << 63));

        // allow supervisor to use stimecmp and time.
        mcounteren::write(mcounteren::read() | 2);

        // ask for the very first timer interrupt.
        stimecmp::write(time::read() + INTERVAL);
    }
}

/// # Safety
/// Must run in machine mode, as the very first Rust code on this hart, with no other
/// hart yet relying on this one's state.
pub unsafe extern "C" fn start() -> ! {
    unsafe {
        // set previous privilege mode to supervisor: `mret` below returns there.
        mstatus::set_mpp(mstatus::MPP_SUPERVISOR);

        // set the exception return address to `main`: `mret` below jumps there.
        mepc::write(crate::main as usize);

        // disable virtual address translation in supervisor mode, for now.
        satp::write(0);

        // delegate all interrupts and exceptions to supervisor mode.
        medeleg::write(0xffff);
        mideleg::write(0xffff);
        sie::write(sie::read() | sie::SEIE | sie::STIE | sie::SSIE);

        // configure physical memory protection to give supervisor mode access to all of
        // physical memory.
        pmpaddr0::write(0x3fffffffffffff);
        pmpcfg0::write(0xf);

        timer_init();

        tp::write(mhartid::read());

        core::arch::asm!("mret", options(noreturn));
    }
}
