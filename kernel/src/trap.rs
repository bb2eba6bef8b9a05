//! Trap dispatch: syscalls, device interrupts, and the timer tick, for both user-mode
//! and kernel-mode traps.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::memlayout::TRAMPOLINE;
use crate::param::NKSTACK_PAGES;
use crate::proc::{self, Channel};
use crate::riscv::{
    PGSIZE, interrupts, satp, sepc, sstatus, stimecmp, stvec, time,
    scause::{self, Trap, Interrupt, Exception},
};
use crate::spinlock::SpinLock;

static TICKS: SpinLock<usize> = SpinLock::new(0, "ticks");

pub fn current_ticks() -> usize {
    *TICKS.lock()
}

/// Blocks the calling process for `n` timer ticks, waking early (without error) if it
/// is killed in the meantime — `usertrap`'s post-syscall check tears it down.
pub fn sleep_ticks(n: usize) {
    let mut guard = TICKS.lock();
    let start = *guard;
    while *guard - start < n {
        if proc::is_killed(proc::current_proc()) {
            return;
        }
        guard = proc::sleep(Channel::Ticks, guard);
    }
}

/// cycles between timer interrupts; about 1/10th second in qemu, matching `start::timer_init`'s
/// first arm.
const TIMER_INTERVAL: u64 = 1_000_000;

static TIMER_SEEN: AtomicUsize = AtomicUsize::new(0);

/// Installs the kernel trap vector for this hart.
///
/// # Safety
/// Must run once per hart, before enabling interrupts.
pub unsafe fn init_hart() {
    unsafe { stvec::write(crate::kernelvec::kernelvec as usize) };
}

/// Entered from `trampoline::uservec` whenever a trap is taken while in user mode:
/// syscalls, page faults, and device/timer interrupts that happen to land while user
/// code was running.
#[unsafe(no_mangle)]
pub extern "C" fn usertrap() -> ! {
    assert_eq!(unsafe { sstatus::read() } & sstatus::SPP, 0, "usertrap: not from user mode");

    unsafe { stvec::write(crate::kernelvec::kernelvec as usize) };

    let (idx, data) = proc::current_proc_and_data_mut();
    let trapframe = data.trapframe.as_mut().unwrap();
    trapframe.epc = sepc::read();

    match scause::read().cause() {
        Trap::Exception(Exception::EnvironmentCall) => {
            if proc::is_killed(idx) {
                proc::exit(-1);
            }
            trapframe.epc += 4;
            interrupts::enable();
            crate::syscall::syscall();
        }
        cause => {
            if let Some(irq) = dev_intr(cause) {
                if irq == Interrupt::SupervisorTimer {
                    proc::r#yield();
                }
            } else {
                crate::err!("usertrap: unexpected scause {cause:?}, pid={}", proc::pid_of(idx).0);
                proc::kill(proc::pid_of(idx));
            }
        }
    }

    if proc::is_killed(idx) {
        proc::exit(-1);
    }

    unsafe { usertrapret() };
}

/// Returns to user mode: points the trapframe at this hart's kernel context, sets up
/// `sstatus`/`sepc` for the user program counter, and jumps through the trampoline's
/// `userret`.
///
/// # Safety
/// Must be called with the current process's page table still installed or about to
/// be re-installed before any user-mode-visible state is touched.
pub unsafe fn usertrapret() -> ! {
    // disabled until the `sret` below, so a device interrupt can't land mid-transition with
    // the trapframe half set up for the process we're about to resume.
    interrupts::disable();
    unsafe { stvec::write(TRAMPOLINE + (crate::trampoline::uservec as usize - crate::trampoline::trampoline as usize)) };

    let (idx, data) = proc::current_proc_and_data_mut();
    let kstack_top = data.kstack.as_usize() + NKSTACK_PAGES * PGSIZE;
    let trapframe = data.trapframe.as_mut().unwrap();
    trapframe.kernel_satp = satp::read();
    trapframe.kernel_sp = kstack_top;
    trapframe.kernel_trap = usertrap as usize;
    trapframe.kernel_hartid = unsafe { proc::current_id() };

    // clear SPP to return to user mode, set SPIE so interrupts are enabled once there.
    let mut bits = unsafe { sstatus::read() };
    bits &= !sstatus::SPP;
    bits |= sstatus::SPIE;
    unsafe { sstatus::write(bits) };

    sepc::write(trapframe.epc);

    let satp_value = satp::make(data.pagetable.as_ref().unwrap().satp_root());
    let _ = idx;

    let userret_offset = crate::trampoline::userret as usize - crate::trampoline::trampoline as usize;
    let userret_entry = TRAMPOLINE + userret_offset;

    unsafe {
        let userret_fn: extern "C" fn(usize) -> ! = core::mem::transmute(userret_entry);
        userret_fn(satp_value);
    }
}

/// Entered via `kernelvec` for any trap taken while already in supervisor mode —
/// always a device/timer interrupt, never a syscall (the kernel never issues `ecall`
/// to itself).
#[unsafe(no_mangle)]
pub extern "C" fn kernel_trap() {
    let sepc_saved = sepc::read();
    let sstatus_saved = sstatus::read();

    let cause = scause::read().cause();
    match dev_intr(cause) {
        Some(Interrupt::SupervisorTimer) => {
            if let Some(idx) = unsafe { proc::current_proc_opt() } {
                let _ = idx;
                proc::r#yield();
            }
        }
        Some(_) => {}
        None => panic!("kerneltrap: unexpected scause {cause:?}"),
    }

    sepc::write(sepc_saved);
    unsafe { sstatus::write(sstatus_saved) };
}

/// Services a device or timer interrupt, returning which kind it was, or `None` if
/// `cause` was not actually a recognized interrupt (an unhandled exception).
fn dev_intr(cause: Trap) -> Option<Interrupt> {
    match cause {
        Trap::Interrupt(Interrupt::SupervisorExternal) => {
            if let Some(irq) = crate::plic::claim() {
                match irq {
                    crate::memlayout::UART0_IRQ => crate::uart::handle_interrupt(),
                    crate::memlayout::VIRTIO0_IRQ => crate::virtio_disk::handle_interrupt(),
                    _ => {}
                }
                crate::plic::complete(irq);
            }
            Some(Interrupt::SupervisorExternal)
        }
        Trap::Interrupt(Interrupt::SupervisorTimer) => {
            if unsafe { proc::current_id() } == 0 {
                let mut ticks = TICKS.lock();
                *ticks += 1;
                TIMER_SEEN.fetch_add(1, Ordering::Relaxed);
                drop(ticks);
                proc::wakeup(Channel::Ticks);
            }
            // ask for the next one; the sstc extension delivers timer interrupts straight
            // to supervisor mode, so rearming is just moving stimecmp forward.
            unsafe { stimecmp::write(time::read() + TIMER_INTERVAL) };
            Some(Interrupt::SupervisorTimer)
        }
        _ => None,
    }
}
