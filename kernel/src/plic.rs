//! RISC-V Platform-Level Interrupt Controller.
//! <https://github.com/riscv/riscv-plic-spec/blob/master/riscv-plic.adoc>

use crate::memlayout::{PLIC, UART0_IRQ, VIRTIO0_IRQ, plic_sclaim, plic_senable, plic_spriority};
use crate::proc;
use crate::spinlock::{push_off, pop_off};

/// Asks the PLIC which interrupt (if any) this hart should service.
pub fn claim() -> Option<usize> {
    push_off();
    let irq = unsafe {
        let hart = proc::current_id();
        *(plic_sclaim(hart) as *const u32) as usize
    };
    pop_off();

    if irq == 0 { None } else { Some(irq) }
}

/// Tells the PLIC this hart is done servicing `irq`.
pub fn complete(irq: usize) {
    push_off();
    unsafe {
        let hart = proc::current_id();
        *(plic_sclaim(hart) as *mut u32) = irq as u32;
    }
    pop_off();
}

/// # Safety
/// Must be called exactly once during kernel bring-up.
pub unsafe fn init() {
    unsafe {
        *((PLIC + UART0_IRQ * 4) as *mut u32) = 1;
        *((PLIC + VIRTIO0_IRQ * 4) as *mut u32) = 1;
    }
}

/// # Safety
/// Must be called once per hart, after `init`.
pub unsafe fn init_hart() {
    unsafe {
        let hart = proc::current_id();
        *(plic_senable(hart) as *mut u32) = (1 << UART0_IRQ) | (1 << VIRTIO0_IRQ);
        *(plic_spriority(hart) as *mut u32) = 0;
    }
}
