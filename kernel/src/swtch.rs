//! The cooperative context switch primitive: saves the caller's callee-saved
//! registers into `*old`, loads `*new`'s, and returns — into whatever call frame `new`
//! was last suspended at. There is no teacher source for this file; it's written from
//! scratch against the register-save convention `trampoline.rs`'s `uservec`/`userret`
//! already establish and the `Context { ra, sp, s0..s11 }` layout `proc.rs` defines.

use core::arch::naked_asm;

use crate::proc::Context;

/// Safety: `old` and `new` must each point at a valid, exclusively-owned `Context`.
/// Caller must hold the table lock and have interrupts disabled, exactly as
/// `proc::sched`/`proc::scheduler` arrange.
#[unsafe(naked)]
pub unsafe extern "C" fn swtch(old: *mut Context, new: *const Context) {
    naked_asm!(
        "sd ra,  0(a0)",
        "sd sp,  8(a0)",
        "sd s0, 16(a0)",
        "sd s1, 24(a0)",
        "sd s2, 32(a0)",
        "sd s3, 40(a0)",
        "sd s4, 48(a0)",
        "sd s5, 56(a0)",
        "sd s6, 64(a0)",
        "sd s7, 72(a0)",
        "sd s8, 80(a0)",
        "sd s9, 88(a0)",
        "sd s10, 96(a0)",
        "sd s11, 104(a0)",
        "ld ra,  0(a1)",
        "ld sp,  8(a1)",
        "ld s0, 16(a1)",
        "ld s1, 24(a1)",
        "ld s2, 32(a1)",
        "ld s3, 40(a1)",
        "ld s4, 48(a1)",
        "ld s5, 56(a1)",
        "ld s6, 64(a1)",
        "ld s7, 72(a1)",
        "ld s8, 80(a1)",
        "ld s9, 88(a1)",
        "ld s10, 96(a1)",
        "ld s11, 104(a1)",
        "ret",
    );
}
