//! The one code page mapped at the same virtual address (`TRAMPOLINE`) in every
//! address space, kernel and user alike, so switching `satp` across the user/kernel
//! boundary never invalidates the instruction stream mid-flight.

use core::arch::naked_asm;

use crate::vm::PA;

/// Physical address of the trampoline code, for mapping it into both `Kvm` and every
/// `Uvm`. Valid only because the kernel runs with a one-to-one mapping until the first
/// `satp` write, so `trampoline`'s link-time address already is its physical address.
pub fn trampoline_pa() -> PA {
    PA(trampoline as usize)
}

/// Container for the two naked trap-entry/trap-exit stubs; never called as a function
/// itself, only referenced for its address.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".trampoline")]
pub extern "C" fn trampoline() {}

/// Entered directly from user mode on any trap (via `stvec`, set by `usertrapret`).
/// Saves all 31 general-purpose registers into the trapframe, restores the kernel's
/// stack/page-table/trap-handler-address/hartid from the same trapframe, and jumps to
/// `usertrap`.
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[unsafe(link_section = ".trampoline")]
pub unsafe extern "C" fn uservec() {
    naked_asm!(
        "csrw sscratch, a0",
        "li a0, {trapframe}",
        "sd ra,  40(a0)",  "sd sp,  48(a0)",  "sd gp,  56(a0)",  "sd tp,  64(a0)",
        "sd t0,  72(a0)",  "sd t1,  80(a0)",  "sd t2,  88(a0)",  "sd s0,  96(a0)",
        "sd s1, 104(a0)",  "sd a1, 120(a0)",  "sd a2, 128(a0)",  "sd a3, 136(a0)",
        "sd a4, 144(a0)",  "sd a5, 152(a0)",  "sd a6, 160(a0)",  "sd a7, 168(a0)",
        "sd s2, 176(a0)",  "sd s3, 184(a0)",  "sd s4, 192(a0)",  "sd s5, 200(a0)",
        "sd s6, 208(a0)",  "sd s7, 216(a0)",  "sd s8, 224(a0)",  "sd s9, 232(a0)",
        "sd s10, 240(a0)", "sd s11, 248(a0)", "sd t3, 256(a0)",  "sd t4, 264(a0)",
        "sd t5, 272(a0)",  "sd t6, 280(a0)",
        "csrr t0, sscratch",
        "sd t0, 112(a0)",
        "ld sp,  8(a0)",
        "ld tp,  24(a0)",
        "ld t0,  16(a0)",
        "ld t1,   0(a0)",
        "csrw satp, t1",
        "sfence.vma zero, zero",
        "jr t0",
        trapframe = const crate::memlayout::TRAPFRAME,
    );
}

/// Entered by `usertrapret` after it has pointed `sepc` at the saved `epc` and loaded
/// `a0` with the user page table's `satp` value. Switches to the user page table,
/// restores the 31 general-purpose registers from the trapframe, and returns via
/// `sret`.
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[unsafe(link_section = ".trampoline")]
pub unsafe extern "C" fn userret() {
    naked_asm!(
        "csrw satp, a0",
        "sfence.vma zero, zero",
        "li a0, {trapframe}",
        "ld ra,  40(a0)",  "ld sp,  48(a0)",  "ld gp,  56(a0)",  "ld tp,  64(a0)",
        "ld t0,  72(a0)",  "ld t1,  80(a0)",  "ld t2,  88(a0)",  "ld s0,  96(a0)",
        "ld s1, 104(a0)",  "ld a1, 120(a0)",  "ld a2, 128(a0)",  "ld a3, 136(a0)",
        "ld a4, 144(a0)",  "ld a5, 152(a0)",  "ld a6, 160(a0)",  "ld a7, 168(a0)",
        "ld s2, 176(a0)",  "ld s3, 184(a0)",  "ld s4, 192(a0)",  "ld s5, 200(a0)",
        "ld s6, 208(a0)",  "ld s7, 216(a0)",  "ld s8, 224(a0)",  "ld s9, 232(a0)",
        "ld s10, 240(a0)", "ld s11, 248(a0)", "ld t3, 256(a0)",  "ld t4, 264(a0)",
        "ld t5, 272(a0)",  "ld t6, 280(a0)",
        "ld a0, 112(a0)",
        "sret",
        trapframe = const crate::memlayout::TRAPFRAME,
    );
}
