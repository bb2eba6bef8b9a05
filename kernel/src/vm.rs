//! Sv39 page tables: the kernel's own mapping (`Kvm`) and per-process user address
//! spaces (`Uvm`), plus the `PA`/`VA` address newtypes shared across the crate.

use core::ops::Add;

use alloc::boxed::Box;

use crate::error::KernelError;
use crate::kalloc;
use crate::memlayout::{KERNBASE, PHYSTOP, PLIC, TRAMPOLINE, UART0, VIRTIO0};
use crate::proc::PROC_TABLE;
use crate::riscv::{
    MAXVA, PGSIZE, PTE_R, PTE_V, PTE_W, PTE_X, pa_to_pte, pg_round_down, pg_round_up, pte_flags,
    pte_to_pa, px, satp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PA(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct VA(pub usize);

impl From<usize> for PA {
    fn from(v: usize) -> Self {
        PA(v)
    }
}
impl From<usize> for VA {
    fn from(v: usize) -> Self {
        VA(v)
    }
}
impl Add<usize> for VA {
    type Output = VA;
    fn add(self, rhs: usize) -> VA {
        VA(self.0 + rhs)
    }
}
impl Add<usize> for PA {
    type Output = PA;
    fn add(self, rhs: usize) -> PA {
        PA(self.0 + rhs)
    }
}
impl VA {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}
impl PA {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

#[repr(transparent)]
#[derive(Clone, Copy)]
struct PageTableEntry(usize);

impl PageTableEntry {
    fn is_valid(&self) -> bool {
        self.0 & PTE_V != 0
    }
    fn is_leaf(&self) -> bool {
        self.0 & (PTE_R | PTE_W | PTE_X) != 0
    }
    fn as_pa(&self) -> PA {
        PA(pte_to_pa(self.0))
    }
    fn from_pa(pa: PA, flags: usize) -> Self {
        Self(pa_to_pte(pa.0) | flags | PTE_V)
    }
}

#[repr(align(4096))]
struct RawPageTable([PageTableEntry; 512]);

/// A single level of an Sv39 radix tree; `ptr` owns the backing page.
pub struct PageTable {
    ptr: *mut RawPageTable,
}

impl PageTable {
    fn try_new() -> Result<Self, KernelError> {
        let page: Box<[PageTableEntry; 512]> =
            Box::try_new_zeroed()?.assume_init();
        Ok(Self {
            ptr: Box::into_raw(page) as *mut RawPageTable,
        })
    }

    fn as_pa(&self) -> PA {
        PA(self.ptr as usize)
    }

    fn entries_mut(&mut self) -> &mut [PageTableEntry; 512] {
        unsafe { &mut (*self.ptr).0 }
    }

    /// Walks to the level-0 PTE for `va`, allocating intermediate levels as needed.
    fn walk(&mut self, va: VA, alloc: bool) -> Result<&mut PageTableEntry, KernelError> {
        if va.0 >= MAXVA {
            return Err(KernelError::BadAddress);
        }

        let mut table = self.ptr;
        for level in (1..=2).rev() {
            let idx = px(level, va.0);
            let pte = unsafe { &mut (*table).0[idx] };

            if pte.is_valid() {
                table = pte.as_pa().0 as *mut RawPageTable;
            } else {
                if !alloc {
                    return Err(KernelError::BadAddress);
                }
                let child: Box<[PageTableEntry; 512]> =
                    Box::try_new_zeroed()?.assume_init();
                let child_pa = PA(Box::into_raw(child) as usize);
                *pte = PageTableEntry::from_pa(child_pa, 0);
                table = child_pa.0 as *mut RawPageTable;
            }
        }

        let idx = px(0, va.0);
        Ok(unsafe { &mut (*table).0[idx] })
    }

    pub fn walk_addr(&mut self, va: VA) -> Result<PA, KernelError> {
        let pte = self.walk(va, false)?;
        if !pte.is_valid() || !pte.is_leaf() {
            return Err(KernelError::BadAddress);
        }
        Ok(PA(pte.as_pa().0 + (va.0 & (PGSIZE - 1))))
    }

    pub fn map_pages(&mut self, va: VA, pa: PA, size: usize, flags: usize) -> Result<(), KernelError> {
        let first = pg_round_down(va.0);
        let last = pg_round_down(va.0 + size - 1);
        let mut a = first;
        let mut p = pa.0;

        loop {
            let pte = self.walk(VA(a), true)?;
            if pte.is_valid() {
                return Err(KernelError::BadAddress);
            }
            *pte = PageTableEntry::from_pa(PA(p), flags);

            if a == last {
                break;
            }
            a += PGSIZE;
            p += PGSIZE;
        }

        Ok(())
    }

    /// Unmaps `npages` pages starting at `va`; frees the backing physical pages if
    /// `free` is set.
    pub fn unmap(&mut self, va: VA, npages: usize, free: bool) {
        assert_eq!(va.0 % PGSIZE, 0, "unmap: unaligned");

        for i in 0..npages {
            let a = va.0 + i * PGSIZE;
            let pte = match self.walk(VA(a), false) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if !pte.is_valid() {
                continue;
            }
            if free {
                unsafe { kalloc::free(pte.as_pa().0) };
            }
            pte.0 = 0;
        }
    }

    fn free_walk(&mut self) {
        for pte in self.entries_mut().iter_mut() {
            if pte.is_valid() && !pte.is_leaf() {
                let mut child = PageTable {
                    ptr: pte.as_pa().0 as *mut RawPageTable,
                };
                child.free_walk();
            }
            pte.0 = 0;
        }
        unsafe { drop(Box::from_raw(self.ptr)) };
    }

    pub fn copy_to_user(&mut self, dst: VA, data: &[u8]) -> Result<(), KernelError> {
        let mut remaining = data;
        let mut va = pg_round_down(dst.0);
        let mut offset_in_page = dst.0 - va;

        while !remaining.is_empty() {
            let pa = self.walk_addr(VA(va))?.0;
            let n = (PGSIZE - offset_in_page).min(remaining.len());
            unsafe {
                core::ptr::copy_nonoverlapping(
                    remaining.as_ptr(),
                    (pa + offset_in_page) as *mut u8,
                    n,
                );
            }
            remaining = &remaining[n..];
            va += PGSIZE;
            offset_in_page = 0;
        }

        Ok(())
    }

    pub fn copy_from_user(&mut self, src: VA, out: &mut [u8]) -> Result<(), KernelError> {
        let mut written = 0;
        let mut va = pg_round_down(src.0);
        let mut offset_in_page = src.0 - va;

        while written < out.len() {
            let pa = self.walk_addr(VA(va))?.0;
            let n = (PGSIZE - offset_in_page).min(out.len() - written);
            unsafe {
                core::ptr::copy_nonoverlapping(
                    (pa + offset_in_page) as *const u8,
                    out[written..].as_mut_ptr(),
                    n,
                );
            }
            written += n;
            va += PGSIZE;
            offset_in_page = 0;
        }

        Ok(())
    }
}

/// The kernel's own address space: shared by every hart, mapped once at boot.
pub struct Kvm(PageTable);

impl Kvm {
    pub fn try_new() -> Result<Self, KernelError> {
        Ok(Self(PageTable::try_new()?))
    }

    pub fn map(&mut self, va: VA, pa: PA, size: usize, flags: usize) {
        self.0
            .map_pages(va, pa, size, flags)
            .expect("Kvm::map: out of memory");
    }

    /// Builds the direct-mapped kernel page table: UART, virtio, PLIC, kernel
    /// text/data (RX / RW split), the trampoline page, and every process's kernel
    /// stack.
    ///
    /// # Safety
    /// Must run once, at boot, before any other hart is started.
    pub unsafe fn make() -> Self {
        let mut kvm = Self::try_new().expect("Kvm::make: alloc");

        kvm.map(VA(UART0), PA(UART0), PGSIZE, PTE_R | PTE_W);
        kvm.map(VA(VIRTIO0), PA(VIRTIO0), PGSIZE, PTE_R | PTE_W);
        kvm.map(VA(PLIC), PA(PLIC), 0x40_0000, PTE_R | PTE_W);

        unsafe extern "C" {
            static etext: u8;
        }
        let etext_addr = unsafe { &etext as *const u8 as usize };

        kvm.map(VA(KERNBASE), PA(KERNBASE), etext_addr - KERNBASE, PTE_R | PTE_X);
        kvm.map(VA(etext_addr), PA(etext_addr), PHYSTOP - etext_addr, PTE_R | PTE_W);
        kvm.map(
            VA(TRAMPOLINE),
            crate::trampoline::trampoline_pa(),
            PGSIZE,
            PTE_R | PTE_X,
        );

        unsafe { PROC_TABLE.map_stacks(&mut kvm) };

        kvm
    }

    fn satp(&self) -> usize {
        satp::make(self.0.as_pa().0)
    }
}

/// Installs the kernel page table on this hart and flushes the TLB. Safety: must run
/// once per hart, after `Kvm::make` has populated the mapping.
pub unsafe fn switch_kvm_table(kvm: &Kvm) {
    unsafe {
        satp::write(kvm.satp());
        crate::riscv::vma::sfence();
    }
}

/// Re-installs the kernel's own page table (used when leaving a process's user
/// address space, e.g. returning from `swtch` into `scheduler`).
pub fn switch_kvm() {
    unsafe { switch_kvm_table(KVM.get().expect("switch_kvm: KVM not initialized")) };
}

pub fn switch_uvm(uvm: &Uvm) {
    unsafe {
        satp::write(satp::make(uvm.0.as_pa().0));
        crate::riscv::vma::sfence();
    }
}

static KVM: crate::sync::OnceLock<Kvm> = crate::sync::OnceLock::new();

/// Safety: called once from hart 0 during boot.
pub unsafe fn init() {
    kalloc::init();
    let kvm = unsafe { Kvm::make() };
    KVM.initialize(|| Ok::<Kvm, ()>(kvm)).ok();
}

/// Safety: called once per hart, after `init`.
pub unsafe fn init_hart() {
    unsafe { switch_kvm_table(KVM.get().expect("init_hart: KVM not initialized")) };
}

/// A process's user address space.
pub struct Uvm(pub(crate) PageTable);

impl Uvm {
    pub fn try_new() -> Result<Self, KernelError> {
        Ok(Self(PageTable::try_new()?))
    }

    pub fn map_pages(&mut self, va: VA, pa: PA, size: usize, flags: usize) -> Result<(), KernelError> {
        self.0.map_pages(va, pa, size, flags)
    }

    pub fn unmap(&mut self, va: VA, npages: usize, free: bool) {
        self.0.unmap(va, npages, free);
    }

    pub fn copy_to_user(&mut self, dst: VA, data: &[u8]) -> Result<(), KernelError> {
        self.0.copy_to_user(dst, data)
    }

    pub fn copy_from_user(&mut self, src: VA, out: &mut [u8]) -> Result<(), KernelError> {
        self.0.copy_from_user(src, out)
    }

    /// The root physical page-table address, for building a `satp` value.
    pub fn satp_root(&self) -> usize {
        self.0.as_pa().0
    }

    pub fn walk_addr(&mut self, va: VA) -> Result<PA, KernelError> {
        self.0.walk_addr(va)
    }

    /// Grows the user image from `old` to `new` bytes, page-mapping freshly zeroed
    /// physical pages with `flags`. Returns the new size actually reached (equal to
    /// `new` on success).
    pub fn alloc(&mut self, old: usize, new: usize, flags: usize) -> Result<usize, KernelError> {
        if new < old {
            return Ok(old);
        }

        let old_aligned = pg_round_up(old);
        let mut a = old_aligned;

        while a < new {
            let page: Box<[u8; PGSIZE]> = Box::try_new_zeroed()?.assume_init();
            let pa = PA(Box::into_raw(page) as usize);

            if self.0.map_pages(VA(a), pa, PGSIZE, flags | PTE_R | PTE_U | PTE_V).is_err() {
                unsafe { drop(Box::from_raw(pa.0 as *mut [u8; PGSIZE])) };
                self.unmap(VA(old_aligned), (a - old_aligned) / PGSIZE, true);
                return Err(KernelError::Alloc);
            }

            a += PGSIZE;
        }

        Ok(new)
    }

    /// Shrinks the user image from `old` to `new` bytes, freeing the pages that fall
    /// out of range. Returns `new`.
    pub fn dealloc(&mut self, old: usize, new: usize) -> usize {
        if new >= old {
            return old;
        }

        let old_aligned = pg_round_up(old);
        let new_aligned = pg_round_up(new);

        if new_aligned < old_aligned {
            let npages = (old_aligned - new_aligned) / PGSIZE;
            self.unmap(VA(new_aligned), npages, true);
        }

        new
    }

    /// Copies `size` bytes of this address space (and their mappings) into `dst`, for
    /// `fork`. On failure, partially-mapped pages in `dst` are rolled back.
    pub fn copy(&mut self, dst: &mut Uvm, size: usize) -> Result<(), KernelError> {
        let mut va = 0usize;

        while va < size {
            let pa = self.0.walk_addr(VA(va))?;
            let pte = self.0.walk(VA(va), false)?;
            let flags = pte_flags(pte.0);

            let page: Box<[u8; PGSIZE]> = Box::try_new_zeroed()?.assume_init();
            let new_pa = PA(Box::into_raw(page) as usize);

            unsafe {
                core::ptr::copy_nonoverlapping(pa.0 as *const u8, new_pa.0 as *mut u8, PGSIZE);
            }

            if dst.0.map_pages(VA(va), new_pa, PGSIZE, flags).is_err() {
                unsafe { drop(Box::from_raw(new_pa.0 as *mut [u8; PGSIZE])) };
                dst.unmap(VA(0), va / PGSIZE, true);
                return Err(KernelError::Alloc);
            }

            va += PGSIZE;
        }

        Ok(())
    }

    /// Tears down the whole address space: unmaps and frees every user page and the
    /// trapframe/trampoline mappings, then drops the radix tree itself.
    pub fn proc_free(mut self, size: usize) {
        self.unmap(VA(TRAMPOLINE), 1, false);
        self.unmap(VA(crate::memlayout::TRAPFRAME), 1, false);
        if size > 0 {
            self.unmap(VA(0), pg_round_up(size) / PGSIZE, true);
        }
        self.0.free_walk();
    }
}

