//! Physical page allocator.
//!
//! Everything from the end of the kernel image up to `PHYSTOP` is handed to a buddy
//! allocator, which also backs the crate's `#[global_allocator]` — `alloc::boxed::Box`
//! and friends draw from the very same pool as page-table/kernel-stack allocation, as
//! in the teacher's own kalloc.rs.

use core::alloc::{GlobalAlloc, Layout};

use buddy_alloc::{BuddyAllocParam, NonThreadsafeAlloc};

use crate::memlayout::PHYSTOP;
use crate::riscv::PGSIZE;
use crate::spinlock::SpinLock;

const LEAF_SIZE: usize = PGSIZE;
const FAST_HEAP_SIZE: usize = 64 * 1024;

static mut FAST_HEAP: [u8; FAST_HEAP_SIZE] = [0; FAST_HEAP_SIZE];

struct LockedAlloc {
    inner: SpinLock<Option<NonThreadsafeAlloc>>,
}

unsafe impl GlobalAlloc for LockedAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let guard = self.inner.lock();
        match guard.as_ref() {
            Some(a) => unsafe { a.alloc(layout) },
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let guard = self.inner.lock();
        if let Some(a) = guard.as_ref() {
            unsafe { a.dealloc(ptr, layout) };
        }
    }
}

#[global_allocator]
static ALLOCATOR: LockedAlloc = LockedAlloc {
    inner: SpinLock::new(None, "kalloc"),
};

unsafe extern "C" {
    /// First physical address past the kernel image, provided by the linker script.
    static end: u8;
}

/// Safety: must run exactly once, on hart 0, before anything in the `alloc` crate is
/// touched (including indirectly, via `vm::Kvm::make`).
pub unsafe fn init() {
    let heap_start = unsafe { &end as *const u8 as usize };
    let heap_size = PHYSTOP - heap_start;

    let fast_param =
        unsafe { BuddyAllocParam::new(FAST_HEAP.as_ptr(), FAST_HEAP_SIZE, LEAF_SIZE) };
    let heap_param = BuddyAllocParam::new(heap_start as *const u8, heap_size, LEAF_SIZE);

    let alloc = unsafe { NonThreadsafeAlloc::new(fast_param, heap_param) };
    *unsafe { ALLOCATOR.inner.get_mut_unchecked() } = Some(alloc);
}

/// Returns one page-table-sized physical page to the allocator. Every caller in this
/// crate only ever frees whole `PGSIZE` pages it previously obtained the same way.
///
/// # Safety
/// `pa` must be a page-aligned address this allocator handed out and that is no longer
/// referenced by any mapping.
pub unsafe fn free(pa: usize) {
    unsafe {
        ALLOCATOR.dealloc(
            pa as *mut u8,
            Layout::from_size_align_unchecked(PGSIZE, PGSIZE),
        )
    };
}
