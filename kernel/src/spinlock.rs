//! A spinlock that disables interrupts on the owning CPU across its critical section,
//! with a per-CPU nesting counter so that interrupts are only re-enabled once the
//! outermost lock is released (`push_off`/`pop_off`, mirroring `ncli`/`intena`).

use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::proc::{self, Cpu};
use crate::riscv::interrupts;

#[derive(Debug)]
pub struct SpinLock<T> {
    name: &'static str,
    cpu: AtomicPtr<Cpu>,
    data: UnsafeCell<T>,
}

// Safety: the lock serializes access to `data`; `T: Send` is required because whichever
// CPU acquires the lock may be different from the one that created it.
unsafe impl<T> Sync for SpinLock<T> where T: Send {}

pub struct SpinLockGuard<'a, T: 'a> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T> Sync for SpinLockGuard<'_, T> where T: Sync {}

impl<T> SpinLock<T> {
    pub const fn new(value: T, name: &'static str) -> Self {
        Self {
            name,
            cpu: AtomicPtr::new(ptr::null_mut()),
            data: UnsafeCell::new(value),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Safety: must be called with interrupts disabled (i.e. after `push_off`).
    unsafe fn holding(&self) -> bool {
        self.cpu.load(Ordering::Relaxed) == unsafe { proc::current_cpu_ptr() }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        push_off();

        unsafe {
            assert!(!self.holding(), "acquire {}", self.name);

            loop {
                if self
                    .cpu
                    .compare_exchange(
                        ptr::null_mut(),
                        proc::current_cpu_ptr(),
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break;
                }

                hint::spin_loop();
            }
        }

        SpinLockGuard { lock: self }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Use only when the caller has independently established exclusive access
    /// (e.g. while panicked, or while holding interrupts disabled via `push_off`).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut_unchecked(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }

    /// Releases `guard` and hands back a reference to the underlying lock, so the
    /// caller can later call `.lock()` again. Used by `proc::sleep` to swap a caller's
    /// condition lock for the table lock without holding both simultaneously.
    pub fn unlock(guard: SpinLockGuard<'_, T>) -> &'_ SpinLock<T> {
        let lock = guard.lock;
        drop(guard);
        lock
    }

    /// Releases the lock without consuming a guard value.
    ///
    /// One caller needs this: a process's very first dispatch. `scheduler` acquires the
    /// table lock, then `swtch`es into a brand-new kernel thread whose call stack has no
    /// guard value on it at all (it starts at `proc::fork_ret`, not at a return address
    /// inside `sched`) — the lock is logically still held on this thread's behalf, but
    /// nothing here can `drop` it. This is the Rust-guard equivalent of the C original
    /// calling `release(&ptable.lock)` directly in `forkret`.
    ///
    /// # Safety
    /// Caller must know this CPU currently holds the lock and that no `SpinLockGuard`
    /// value anywhere still expects to release it.
    pub unsafe fn force_unlock(&self) {
        unsafe {
            assert!(self.holding(), "force_unlock {}", self.name);
        }
        self.cpu.store(ptr::null_mut(), Ordering::Release);
        pop_off();
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        unsafe {
            assert!(self.lock.holding(), "release {}", self.lock.name);
        }

        self.lock.cpu.store(ptr::null_mut(), Ordering::Release);
        pop_off();
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

pub fn push_off() {
    let old = interrupts::get();
    interrupts::disable();

    unsafe {
        let c = proc::current_cpu();
        if c.num_off == 0 {
            c.interrupts_enabled = old;
        }
        c.num_off += 1;
    }
}

pub fn pop_off() {
    assert!(!interrupts::get(), "pop_off - interruptible");

    unsafe {
        let c = proc::current_cpu();
        assert!(c.num_off >= 1, "pop_off");

        c.num_off -= 1;
        if c.num_off == 0 && c.interrupts_enabled {
            interrupts::enable();
        }
    }
}
