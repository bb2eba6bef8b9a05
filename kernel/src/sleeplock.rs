//! A lock that blocks the calling process (via `proc::sleep`) instead of spinning,
//! for critical sections long enough to make spinning wasteful (buffer I/O, inode
//! metadata).

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use crate::proc::{self, Channel, Pid};
use crate::spinlock::SpinLock;

struct SleepLockInner {
    locked: bool,
    pid: Option<Pid>,
}

pub struct SleepLock<T> {
    name: &'static str,
    inner: SpinLock<SleepLockInner>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SleepLock<T> {}

pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
}

impl<T> SleepLock<T> {
    pub const fn new(value: T, name: &'static str) -> Self {
        Self {
            name,
            inner: SpinLock::new(
                SleepLockInner {
                    locked: false,
                    pid: None,
                },
                "sleeplock",
            ),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut guard = self.inner.lock();
        while guard.locked {
            guard = proc::sleep(Channel::Lock(self as *const _ as usize), guard);
        }
        guard.locked = true;
        guard.pid = Some(proc::pid_of(proc::current_proc()));
        drop(guard);

        SleepLockGuard { lock: self }
    }

    /// Use only when the caller has independently established exclusive access (e.g.
    /// a DMA setup that has already pinned this slot through other bookkeeping).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut_unchecked(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }

    pub fn holding(&self) -> bool {
        let guard = self.inner.lock();
        guard.locked && guard.pid == Some(proc::pid_of(proc::current_proc()))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        let mut guard = self.lock.inner.lock();
        guard.locked = false;
        guard.pid = None;
        drop(guard);
        proc::wakeup(Channel::Lock(self.lock as *const _ as usize));
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}
