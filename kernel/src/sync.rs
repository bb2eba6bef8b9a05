//! A minimal `OnceLock<T>`, used for statics whose value isn't known until boot
//! (`proc::INIT_PROC`, the root inode, ...).

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use crate::spinlock::SpinLock;

enum OnceLockState {
    Incomplete,
    Complete,
}

pub struct OnceLock<T> {
    state: SpinLock<OnceLockState>,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> OnceLock<T> {
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(OnceLockState::Incomplete, "once_lock"),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Runs `f` and stores its result the first time this is called; subsequent calls
    /// are no-ops. `f` may fail, in which case the lock remains incomplete and a later
    /// call may retry.
    pub fn initialize<E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<(), E> {
        let mut guard = self.state.lock();
        if matches!(*guard, OnceLockState::Complete) {
            return Ok(());
        }

        let value = f()?;
        unsafe { (*self.value.get()).write(value) };
        *guard = OnceLockState::Complete;
        Ok(())
    }

    pub fn get(&self) -> Option<&T> {
        let guard = self.state.lock();
        if matches!(*guard, OnceLockState::Complete) {
            Some(unsafe { self.get_unchecked() })
        } else {
            None
        }
    }

    /// Safety: caller must know `initialize` has already completed successfully.
    pub unsafe fn get_unchecked(&self) -> &T {
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T> Drop for OnceLock<T> {
    fn drop(&mut self) {
        if matches!(*self.state.get_mut(), OnceLockState::Complete) {
            unsafe { (*self.value.get()).assume_init_drop() };
        }
    }
}

unsafe impl<T: Sync + Send> Sync for OnceLock<T> {}
unsafe impl<T: Send> Send for OnceLock<T> {}
