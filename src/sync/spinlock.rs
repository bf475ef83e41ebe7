//! Simple spinlock with interrupt masking.
//!
//! On the single CPU this core targets, masking interrupts is what actually
//! provides mutual exclusion against the timer handler; the spin part only
//! catches re-entrant misuse. The previous interrupt state is restored after
//! the lock is released, so nested critical sections compose.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use crate::arch::interrupts;

pub struct SpinLock<T> {
    inner: spin::Mutex<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let interrupts_were_enabled = interrupts::are_enabled();
        interrupts::disable();

        SpinLockGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            interrupts_were_enabled,
        }
    }

    /// Attempts to take the lock without spinning.
    ///
    /// The interrupt state is left untouched when the lock is contended.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let interrupts_were_enabled = interrupts::are_enabled();
        interrupts::disable();

        match self.inner.try_lock() {
            Some(guard) => Some(SpinLockGuard {
                guard: ManuallyDrop::new(guard),
                interrupts_were_enabled,
            }),
            None => {
                if interrupts_were_enabled {
                    interrupts::enable();
                }
                None
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

pub struct SpinLockGuard<'a, T> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
    interrupts_were_enabled: bool,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY:
        // - `guard` is dropped exactly once, here, and never touched afterwards.
        // - Releasing before re-enabling keeps an interrupt from observing the
        //   lock still held by the code it interrupted.
        unsafe {
            ManuallyDrop::drop(&mut self.guard);
        }
        if self.interrupts_were_enabled {
            interrupts::enable();
        }
    }
}
