// SPDX-License-Identifier: MPL-2.0

//! Concurrency primitives consumed by the process core.
//!
//! `SpinLock` wraps the busy-waiting mutex from the `spin` crate; on a real
//! machine the kernel runtime pairs acquisition with disabling preemption.
//! `WaitQueue` is the one primitive threads may suspend on.

mod wait;

pub use wait::{WaitQueue, Waiter};

/// A busy-waiting lock protecting short critical sections.
pub struct SpinLock<T: ?Sized>(spin::Mutex<T>);

pub type SpinLockGuard<'a, T> = spin::MutexGuard<'a, T>;

impl<T> SpinLock<T> {
    pub const fn new(val: T) -> Self {
        Self(spin::Mutex::new(val))
    }
}

impl<T: ?Sized> SpinLock<T> {
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.0.lock()
    }

    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.0.try_lock()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}
