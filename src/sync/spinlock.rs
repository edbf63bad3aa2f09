//! Test-and-set spin lock plus a data-carrying mutex built on top of it.
//!
//! Waiters spin briefly, then sleep with exponential backoff. The lock is not
//! reentrant and carries no owner, so releasing from another thread is allowed.

use std::cell::UnsafeCell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::common::{DEFAULT_SPIN_INTERVAL, MAX_BACKOFF_MICROS, MIN_BACKOFF_MICROS};

/// Spin-then-sleep waiting strategy shared by every lock in this module.
pub(crate) struct Backoff {
    spins: u32,
    sleep_micros: u64,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self {
            spins: 0,
            sleep_micros: MIN_BACKOFF_MICROS,
        }
    }

    pub(crate) fn snooze(&mut self) {
        if self.spins < DEFAULT_SPIN_INTERVAL {
            self.spins += 1;
            hint::spin_loop();
            return;
        }
        thread::sleep(Duration::from_micros(self.sleep_micros));
        self.sleep_micros = (self.sleep_micros * 2).min(MAX_BACKOFF_MICROS);
    }
}

pub struct SpinLock {
    locked: AtomicBool,
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Resets the lock to the unlocked state.
    pub fn init(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Single attempt; true when the caller now holds the lock.
    pub fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn acquire(&self) {
        let mut backoff = Backoff::new();
        while !self.try_acquire() {
            while self.is_locked() {
                backoff.snooze();
            }
        }
    }

    pub fn release(&self) {
        fence(Ordering::SeqCst);
        self.locked.store(false, Ordering::Release);
    }

    /// Blocks until the lock is observed free, without taking it.
    pub fn wait_for_lock(&self) {
        let mut backoff = Backoff::new();
        while self.is_locked() {
            backoff.snooze();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn lock(&self) -> SpinLockGuard<'_> {
        self.acquire();
        SpinLockGuard { lock: self }
    }
}

pub struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Mutual exclusion over a value, guarded by a [`SpinLock`].
pub struct SpinMutex<T> {
    lock: SpinLock,
    data: UnsafeCell<T>,
}

// Access to `data` is serialized by `lock`.
unsafe impl<T: Send> Sync for SpinMutex<T> {}
unsafe impl<T: Send> Send for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            lock: SpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.lock.acquire();
        SpinMutexGuard { mutex: self }
    }

    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        if self.lock.try_acquire() {
            Some(SpinMutexGuard { mutex: self })
        } else {
            None
        }
    }
}

pub struct SpinMutexGuard<'a, T> {
    mutex: &'a SpinMutex<T>,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.lock.release();
    }
}
