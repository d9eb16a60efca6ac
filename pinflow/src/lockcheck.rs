// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! The per-filter lock and its held-lock instrumentation.
//!
//! Each filter owns exactly one [`FilterLock`]. Every guard taken on it bumps
//! a thread-local counter, so code about to make a call that can block on a
//! different stage (buffer acquisition, downstream push, end-of-stream) can
//! assert that the current thread holds no filter lock at all.

use std::{
    cell::Cell,
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex, MutexGuard},
};

use crate::{Error, Result};

thread_local! {
    static HELD: Cell<usize> = const { Cell::new(0) };
}

/// Number of filter locks held by the calling thread.
///
/// Intended for tests and probes: a consumer endpoint can record this value
/// at call entry to verify that its producer released its lock first.
pub fn held_locks() -> usize {
    HELD.with(|held| held.get())
}

/// Debug-asserts that the calling thread holds no filter lock.
pub(crate) fn assert_not_held(call: &str) {
    debug_assert_eq!(
        held_locks(),
        0,
        "filter lock held across blocking call `{call}`"
    );
}

/// Marks one held lock on this thread for as long as it lives.
struct HeldToken;

impl HeldToken {
    fn acquire() -> Self {
        HELD.with(|held| held.set(held.get() + 1));
        HeldToken
    }
}

impl Drop for HeldToken {
    fn drop(&mut self) {
        HELD.with(|held| held.set(held.get().saturating_sub(1)));
    }
}

/// Mutex plus wake event guarding all mutable state of one filter.
pub(crate) struct FilterLock<T> {
    name: String,
    mutex: Mutex<T>,
    wake: Condvar,
}

impl<T> FilterLock<T> {
    pub(crate) fn new(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            mutex: Mutex::new(value),
            wake: Condvar::new(),
        }
    }

    /// Seizes the lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Other`] if a thread panicked while holding the lock.
    pub(crate) fn lock(&self) -> Result<LockGuard<'_, T>> {
        let guard = self
            .mutex
            .lock()
            .map_err(|_| Error::poisoned(&self.name))?;
        Ok(LockGuard {
            guard,
            token: HeldToken::acquire(),
            lock: self,
        })
    }

    /// Wakes every thread blocked in [`LockGuard::wait`].
    pub(crate) fn wake_all(&self) {
        self.wake.notify_all();
    }
}

/// Guard over the filter state. Dereferences to the protected value.
pub(crate) struct LockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    token: HeldToken,
    lock: &'a FilterLock<T>,
}

impl<'a, T> LockGuard<'a, T> {
    /// Releases the lock, blocks until woken, and re-acquires it.
    pub(crate) fn wait(self) -> Result<Self> {
        let LockGuard { guard, token, lock } = self;
        drop(token);
        let guard = lock
            .wake
            .wait(guard)
            .map_err(|_| Error::poisoned(&lock.name))?;
        Ok(LockGuard {
            guard,
            token: HeldToken::acquire(),
            lock,
        })
    }
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test]
    fn guard_tracks_held_count() {
        let lock = FilterLock::new("test", 0u32);
        assert_eq!(held_locks(), 0);
        {
            let mut guard = lock.lock().unwrap();
            *guard += 1;
            assert_eq!(held_locks(), 1);
        }
        assert_eq!(held_locks(), 0);
    }

    #[test]
    fn wait_releases_and_reacquires() {
        let lock = Arc::new(FilterLock::new("test", false));
        let waker = lock.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            *waker.lock().unwrap() = true;
            waker.wake_all();
        });
        let mut guard = lock.lock().unwrap();
        while !*guard {
            guard = guard.wait().unwrap();
            assert_eq!(held_locks(), 1);
        }
        drop(guard);
        assert_eq!(held_locks(), 0);
        handle.join().unwrap();
    }
}
