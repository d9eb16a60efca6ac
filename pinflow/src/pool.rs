// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Negotiated buffer pools.
//!
//! A [`BufferPool`] is the sole long-lived owner of buffer storage for one
//! connection. It hands out exclusive leases wrapped in [`Sample`]s; dropping
//! the sample returns the storage. The pool mirrors the owning filter's
//! state: committed while Paused or Running, decommitted while Stopped.
//!
//! ```
//! use pinflow::{BufferPool, PoolProperties};
//! use std::time::Duration;
//!
//! # fn main() -> pinflow::Result<()> {
//! let pool = BufferPool::new("doc");
//! let requested = PoolProperties { buffer_count: 2, buffer_size: 64, alignment: 16, prefix: 0 };
//! let required = PoolProperties { buffer_count: 1, buffer_size: 128, alignment: 1, prefix: 0 };
//! let actual = pool.negotiate(&requested, &required)?;
//! assert_eq!(actual.buffer_size, 128);
//!
//! pool.commit()?;
//! let sample = pool.acquire()?;
//! assert_eq!(sample.capacity(), 128);
//! drop(sample);
//! pool.decommit(Duration::from_secs(1))?;
//! # Ok(())
//! # }
//! ```

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::{Error, Result, Sample, lockcheck};

/// Allocation properties of a pool.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolProperties {
    /// Number of buffers the pool holds.
    pub buffer_count: usize,
    /// Usable bytes per buffer, excluding the prefix.
    pub buffer_size: usize,
    /// Alignment of the start of each buffer (prefix included).
    pub alignment: usize,
    /// Bytes reserved in front of each buffer.
    pub prefix: usize,
}

impl PoolProperties {
    /// Element-wise maximum.
    pub fn max(&self, other: &PoolProperties) -> PoolProperties {
        PoolProperties {
            buffer_count: self.buffer_count.max(other.buffer_count),
            buffer_size: self.buffer_size.max(other.buffer_size),
            alignment: self.alignment.max(other.alignment),
            prefix: self.prefix.max(other.prefix),
        }
    }

    /// Whether every field is at least as large as in `other`.
    pub fn covers(&self, other: &PoolProperties) -> bool {
        self.max(other) == *self
    }

    fn normalized(self) -> PoolProperties {
        PoolProperties {
            buffer_count: self.buffer_count.max(1),
            alignment: self
                .alignment
                .max(1)
                .checked_next_power_of_two()
                .unwrap_or(1 << (usize::BITS - 1)),
            ..self
        }
    }
}

/// Allocator hints supplied by a consumer pin at connect time.
///
/// Each field is optional; unset fields fall back to the producer's
/// requirements.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolRequest {
    #[serde(default)]
    pub buffer_count: Option<usize>,
    #[serde(default)]
    pub buffer_size: Option<usize>,
    #[serde(default)]
    pub alignment: Option<usize>,
    #[serde(default)]
    pub prefix: Option<usize>,
}

impl PoolRequest {
    /// Resolves unset fields to the smallest legal values.
    pub fn resolve(&self) -> PoolProperties {
        PoolProperties {
            buffer_count: self.buffer_count.unwrap_or(1),
            buffer_size: self.buffer_size.unwrap_or(0),
            alignment: self.alignment.unwrap_or(1),
            prefix: self.prefix.unwrap_or(0),
        }
        .normalized()
    }
}

/// Backing storage for one pool buffer.
#[derive(Default)]
pub(crate) struct Storage {
    bytes: Vec<u8>,
    offset: usize,
    size: usize,
}

impl Storage {
    fn allocate(properties: &PoolProperties) -> Result<Storage> {
        let total = properties
            .prefix
            .checked_add(properties.buffer_size)
            .and_then(|n| n.checked_add(properties.alignment - 1))
            .ok_or(Error::OutOfMemory)?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(total)
            .map_err(|_| Error::OutOfMemory)?;
        bytes.resize(total, 0);
        let base = bytes.as_ptr() as usize;
        let start = base.next_multiple_of(properties.alignment) - base;
        Ok(Storage {
            bytes,
            offset: start + properties.prefix,
            size: properties.buffer_size,
        })
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.bytes[self.offset..self.offset + self.size]
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.offset..self.offset + self.size]
    }
}

struct PoolState {
    properties: PoolProperties,
    committed: bool,
    free: Vec<Storage>,
    outstanding: usize,
}

pub(crate) struct PoolShared {
    name: String,
    state: Mutex<PoolState>,
    returned: Condvar,
}

impl PoolShared {
    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state.lock().map_err(|_| Error::poisoned(&self.name))
    }

    fn release(&self, storage: Storage) {
        let mut state = match self.lock() {
            Ok(state) => state,
            Err(err) => {
                error!("Failed to return buffer to pool: {}", err);
                return;
            }
        };
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.committed && storage.size == state.properties.buffer_size {
            state.free.push(storage);
        }
        trace!("Buffer returned to pool {}, outstanding={}", self.name, state.outstanding);
        self.returned.notify_all();
    }
}

/// Exclusive lease on one pool buffer; returns the buffer when dropped.
pub(crate) struct Lease {
    storage: Storage,
    pool: Arc<PoolShared>,
}

impl Lease {
    pub(crate) fn data(&self) -> &[u8] {
        self.storage.data()
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        self.storage.data_mut()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let storage = std::mem::take(&mut self.storage);
        self.pool.release(storage);
    }
}

/// A negotiated, reusable set of buffers shared between two connected pins.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Creates an empty, decommitted pool. `name` is used in log messages.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                state: Mutex::new(PoolState {
                    properties: PoolProperties::default().normalized(),
                    committed: false,
                    free: Vec::new(),
                    outstanding: 0,
                }),
                returned: Condvar::new(),
            }),
        }
    }

    /// Settles the pool properties from the consumer's request and the
    /// minimum the connected format requires.
    ///
    /// The result is the element-wise maximum of both, so it never drops
    /// below `required`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongState`] while the pool is committed or while
    /// buffers are still leased.
    pub fn negotiate(
        &self,
        requested: &PoolProperties,
        required: &PoolProperties,
    ) -> Result<PoolProperties> {
        let mut state = self.shared.lock()?;
        if state.committed {
            return Err(Error::WrongState("pool is committed"));
        }
        if state.outstanding > 0 {
            return Err(Error::WrongState("pool buffers are outstanding"));
        }
        let actual = requested.max(required).normalized();
        state.properties = actual;
        state.free.clear();
        debug!("Pool {} negotiated {:?}", self.shared.name, actual);
        Ok(actual)
    }

    /// Current properties.
    pub fn properties(&self) -> Result<PoolProperties> {
        Ok(self.shared.lock()?.properties)
    }

    /// Allocates the buffers. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if storage cannot be reserved.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.shared.lock()?;
        if state.committed {
            return Ok(());
        }
        let properties = state.properties;
        let mut free = Vec::with_capacity(properties.buffer_count);
        for _ in 0..properties.buffer_count.saturating_sub(state.outstanding) {
            free.push(Storage::allocate(&properties)?);
        }
        state.free = free;
        state.committed = true;
        debug!(
            "Pool {} committed {} x {} bytes",
            self.shared.name, properties.buffer_count, properties.buffer_size
        );
        Ok(())
    }

    /// Releases idle buffers, fails pending and future acquisitions, then
    /// waits up to `timeout` for leased buffers to come back. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if leases are still outstanding when the
    /// timeout expires. This is a resource leak and is not retried.
    pub fn decommit(&self, timeout: Duration) -> Result<()> {
        let mut state = self.shared.lock()?;
        if state.committed {
            state.committed = false;
            state.free.clear();
            self.shared.returned.notify_all();
            debug!("Pool {} decommitted", self.shared.name);
        }

        let deadline = Instant::now() + timeout;
        while state.outstanding > 0 {
            let now = Instant::now();
            if now >= deadline {
                error!(
                    "Pool {} decommit timed out with {} buffers outstanding",
                    self.shared.name, state.outstanding
                );
                return Err(Error::Timeout(format!(
                    "{} outstanding buffers of pool {}",
                    state.outstanding, self.shared.name
                )));
            }
            let (next, _) = self
                .shared
                .returned
                .wait_timeout(state, deadline - now)
                .map_err(|_| Error::poisoned(&self.shared.name))?;
            state = next;
        }
        Ok(())
    }

    pub fn is_committed(&self) -> Result<bool> {
        Ok(self.shared.lock()?.committed)
    }

    /// Number of buffers currently leased out.
    pub fn outstanding(&self) -> Result<usize> {
        Ok(self.shared.lock()?.outstanding)
    }

    /// Leases a buffer, blocking while every buffer is in use.
    ///
    /// Must not be called while holding a filter lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotCommitted`] if the pool is (or becomes) decommitted.
    pub fn acquire(&self) -> Result<Sample> {
        lockcheck::assert_not_held("BufferPool::acquire");
        let mut state = self.shared.lock()?;
        loop {
            if !state.committed {
                return Err(Error::NotCommitted);
            }
            if let Some(storage) = state.free.pop() {
                state.outstanding += 1;
                return Ok(self.lease(storage));
            }
            trace!("Pool {} exhausted, waiting", self.shared.name);
            state = self
                .shared
                .returned
                .wait(state)
                .map_err(|_| Error::poisoned(&self.shared.name))?;
        }
    }

    /// Leases a buffer without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if no buffer is free, or
    /// [`Error::NotCommitted`] if the pool is decommitted.
    pub fn try_acquire(&self) -> Result<Sample> {
        let mut state = self.shared.lock()?;
        if !state.committed {
            return Err(Error::NotCommitted);
        }
        let storage = state.free.pop().ok_or(Error::PoolExhausted)?;
        state.outstanding += 1;
        Ok(self.lease(storage))
    }

    fn lease(&self, storage: Storage) -> Sample {
        Sample::leased(Lease {
            storage,
            pool: self.shared.clone(),
        })
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.shared.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn props(count: usize, size: usize, alignment: usize, prefix: usize) -> PoolProperties {
        PoolProperties {
            buffer_count: count,
            buffer_size: size,
            alignment,
            prefix,
        }
    }

    #[test]
    fn negotiate_takes_elementwise_max() {
        let pool = BufferPool::new("test");
        let actual = pool
            .negotiate(&props(4, 100, 1, 8), &props(2, 300, 16, 0))
            .unwrap();
        assert_eq!(actual, props(4, 300, 16, 8));
    }

    #[test]
    fn negotiation_never_drops_below_required() {
        let required = props(1, 176 * 144 * 3 / 2, 1, 0);
        let requests = [props(0, 0, 0, 0), props(8, 10, 4, 0), props(1, 1 << 20, 64, 32)];
        let pool = BufferPool::new("test");
        for first in &requests {
            for second in &requests {
                pool.negotiate(first, &required).unwrap();
                let actual = pool.negotiate(second, &required).unwrap();
                pool.commit().unwrap();
                let committed = pool.properties().unwrap();
                assert!(committed.covers(&required), "{committed:?}");
                pool.decommit(Duration::from_secs(1)).unwrap();
                assert_eq!(actual, committed);
            }
        }
    }

    #[test]
    fn request_resolution_fills_unset_fields() {
        let request = PoolRequest {
            buffer_count: None,
            buffer_size: Some(10),
            alignment: Some(0),
            prefix: None,
        };
        assert_eq!(request.resolve(), props(1, 10, 1, 0));
    }

    #[test]
    fn negotiate_refused_while_committed() {
        let pool = BufferPool::new("test");
        pool.negotiate(&props(1, 16, 1, 0), &props(1, 16, 1, 0)).unwrap();
        pool.commit().unwrap();
        assert!(matches!(
            pool.negotiate(&props(1, 16, 1, 0), &props(1, 16, 1, 0)),
            Err(Error::WrongState(_))
        ));
    }

    #[test]
    fn oversized_hints_fail_commit_without_overflow() {
        let pool = BufferPool::new("test");
        let actual = pool
            .negotiate(&props(1, usize::MAX, usize::MAX, 0), &props(1, 16, 1, 0))
            .unwrap();
        assert!(actual.alignment.is_power_of_two());
        assert!(matches!(pool.commit(), Err(Error::OutOfMemory)));

        pool.negotiate(&props(1, usize::MAX - 8, 1, 16), &props(1, 16, 1, 0))
            .unwrap();
        assert!(matches!(pool.commit(), Err(Error::OutOfMemory)));
        assert!(matches!(pool.try_acquire(), Err(Error::NotCommitted)));
    }

    #[test]
    fn commit_and_decommit_are_idempotent() {
        let pool = BufferPool::new("test");
        pool.negotiate(&props(2, 16, 1, 0), &props(1, 16, 1, 0)).unwrap();
        pool.commit().unwrap();
        pool.commit().unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(matches!(pool.try_acquire(), Err(Error::PoolExhausted)));
        drop((a, b));
        pool.decommit(Duration::from_millis(10)).unwrap();
        pool.decommit(Duration::from_millis(10)).unwrap();
        assert!(matches!(pool.acquire(), Err(Error::NotCommitted)));
    }

    #[test]
    fn buffers_honour_alignment_and_prefix() {
        let pool = BufferPool::new("test");
        pool.negotiate(&props(1, 33, 64, 16), &props(1, 1, 1, 0)).unwrap();
        pool.commit().unwrap();
        let sample = pool.acquire().unwrap();
        assert_eq!(sample.capacity(), 33);
        let start = sample.buffer().as_ptr() as usize;
        assert_eq!((start - 16) % 64, 0);
    }

    #[test]
    fn acquire_blocks_until_release() {
        let pool = BufferPool::new("test");
        pool.negotiate(&props(1, 8, 1, 0), &props(1, 8, 1, 0)).unwrap();
        pool.commit().unwrap();
        let held = pool.acquire().unwrap();
        let other = pool.clone();
        let waiter = thread::spawn(move || other.acquire().map(|s| s.capacity()));
        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());
        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), 8);
    }

    #[test]
    fn decommit_wakes_blocked_acquirer() {
        let pool = BufferPool::new("test");
        pool.negotiate(&props(1, 8, 1, 0), &props(1, 8, 1, 0)).unwrap();
        pool.commit().unwrap();
        let held = pool.acquire().unwrap();
        let other = pool.clone();
        let waiter = thread::spawn(move || other.acquire().map(|_| ()));
        thread::sleep(Duration::from_millis(30));
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            drop(held);
        });
        pool.decommit(Duration::from_secs(2)).unwrap();
        assert!(matches!(waiter.join().unwrap(), Err(Error::NotCommitted)));
        releaser.join().unwrap();
        assert_eq!(pool.outstanding().unwrap(), 0);
    }

    #[test]
    fn decommit_times_out_on_leaked_lease() {
        let pool = BufferPool::new("test");
        pool.negotiate(&props(1, 8, 1, 0), &props(1, 8, 1, 0)).unwrap();
        pool.commit().unwrap();
        let _leaked = pool.acquire().unwrap();
        assert!(matches!(
            pool.decommit(Duration::from_millis(20)),
            Err(Error::Timeout(_))
        ));
    }
}
