// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Sink that records what it receives.
//!
//! A [`CollectSink`] copies every payload it is handed, together with its
//! timing and flags, and counts end-of-stream and flush notifications. The
//! host observes the records through a cloneable [`CollectHandle`], which
//! can block until a given number of end-of-stream notifications arrived.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use pinflow::{
    Error, FilterImpl, FormatDescriptor, FormatList, Outputs, PinId, PinTemplate, PoolRequest,
    Result, Sample, SampleFlags, SampleTime, StreamContext,
};
use tracing::{debug, trace};

/// One recorded sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectedSample {
    pub data: Vec<u8>,
    pub time: Option<SampleTime>,
    pub flags: SampleFlags,
}

/// Everything a [`CollectSink`] has seen.
#[derive(Clone, Debug, Default)]
pub struct Collected {
    /// Connection format at the last start.
    pub format: Option<FormatDescriptor>,
    pub samples: Vec<CollectedSample>,
    pub end_of_stream: usize,
    pub flushes: usize,
}

/// Shared view on the records of a [`CollectSink`].
#[derive(Clone, Default)]
pub struct CollectHandle {
    inner: Arc<(Mutex<Collected>, Condvar)>,
}

impl CollectHandle {
    fn lock(&self) -> Result<MutexGuard<'_, Collected>> {
        self.inner
            .0
            .lock()
            .map_err(|_| Error::Other("Failed to lock collected samples: lock poisoned".into()))
    }

    fn update(&self, f: impl FnOnce(&mut Collected)) -> Result<()> {
        f(&mut *self.lock()?);
        self.inner.1.notify_all();
        Ok(())
    }

    /// A copy of the current records.
    pub fn snapshot(&self) -> Result<Collected> {
        Ok(self.lock()?.clone())
    }

    /// Discards all records.
    pub fn clear(&self) -> Result<()> {
        self.update(|c| *c = Collected::default())
    }

    /// Blocks until `predicate` holds, then returns a copy of the records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if `timeout` expires first.
    pub fn wait_for(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut(&Collected) -> bool,
    ) -> Result<Collected> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock()?;
        while !predicate(&guard) {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout("collected samples".into()));
            }
            guard = self
                .inner
                .1
                .wait_timeout(guard, deadline - now)
                .map_err(|_| Error::Other("Failed to wait for samples: lock poisoned".into()))?
                .0;
        }
        Ok(guard.clone())
    }

    /// Blocks until `count` end-of-stream notifications were recorded.
    pub fn wait_for_end_of_stream(&self, count: usize, timeout: Duration) -> Result<Collected> {
        self.wait_for(timeout, |c| c.end_of_stream >= count)
    }

    /// Blocks until at least `count` samples were recorded.
    pub fn wait_for_samples(&self, count: usize, timeout: Duration) -> Result<Collected> {
        self.wait_for(timeout, |c| c.samples.len() >= count)
    }
}

/// Input-only filter that records samples, end-of-stream and flushes.
pub struct CollectSink {
    accepts: Vec<FormatDescriptor>,
    request: PoolRequest,
    handle: CollectHandle,
}

impl Default for CollectSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectSink {
    pub const INPUT: PinId = PinId(0);

    /// A sink accepting any format.
    pub fn new() -> Self {
        Self {
            accepts: Vec::new(),
            request: PoolRequest::default(),
            handle: CollectHandle::default(),
        }
    }

    /// Restricts accepted formats to those compatible with `accepts`.
    pub fn accepting(mut self, accepts: Vec<FormatDescriptor>) -> Self {
        self.accepts = accepts;
        self
    }

    /// Allocator hints handed to the upstream producer.
    pub fn with_request(mut self, request: PoolRequest) -> Self {
        self.request = request;
        self
    }

    pub fn handle(&self) -> CollectHandle {
        self.handle.clone()
    }
}

impl FilterImpl for CollectSink {
    fn type_name(&self) -> &'static str {
        "collect-sink"
    }

    fn pin_templates(&self) -> Vec<PinTemplate> {
        vec![PinTemplate::input("in")]
    }

    fn preferred_formats(&self, _pin: PinId, _upstream: Option<&FormatDescriptor>) -> FormatList {
        FormatList::new()
    }

    fn query_accept(
        &self,
        _pin: PinId,
        format: &FormatDescriptor,
        _upstream: Option<&FormatDescriptor>,
    ) -> Result<()> {
        if self.accepts.is_empty() || self.accepts.iter().any(|f| f.is_compatible(format)) {
            Ok(())
        } else {
            Err(Error::NoAcceptableFormat)
        }
    }

    fn allocator_request(&self, _pin: PinId) -> PoolRequest {
        self.request
    }

    fn start(&mut self, context: &StreamContext) -> Result<()> {
        let format = context.format(Self::INPUT).cloned();
        debug!("collect-sink starting with {:?}", format.as_ref().map(|f| f.subtype));
        self.handle.update(|c| c.format = format)
    }

    fn receive(&mut self, _pin: PinId, sample: Sample, _outputs: &mut Outputs<'_>) -> Result<()> {
        trace!("collect-sink received {:?}", sample);
        let record = CollectedSample {
            data: sample.payload().to_vec(),
            time: sample.time(),
            flags: sample.flags(),
        };
        self.handle.update(|c| c.samples.push(record))
    }

    fn end_of_stream(&mut self, _pin: PinId, _outputs: &mut Outputs<'_>) -> Result<()> {
        self.handle.update(|c| c.end_of_stream += 1)
    }

    fn flush(&mut self) -> Result<()> {
        self.handle.update(|c| c.flushes += 1)
    }
}
