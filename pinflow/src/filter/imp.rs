// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! The media-specific half of a filter.
//!
//! [`crate::Filter`] implements the pin protocol once: locking, state
//! changes, negotiation, pools, pump threads, flush and end-of-stream
//! ordering. A [`FilterImpl`] plugs in what differs between stages: which
//! pins exist, which formats they accept and offer, and how input samples
//! turn into queued output samples.

use std::sync::Arc;

use crate::{
    Error, FormatDescriptor, FormatList, PendingQueue, Result, Sample,
    filter::{
        FilterState,
        delivery::{CopyPopulator, Populate},
    },
    pin::{Direction, Pin, PinId, PinTemplate},
    pool::{PoolProperties, PoolRequest},
};

/// Connection facts handed to [`FilterImpl::start`].
#[derive(Clone, Debug, Default)]
pub struct StreamContext {
    formats: Vec<Option<FormatDescriptor>>,
    pools: Vec<Option<PoolProperties>>,
}

impl StreamContext {
    pub(crate) fn new(
        formats: Vec<Option<FormatDescriptor>>,
        pools: Vec<Option<PoolProperties>>,
    ) -> Self {
        Self { formats, pools }
    }

    /// Connection format of `pin`, if connected.
    pub fn format(&self, pin: PinId) -> Option<&FormatDescriptor> {
        self.formats.get(pin.0).and_then(Option::as_ref)
    }

    /// Negotiated pool properties of output `pin`, if connected.
    pub fn pool(&self, pin: PinId) -> Option<&PoolProperties> {
        self.pools.get(pin.0).and_then(Option::as_ref)
    }
}

/// Write access to the pending queues of a filter's output pins.
///
/// Handed to [`FilterImpl::receive`] and [`FilterImpl::end_of_stream`]
/// while the filter lock is held.
pub struct Outputs<'a> {
    pins: &'a mut [Pin],
}

impl<'a> Outputs<'a> {
    pub(crate) fn new(pins: &'a mut [Pin]) -> Self {
        Self { pins }
    }

    fn output(&self, pin: PinId) -> Result<&Pin> {
        match self.pins.get(pin.0) {
            Some(p) if p.direction == Direction::Output => Ok(p),
            _ => Err(Error::InvalidArg(format!("{pin} is not an output pin"))),
        }
    }

    /// Whether output `pin` is connected.
    pub fn is_connected(&self, pin: PinId) -> bool {
        self.output(pin).is_ok_and(|p| p.connection.is_some())
    }

    /// Connection format of output `pin`.
    pub fn format(&self, pin: PinId) -> Option<&FormatDescriptor> {
        self.output(pin).ok().and_then(Pin::format)
    }

    /// The pending queue of output `pin`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArg`] if `pin` is not an output.
    /// - [`Error::NotConnected`] if it has no peer.
    pub fn queue(&mut self, pin: PinId) -> Result<&mut PendingQueue> {
        if !self.is_connected(pin) {
            self.output(pin)?;
            return Err(Error::NotConnected);
        }
        Ok(&mut self.pins[pin.0].delivery.queue)
    }

    /// Appends `sample` to the pending queue of output `pin`.
    ///
    /// # Errors
    ///
    /// As [`Outputs::queue`], plus [`Error::RejectedEos`] once the queue is sealed.
    pub fn push(&mut self, pin: PinId, sample: Sample) -> Result<()> {
        self.queue(pin)?.push_sample(sample)
    }

    /// Number of entries waiting on output `pin`.
    pub fn pending(&self, pin: PinId) -> usize {
        self.output(pin).map_or(0, |p| p.delivery.queue.len())
    }
}

/// Consumes input samples outside the filter lock.
///
/// Handed out by [`FilterImpl::renderer`] for sinks whose consumption may
/// block, such as a device write, so state changes and queries on the
/// filter are not held up behind it.
pub trait Render: Send + Sync {
    fn render(&self, sample: Sample) -> Result<()>;
}

/// Media-specific behaviour of a filter.
///
/// Every method runs with the filter lock held and must not block on other
/// stages. Blocking consumption goes through [`FilterImpl::renderer`].
pub trait FilterImpl: Send + 'static {
    /// Short type name used in logs and thread names.
    fn type_name(&self) -> &'static str;

    /// The pins this filter exposes; position is the [`PinId`].
    fn pin_templates(&self) -> Vec<PinTemplate>;

    /// Ranked formats output `pin` offers. `upstream` is the connection
    /// format of the first input pin, if any.
    fn preferred_formats(&self, pin: PinId, upstream: Option<&FormatDescriptor>) -> FormatList;

    /// Acceptance predicate of `pin`.
    fn query_accept(
        &self,
        pin: PinId,
        format: &FormatDescriptor,
        upstream: Option<&FormatDescriptor>,
    ) -> Result<()>;

    /// Minimum pool properties output `pin` needs for `format`.
    fn pool_requirements(&self, _pin: PinId, format: &FormatDescriptor) -> PoolProperties {
        PoolProperties {
            buffer_count: 1,
            buffer_size: format.minimum_buffer_size().unwrap_or(0),
            alignment: 1,
            prefix: 0,
        }
    }

    /// Allocator hints input `pin` gives its upstream producer.
    fn allocator_request(&self, _pin: PinId) -> PoolRequest {
        PoolRequest::default()
    }

    /// Called when leaving Stopped, after pools are negotiated and before
    /// any sample arrives.
    fn start(&mut self, _context: &StreamContext) -> Result<()> {
        Ok(())
    }

    /// Called after every transition into Paused or Running.
    fn activated(&mut self, _state: FilterState) -> Result<()> {
        Ok(())
    }

    /// Called on entering Stopped.
    fn stop(&mut self) {}

    /// Copy or transform step applied when delivering from output `pin`.
    fn populator(&self, _pin: PinId, _context: &StreamContext) -> Arc<dyn Populate> {
        Arc::new(CopyPopulator)
    }

    /// Lock-free consumer for input `pin`. When present, samples arriving on
    /// `pin` go to it after the protocol checks instead of to
    /// [`FilterImpl::receive`].
    fn renderer(&self, _pin: PinId) -> Option<Arc<dyn Render>> {
        None
    }

    /// Consumes a sample that arrived on input `pin`.
    fn receive(&mut self, pin: PinId, _sample: Sample, _outputs: &mut Outputs<'_>) -> Result<()> {
        Err(Error::InvalidArg(format!("{pin} does not consume samples")))
    }

    /// Drains buffered data when input `pin` reaches end-of-stream. The
    /// filter appends the end-of-stream sentinel afterwards.
    fn end_of_stream(&mut self, _pin: PinId, _outputs: &mut Outputs<'_>) -> Result<()> {
        Ok(())
    }

    /// Discards buffered state at the end of a flush.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether receiving may block the upstream caller.
    fn receive_can_block(&self) -> bool {
        false
    }
}
