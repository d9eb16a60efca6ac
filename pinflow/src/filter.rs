// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Filters: the protocol half shared by every processing stage.
//!
//! A [`Filter`] owns its pins, the per-filter lock and one pump thread per
//! connected output. The media-specific half is a [`FilterImpl`] that the
//! filter calls with its lock held. The lock is never held across buffer
//! acquisition, a downstream push or an end-of-stream call.

mod delivery;
mod flush;
mod imp;
mod input;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use delivery::{CopyPopulator, Populate};
pub use imp::{FilterImpl, Outputs, Render, StreamContext};

use crate::{
    Error, FormatDescriptor, Pop, QueueEntry, Result, Sample,
    config::{DeliveryMode, FilterConfig},
    format::negotiate,
    lockcheck::{FilterLock, LockGuard},
    pin::{Connection, Delivery, Direction, InputEndpoint, Peer, Pin, PinId, PinInfo, PinKey},
    pool::BufferPool,
};
use delivery::{Route, drain_sync, spawn_pump};
use input::InputPinRef;

/// Streaming state of a filter.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterState {
    #[default]
    Stopped,
    Paused,
    Running,
}

/// Everything guarded by the filter lock.
pub(crate) struct FilterInner<T> {
    pub(crate) state: FilterState,
    pub(crate) pins: Vec<Pin>,
    pub(crate) imp: T,
}

impl<T: FilterImpl> FilterInner<T> {
    pub(crate) fn pin(&self, pin: PinId) -> Result<&Pin> {
        self.pins
            .get(pin.0)
            .ok_or_else(|| Error::InvalidArg(format!("no pin {pin}")))
    }

    pub(crate) fn pin_mut(&mut self, pin: PinId) -> Result<&mut Pin> {
        self.pins
            .get_mut(pin.0)
            .ok_or_else(|| Error::InvalidArg(format!("no pin {pin}")))
    }

    fn require_stopped(&self, what: &'static str) -> Result<()> {
        match self.state {
            FilterState::Stopped => Ok(()),
            _ => Err(Error::WrongState(what)),
        }
    }

    fn has_inputs(&self) -> bool {
        self.pins.iter().any(|p| p.direction == Direction::Input)
    }

    /// Connection format of the first input pin.
    fn upstream_format(&self) -> Option<FormatDescriptor> {
        self.pins
            .iter()
            .find(|p| p.direction == Direction::Input)
            .and_then(|p| p.format().cloned())
    }

    fn connected_outputs(&self) -> impl Iterator<Item = PinId> + '_ {
        self.pins
            .iter()
            .enumerate()
            .filter(|(_, p)| p.direction == Direction::Output && p.connection.is_some())
            .map(|(index, _)| PinId(index))
    }

    /// Next step for the delivery loop of output `pin`.
    pub(crate) fn pop(&mut self, pin: PinId) -> Pop {
        if self.state == FilterState::Stopped {
            return Pop::Terminate;
        }
        let Ok(pin) = self.pin_mut(pin) else {
            return Pop::Terminate;
        };
        if pin.delivery.flushing {
            return Pop::Terminate;
        }
        match pin.delivery.queue.pop() {
            Some(QueueEntry::Sample(sample)) => Pop::Data(sample),
            Some(QueueEntry::EndOfStream) => Pop::EndOfStream,
            None => Pop::Wait,
        }
    }

    fn route(&self, pin: PinId) -> Option<Route> {
        let p = self.pins.get(pin.0)?;
        Some(Route {
            peer: p.downstream()?,
            pool: p.delivery.pool.clone()?,
            populator: p.delivery.populator.clone()?,
        })
    }

    /// Routes to drain on the caller thread under synchronous delivery.
    fn sync_routes(&self, config: &FilterConfig) -> Vec<(PinId, Route)> {
        if config.delivery != DeliveryMode::Synchronous {
            return Vec::new();
        }
        self.connected_outputs()
            .filter_map(|pin| self.route(pin).map(|route| (pin, route)))
            .collect()
    }

    fn stream_context(&self) -> StreamContext {
        let formats = self.pins.iter().map(|p| p.format().cloned()).collect();
        let pools = self
            .pins
            .iter()
            .map(|p| p.delivery.pool.as_ref().and_then(|pool| pool.properties().ok()))
            .collect();
        StreamContext::new(formats, pools)
    }

    /// Resets streaming state and commits output pools on leaving Stopped.
    fn commit_outputs(&mut self, context: &StreamContext) -> Result<()> {
        let FilterInner { pins, imp, .. } = self;
        for (index, pin) in pins.iter_mut().enumerate() {
            match pin.direction {
                Direction::Input => pin.stream = Default::default(),
                Direction::Output => {
                    let Some(pool) = pin.delivery.pool.clone() else {
                        continue;
                    };
                    pool.commit()?;
                    pin.delivery.reset();
                    pin.delivery.populator = Some(imp.populator(PinId(index), context));
                }
            }
        }
        Ok(())
    }

    /// Drops every output connection, returning the downstream peers to
    /// notify once the lock is released.
    fn disconnect_outputs(&mut self) -> Vec<Arc<dyn InputEndpoint>> {
        let mut peers = Vec::new();
        for pin in self.pins.iter_mut().filter(|p| p.direction == Direction::Output) {
            if let Some(connection) = pin.connection.take() {
                if let Peer::Downstream(peer) = connection.peer {
                    peers.push(peer);
                }
                pin.delivery = Delivery::default();
            }
        }
        peers
    }

    /// Appends the end-of-stream sentinel to every connected output.
    fn seal_outputs(&mut self) {
        for pin in self.pins.iter_mut().filter(|p| p.connection.is_some()) {
            if pin.direction == Direction::Output && !pin.delivery.queue.is_sealed() {
                // Sealing is the only failure, already excluded above.
                let _ = pin.delivery.queue.push_end_of_stream();
            }
        }
    }

    /// Halts input `pin` after a fatal codec failure and ends every output
    /// stream so downstream is not left waiting.
    fn fail_stream(&mut self, name: &str, pin: PinId, cause: &Error) {
        error!("{}: stream on {} failed: {}", name, pin, cause);
        if let Ok(p) = self.pin_mut(pin) {
            p.stream.halted = true;
        }
        self.seal_outputs();
    }
}

/// State shared between filter handles, input endpoints and pump threads.
pub(crate) struct FilterShared<T> {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) config: FilterConfig,
    lock: FilterLock<FilterInner<T>>,
}

impl<T: FilterImpl> FilterShared<T> {
    pub(crate) fn lock(&self) -> Result<LockGuard<'_, FilterInner<T>>> {
        self.lock.lock()
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Wakes pump threads blocked on the filter's wake event.
    pub(crate) fn wake(&self) {
        self.lock.wake_all();
    }

    pub(crate) fn key(&self, pin: PinId) -> PinKey {
        PinKey {
            filter: self.id,
            pin,
        }
    }

    /// Spawns one pump per connected output that lacks one. No-op under
    /// synchronous delivery.
    pub(crate) fn start_pumps(self: &Arc<Self>, inner: &mut FilterInner<T>) -> Result<()> {
        if self.config.delivery != DeliveryMode::Async {
            return Ok(());
        }
        let outputs: Vec<PinId> = inner.connected_outputs().collect();
        for pin in outputs {
            if inner.pin(pin)?.delivery.pump.is_some() {
                continue;
            }
            let Some(route) = inner.route(pin) else {
                continue;
            };
            let task = spawn_pump(self, pin, route)?;
            inner.pin_mut(pin)?.delivery.pump = Some(task);
        }
        Ok(())
    }

    /// Pushes source data onto output `pin`, then drains it under
    /// synchronous delivery.
    fn push_output(&self, pin: PinId, entry: QueueEntry) -> Result<()> {
        let routes = {
            let mut inner = self.lock()?;
            let state = inner.state;
            let p = inner.pin_mut(pin)?;
            if p.direction != Direction::Output {
                return Err(Error::InvalidArg(format!("{pin} is not an output pin")));
            }
            if p.connection.is_none() {
                return Err(Error::NotConnected);
            }
            if state == FilterState::Stopped {
                return Err(Error::WrongState("filter is stopped"));
            }
            if p.delivery.flushing {
                return Err(Error::RejectedFlushing);
            }
            match entry {
                QueueEntry::Sample(sample) => {
                    if p.delivery.done {
                        return Err(Error::DeliveryHalted);
                    }
                    p.delivery.queue.push_sample(sample)?;
                }
                QueueEntry::EndOfStream => p.delivery.queue.push_end_of_stream()?,
            }
            self.wake();
            inner.sync_routes(&self.config)
        };
        for (pin, route) in routes {
            drain_sync(self, pin, &route)?;
        }
        Ok(())
    }
}

/// A processing stage: pins, lock, pools and pumps around a [`FilterImpl`].
///
/// Cloning yields another handle to the same filter.
pub struct Filter<T> {
    shared: Arc<FilterShared<T>>,
}

impl<T> Clone for Filter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: FilterImpl> Filter<T> {
    /// Creates a stopped, unconnected filter with default configuration.
    pub fn new(name: impl Into<String>, imp: T) -> Self {
        Self::with_config(name, imp, FilterConfig::default())
    }

    pub fn with_config(name: impl Into<String>, imp: T, config: FilterConfig) -> Self {
        let name = name.into();
        let pins = imp.pin_templates().into_iter().map(Pin::new).collect();
        debug!("Created {} filter {}", imp.type_name(), name);
        Self {
            shared: Arc::new(FilterShared {
                id: Uuid::new_v4(),
                lock: FilterLock::new(name.clone(), FilterInner {
                    state: FilterState::Stopped,
                    pins,
                    imp,
                }),
                name,
                config,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn config(&self) -> &FilterConfig {
        &self.shared.config
    }

    pub fn state(&self) -> Result<FilterState> {
        Ok(self.shared.lock()?.state)
    }

    /// Address of `pin` for use as a peer key.
    pub fn key(&self, pin: PinId) -> PinKey {
        self.shared.key(pin)
    }

    /// Snapshot of every pin.
    pub fn pins(&self) -> Result<Vec<PinInfo>> {
        let inner = self.shared.lock()?;
        Ok(inner
            .pins
            .iter()
            .enumerate()
            .map(|(index, p)| PinInfo {
                id: PinId(index),
                name: p.name.clone(),
                direction: p.direction,
                format: p.format().cloned(),
                peer: p.peer_key(),
            })
            .collect())
    }

    /// Looks a pin up by its template name.
    pub fn pin_by_name(&self, name: &str) -> Result<PinId> {
        let inner = self.shared.lock()?;
        inner
            .pins
            .iter()
            .position(|p| p.name == name)
            .map(PinId)
            .ok_or_else(|| Error::InvalidArg(format!("{}: no pin named {name}", self.name())))
    }

    /// The consumer endpoint of input `pin`, for connecting an upstream
    /// producer to it.
    pub fn input(&self, pin: PinId) -> Result<Arc<dyn InputEndpoint>> {
        let inner = self.shared.lock()?;
        if inner.pin(pin)?.direction != Direction::Input {
            return Err(Error::InvalidArg(format!("{pin} is not an input pin")));
        }
        Ok(Arc::new(InputPinRef::new(self.shared.clone(), pin)))
    }

    /// Acceptance predicate of `pin`, as an upstream producer would see it.
    pub fn query_accept(&self, pin: PinId, format: &FormatDescriptor) -> Result<()> {
        let inner = self.shared.lock()?;
        inner.pin(pin)?;
        let upstream = inner.upstream_format();
        inner.imp.query_accept(pin, format, upstream.as_ref())
    }

    /// Connection format of `pin`, if connected.
    pub fn connection_format(&self, pin: PinId) -> Result<Option<FormatDescriptor>> {
        Ok(self.shared.lock()?.pin(pin)?.format().cloned())
    }

    /// The buffer pool owned by output `pin`, if connected.
    pub fn pool(&self, pin: PinId) -> Result<Option<BufferPool>> {
        Ok(self.shared.lock()?.pin(pin)?.delivery.pool.clone())
    }

    /// Connects output `pin` to `peer`.
    ///
    /// Negotiates the format (trying `proposed` alone if given, otherwise
    /// this pin's ranked preferences), creates and negotiates the pool, then
    /// asks the peer to complete the connection. The filter lock is released
    /// while calling into the peer.
    ///
    /// # Errors
    ///
    /// - [`Error::WrongState`] unless the filter is stopped.
    /// - [`Error::AlreadyConnected`] if `pin` already has a peer.
    /// - [`Error::NotConnected`] if the filter has inputs and none is connected.
    /// - [`Error::NoAcceptableFormat`] if negotiation fails.
    pub fn connect(
        &self,
        pin: PinId,
        peer: Arc<dyn InputEndpoint>,
        proposed: Option<&FormatDescriptor>,
    ) -> Result<FormatDescriptor> {
        let (pin_name, preferred, upstream) = {
            let inner = self.shared.lock()?;
            inner.require_stopped("connect requires a stopped filter")?;
            let p = inner.pin(pin)?;
            if p.direction != Direction::Output {
                return Err(Error::InvalidArg(format!("{pin} is not an output pin")));
            }
            if p.connection.is_some() {
                return Err(Error::AlreadyConnected);
            }
            let upstream = inner.upstream_format();
            if inner.has_inputs() && upstream.is_none() {
                return Err(Error::NotConnected);
            }
            let preferred = inner.imp.preferred_formats(pin, upstream.as_ref());
            (p.name.clone(), preferred, upstream)
        };

        let format = negotiate(
            &preferred,
            proposed,
            |candidate| {
                self.shared
                    .lock()?
                    .imp
                    .query_accept(pin, candidate, upstream.as_ref())
            },
            |candidate| peer.query_accept(candidate),
        )?;

        let requested = peer.allocator_request().resolve();
        let required = self.shared.lock()?.imp.pool_requirements(pin, &format);
        let pool = BufferPool::new(format!("{}.{}", self.name(), pin_name));
        let properties = pool.negotiate(&requested, &required)?;

        peer.receive_connection(self.key(pin), &format)?;

        let mut inner = self.shared.lock()?;
        let still_free =
            inner.state == FilterState::Stopped && inner.pin(pin)?.connection.is_none();
        if !still_free {
            drop(inner);
            if let Err(err) = peer.disconnect() {
                warn!("{}: rollback of {} failed: {}", self.name(), pin, err);
            }
            return Err(Error::WrongState("filter changed during connect"));
        }
        let p = inner.pin_mut(pin)?;
        p.connection = Some(Connection {
            format: format.clone(),
            peer: Peer::Downstream(peer),
        });
        p.delivery = Delivery {
            pool: Some(pool),
            ..Delivery::default()
        };
        info!(
            "{}: {} connected as {:?}, pool {:?}",
            self.name(),
            pin_name,
            format.subtype,
            properties
        );
        Ok(format)
    }

    /// Drops the connection of `pin`.
    ///
    /// Disconnecting an input also disconnects every output, since output
    /// formats derive from the input format.
    pub fn disconnect(&self, pin: PinId) -> Result<()> {
        let peers = {
            let mut inner = self.shared.lock()?;
            inner.require_stopped("disconnect requires a stopped filter")?;
            let p = inner.pin_mut(pin)?;
            let direction = p.direction;
            let connection = p.connection.take().ok_or(Error::NotConnected)?;
            p.delivery = Delivery::default();
            p.stream = Default::default();
            let mut peers: Vec<Arc<dyn InputEndpoint>> = Vec::new();
            if let Peer::Downstream(peer) = connection.peer {
                peers.push(peer);
            }
            if direction == Direction::Input {
                peers.extend(inner.disconnect_outputs());
            }
            debug!("{}: {} disconnected", self.name(), pin);
            peers
        };
        for peer in peers {
            if let Err(err) = peer.disconnect() {
                warn!("{}: peer disconnect failed: {}", self.name(), err);
            }
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.activate(FilterState::Paused)
    }

    pub fn run(&self) -> Result<()> {
        self.activate(FilterState::Running)
    }

    fn activate(&self, target: FilterState) -> Result<()> {
        let mut inner = self.shared.lock()?;
        if inner.state == FilterState::Stopped {
            let context = inner.stream_context();
            inner.imp.start(&context)?;
            if let Err(err) = inner.commit_outputs(&context) {
                inner.imp.stop();
                for pin in inner.pins.iter() {
                    if let Some(pool) = &pin.delivery.pool {
                        // Freshly committed pools have no leases.
                        let _ = pool.decommit(std::time::Duration::ZERO);
                    }
                }
                return Err(err);
            }
            inner.state = target;
            self.shared.start_pumps(&mut inner)?;
        } else {
            inner.state = target;
        }
        inner.imp.activated(target)?;
        info!("{}: {:?}", self.name(), target);
        Ok(())
    }

    /// Stops streaming: discards queues, decommits pools and joins pumps.
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned. A join that times out leaves the thread detached.
    pub fn stop(&self) -> Result<()> {
        let (pools, pumps) = {
            let mut inner = self.shared.lock()?;
            if inner.state == FilterState::Stopped {
                return Ok(());
            }
            inner.state = FilterState::Stopped;
            let mut pools = Vec::new();
            let mut pumps = Vec::new();
            for pin in inner.pins.iter_mut() {
                pin.delivery.queue.clear();
                pumps.extend(pin.delivery.pump.take());
                pools.extend(pin.delivery.pool.clone());
            }
            inner.imp.stop();
            self.shared.wake();
            (pools, pumps)
        };

        let mut result = Ok(());
        for pool in pools {
            if let Err(err) = pool.decommit(self.shared.config.decommit_timeout()) {
                result = result.and(Err(err));
            }
        }
        for pump in pumps {
            if let Err(err) = pump.join(self.shared.config.join_timeout()) {
                result = result.and(Err(err));
            }
        }
        info!("{}: Stopped", self.name());
        result
    }

    /// Queues a sample on output `pin` of a source filter.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`], [`Error::WrongState`] when the pin cannot
    ///   stream.
    /// - [`Error::RejectedFlushing`] while the pin is flushing.
    /// - [`Error::RejectedEos`] after end-of-stream was queued.
    /// - [`Error::DeliveryHalted`] after downstream refused a sample.
    pub fn push_output(&self, pin: PinId, sample: Sample) -> Result<()> {
        self.shared.push_output(pin, QueueEntry::Sample(sample))
    }

    /// Queues end-of-stream on output `pin` of a source filter.
    pub fn push_output_end_of_stream(&self, pin: PinId) -> Result<()> {
        self.shared.push_output(pin, QueueEntry::EndOfStream)
    }

    /// Starts a flush originating at this (source) filter.
    pub fn begin_flush(&self) -> Result<()> {
        flush::begin_flush(&self.shared, None)
    }

    /// Ends a flush started with [`Filter::begin_flush`].
    pub fn end_flush(&self) -> Result<()> {
        flush::end_flush(&self.shared, None)
    }

    /// Runs `f` with the filter lock held and typed access to the
    /// implementation.
    pub fn with_impl<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut inner = self.shared.lock()?;
        Ok(f(&mut inner.imp))
    }

    /// Whether output `pin` has a live pump thread.
    pub fn pump_running(&self, pin: PinId) -> Result<bool> {
        let inner = self.shared.lock()?;
        Ok(inner
            .pin(pin)?
            .delivery
            .pump
            .as_ref()
            .is_some_and(|pump| !pump.is_finished()))
    }

    /// Number of entries waiting on output `pin`.
    pub fn pending_len(&self, pin: PinId) -> Result<usize> {
        Ok(self.shared.lock()?.pin(pin)?.delivery.queue.len())
    }

    /// Whether delivery on output `pin` stopped after a refused sample.
    pub fn is_done(&self, pin: PinId) -> Result<bool> {
        Ok(self.shared.lock()?.pin(pin)?.delivery.done)
    }
}

impl<T> std::fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.shared.name)
            .field("id", &self.shared.id)
            .finish()
    }
}
