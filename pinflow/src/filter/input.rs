// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::{
    Error, FormatDescriptor, Result, Sample,
    config::DeliveryMode,
    filter::{
        FilterImpl, FilterShared, FilterState, Outputs, Render,
        delivery::{Route, drain_sync},
        flush,
    },
    lockcheck,
    pin::{Connection, Direction, InputEndpoint, Peer, PinId, PinKey},
    pool::PoolRequest,
};

/// The consumer endpoint of one input pin, handed to upstream producers.
pub(crate) struct InputPinRef<T> {
    shared: Arc<FilterShared<T>>,
    pin: PinId,
}

impl<T: FilterImpl> InputPinRef<T> {
    pub(crate) fn new(shared: Arc<FilterShared<T>>, pin: PinId) -> Self {
        Self { shared, pin }
    }

    /// Hands `sample` to a lock-free renderer, then applies the same
    /// failure handling as a locked receive.
    fn render(&self, render: &dyn Render, sample: Sample) -> Result<()> {
        lockcheck::assert_not_held("Render::render");
        let result = render.render(sample);
        if let Err(err) = &result {
            if err.is_fatal() {
                self.shared
                    .lock()?
                    .fail_stream(self.shared.name(), self.pin, err);
                self.shared.wake();
            }
        }
        result
    }

    fn drain(&self, routes: Vec<(PinId, Route)>) -> Result<()> {
        for (pin, route) in routes {
            drain_sync(&self.shared, pin, &route)?;
        }
        Ok(())
    }
}

impl<T: FilterImpl> InputEndpoint for InputPinRef<T> {
    fn key(&self) -> PinKey {
        self.shared.key(self.pin)
    }

    fn query_accept(&self, format: &FormatDescriptor) -> Result<()> {
        let inner = self.shared.lock()?;
        inner.pin(self.pin)?;
        inner.imp.query_accept(self.pin, format, None)
    }

    fn receive_connection(&self, upstream: PinKey, format: &FormatDescriptor) -> Result<()> {
        let mut inner = self.shared.lock()?;
        inner.require_stopped("receive connection requires a stopped filter")?;
        let p = inner.pin(self.pin)?;
        if p.direction != Direction::Input {
            return Err(Error::InvalidArg(format!("{} is not an input pin", self.pin)));
        }
        if p.connection.is_some() {
            return Err(Error::AlreadyConnected);
        }
        if let Err(err) = inner.imp.query_accept(self.pin, format, None) {
            debug!("{}: refused {:?}: {}", self.shared.name(), format.subtype, err);
            return Err(Error::NoAcceptableFormat);
        }
        let p = inner.pin_mut(self.pin)?;
        p.connection = Some(Connection {
            format: format.clone(),
            peer: Peer::Upstream(upstream),
        });
        p.stream = Default::default();
        debug!(
            "{}: {} accepted connection from {:?}",
            self.shared.name(),
            self.pin,
            upstream
        );
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let peers = {
            let mut inner = self.shared.lock()?;
            inner.require_stopped("disconnect requires a stopped filter")?;
            let p = inner.pin_mut(self.pin)?;
            p.connection.take().ok_or(Error::NotConnected)?;
            p.stream = Default::default();
            inner.disconnect_outputs()
        };
        debug!("{}: {} disconnected by upstream", self.shared.name(), self.pin);
        for peer in peers {
            if let Err(err) = peer.disconnect() {
                warn!("{}: cascading disconnect failed: {}", self.shared.name(), err);
            }
        }
        Ok(())
    }

    fn allocator_request(&self) -> PoolRequest {
        match self.shared.lock() {
            Ok(inner) => inner.imp.allocator_request(self.pin),
            Err(err) => {
                warn!("{}: {}", self.shared.name(), err);
                PoolRequest::default()
            }
        }
    }

    fn receive(&self, sample: Sample) -> Result<()> {
        lockcheck::assert_not_held("InputEndpoint::receive");
        let (result, routes) = {
            let mut guard = self.shared.lock()?;
            let inner = &mut *guard;
            let p = inner.pin(self.pin)?;
            if p.connection.is_none() {
                return Err(Error::NotConnected);
            }
            if inner.state == FilterState::Stopped {
                return Err(Error::WrongState("filter is stopped"));
            }
            if p.stream.end_of_stream {
                return Err(Error::RejectedEos);
            }
            if p.stream.flushing {
                return Err(Error::RejectedFlushing);
            }
            if p.stream.halted {
                return Err(Error::DeliveryHalted);
            }
            let outputs: Vec<PinId> = inner.connected_outputs().collect();
            if !outputs.is_empty() && outputs.iter().all(|o| inner.pins[o.0].delivery.done) {
                return Err(Error::DeliveryHalted);
            }

            trace!("{}: received {:?} on {}", self.shared.name(), sample, self.pin);
            if let Some(render) = inner.imp.renderer(self.pin) {
                drop(guard);
                return self.render(render.as_ref(), sample);
            }
            let result = inner
                .imp
                .receive(self.pin, sample, &mut Outputs::new(&mut inner.pins));
            if let Err(err) = &result {
                if err.is_fatal() {
                    inner.fail_stream(self.shared.name(), self.pin, err);
                }
            }
            self.shared.wake();
            (result, inner.sync_routes(&self.shared.config))
        };
        self.drain(routes)?;
        result
    }

    fn receive_can_block(&self) -> bool {
        if self.shared.config.delivery == DeliveryMode::Synchronous {
            return true;
        }
        self.shared
            .lock()
            .is_ok_and(|inner| inner.imp.receive_can_block())
    }

    fn end_of_stream(&self) -> Result<()> {
        lockcheck::assert_not_held("InputEndpoint::end_of_stream");
        let (result, routes) = {
            let mut guard = self.shared.lock()?;
            let inner = &mut *guard;
            let p = inner.pin(self.pin)?;
            if p.connection.is_none() {
                return Err(Error::NotConnected);
            }
            if inner.state == FilterState::Stopped {
                return Err(Error::WrongState("filter is stopped"));
            }
            if p.stream.flushing {
                return Err(Error::RejectedFlushing);
            }
            if p.stream.end_of_stream {
                return Err(Error::RejectedEos);
            }
            let halted = p.stream.halted;
            inner.pin_mut(self.pin)?.stream.end_of_stream = true;

            let result = if halted {
                Ok(())
            } else {
                inner
                    .imp
                    .end_of_stream(self.pin, &mut Outputs::new(&mut inner.pins))
            };
            if let Err(err) = &result {
                error!("{}: draining at end-of-stream failed: {}", self.shared.name(), err);
            }
            inner.seal_outputs();
            debug!("{}: end-of-stream on {}", self.shared.name(), self.pin);
            self.shared.wake();
            (result, inner.sync_routes(&self.shared.config))
        };
        self.drain(routes)?;
        result
    }

    fn begin_flush(&self) -> Result<()> {
        flush::begin_flush(&self.shared, Some(self.pin))
    }

    fn end_flush(&self) -> Result<()> {
        flush::end_flush(&self.shared, Some(self.pin))
    }
}
