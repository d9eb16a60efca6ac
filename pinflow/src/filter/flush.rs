// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Flush coordination.
//!
//! Flushing runs top-down, then bottom-up. `begin_flush` raises the flags,
//! discards queued output, wakes the pumps, forwards the flush to every downstream peer and only then
//! joins the local pumps. `end_flush` joins any remaining pump, resets local
//! state, forwards the end of the flush downstream and finally restarts one
//! pump per asynchronous output if the filter is still active. A pump that
//! stays stuck downstream is never replaced; its output is marked done.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::{
    Error, Result,
    filter::{FilterImpl, FilterInner, FilterShared, FilterState},
    pin::{Direction, InputEndpoint, PinId},
    task::SupervisedTask,
};

fn check_input<T: FilterImpl>(
    inner: &FilterInner<T>,
    input: Option<PinId>,
) -> Result<()> {
    if let Some(pin) = input {
        let pin = inner.pin(pin)?;
        if pin.direction != Direction::Input {
            return Err(Error::InvalidArg("flush must enter through an input pin".into()));
        }
        if pin.connection.is_none() {
            return Err(Error::NotConnected);
        }
    }
    Ok(())
}

/// Pumps taken off their output pins, keyed by pin.
type Pumps = Vec<(PinId, SupervisedTask)>;

/// Joins `pumps`, returning the ones still running at the join timeout.
///
/// A pump that misses the deadline stays owned by its pin instead of being
/// detached, so no second pump is ever started next to it.
fn join_all<T: FilterImpl>(shared: &FilterShared<T>, pumps: Pumps) -> (Result<()>, Pumps) {
    let timeout = shared.config.join_timeout();
    let mut result = Ok(());
    let mut stuck = Vec::new();
    for (pin, pump) in pumps {
        let joined = if pump.wait_exit(timeout) {
            pump.join(timeout)
        } else {
            stuck.push((pin, pump));
            Err(Error::Timeout(format!("pump for {pin} did not stop within {timeout:?}")))
        };
        if let Err(err) = joined {
            error!("{}: pump did not stop during flush: {}", shared.name(), err);
            if result.is_ok() {
                result = Err(err);
            }
        }
    }
    (result, stuck)
}

/// Returns stuck pumps to their pins and marks those pins done. Queued
/// samples are dropped; a queued end-of-stream survives.
fn park<T: FilterImpl>(inner: &mut FilterInner<T>, stuck: Pumps) -> Result<()> {
    for (pin, pump) in stuck {
        let delivery = &mut inner.pin_mut(pin)?.delivery;
        delivery.queue.purge_samples();
        delivery.done = true;
        delivery.pump = Some(pump);
    }
    Ok(())
}

fn take_pumps<T: FilterImpl>(inner: &mut FilterInner<T>) -> Pumps {
    inner
        .pins
        .iter_mut()
        .enumerate()
        .filter_map(|(index, p)| p.delivery.pump.take().map(|pump| (PinId(index), pump)))
        .collect()
}

/// Starts a flush entering through `input` (or, for sources, through the
/// filter itself when `input` is `None`).
///
/// # Errors
///
/// [`Error::Timeout`] if a pump is still stuck downstream after the flush
/// was forwarded. Its pin is marked done and keeps the pump.
pub(crate) fn begin_flush<T: FilterImpl>(
    shared: &Arc<FilterShared<T>>,
    input: Option<PinId>,
) -> Result<()> {
    let (peers, pumps): (Vec<Arc<dyn InputEndpoint>>, Pumps) = {
        let mut inner = shared.lock()?;
        check_input(&inner, input)?;
        if let Some(pin) = input {
            inner.pin_mut(pin)?.stream.flushing = true;
        }
        let mut peers = Vec::new();
        for pin in inner.pins.iter_mut().filter(|p| p.direction == Direction::Output) {
            pin.delivery.flushing = true;
            pin.delivery.queue.clear();
            peers.extend(pin.downstream());
        }
        let pumps = take_pumps(&mut inner);
        shared.wake();
        debug!("{}: begin flush", shared.name());
        (peers, pumps)
    };

    for peer in &peers {
        if let Err(err) = peer.begin_flush() {
            warn!("{}: downstream begin flush failed: {}", shared.name(), err);
        }
    }
    let (result, stuck) = join_all(shared, pumps);
    if !stuck.is_empty() {
        park(&mut *shared.lock()?, stuck)?;
    }
    result
}

/// Ends a flush started by [`begin_flush`].
///
/// The end of the flush is always forwarded downstream and live outputs
/// get their pump back, even when a pump is stuck or the implementation
/// fails to discard its state; that failure is returned afterwards. A
/// fatal failure ends the stream the same way a failed receive does.
pub(crate) fn end_flush<T: FilterImpl>(
    shared: &Arc<FilterShared<T>>,
    input: Option<PinId>,
) -> Result<()> {
    let stale = {
        let mut inner = shared.lock()?;
        check_input(&inner, input)?;
        take_pumps(&mut inner)
    };
    let (joined, stuck) = join_all(shared, stale);

    let (peers, flushed): (Vec<Arc<dyn InputEndpoint>>, Result<()>) = {
        let mut inner = shared.lock()?;
        if let Some(pin) = input {
            inner.pin_mut(pin)?.stream = Default::default();
        }
        let mut peers = Vec::new();
        for pin in inner.pins.iter_mut().filter(|p| p.direction == Direction::Output) {
            pin.delivery.reset();
            peers.extend(pin.downstream());
        }
        park(&mut inner, stuck)?;
        let flushed = inner.imp.flush();
        match (&flushed, input) {
            (Err(err), Some(pin)) if err.is_fatal() => inner.fail_stream(shared.name(), pin, err),
            (Err(err), None) if err.is_fatal() => {
                error!("{}: flush failed: {}", shared.name(), err);
                inner.seal_outputs();
            }
            (Err(err), _) => warn!("{}: flush failed: {}", shared.name(), err),
            (Ok(()), _) => debug!("{}: end flush, local state clean", shared.name()),
        }
        (peers, flushed)
    };

    for peer in &peers {
        if let Err(err) = peer.end_flush() {
            warn!("{}: downstream end flush failed: {}", shared.name(), err);
        }
    }

    let mut inner = shared.lock()?;
    if inner.state != FilterState::Stopped {
        shared.start_pumps(&mut inner)?;
    }
    joined.and(flushed)
}
