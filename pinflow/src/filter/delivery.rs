// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Delivery of queued samples to the downstream peer.
//!
//! One delivery step pops an entry under the filter lock, then releases the
//! lock before acquiring a pooled buffer, populating it and pushing it
//! downstream. The asynchronous pump repeats steps on its own thread and
//! blocks on the filter's wake event when the queue is empty; synchronous
//! delivery runs steps on the caller's thread until the queue is empty.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::{
    Error, Pop, Result, Sample,
    filter::{FilterImpl, FilterShared},
    lockcheck,
    pin::{InputEndpoint, PinId},
    pool::BufferPool,
    task::SupervisedTask,
};

/// Copies or transforms a queued sample into a pooled buffer.
pub trait Populate: Send + Sync {
    /// Fills `target` from `source`, including timing and flags.
    fn populate(&self, source: &Sample, target: &mut Sample) -> Result<()>;
}

/// Copies payload, timing and flags unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct CopyPopulator;

impl Populate for CopyPopulator {
    fn populate(&self, source: &Sample, target: &mut Sample) -> Result<()> {
        target.fill_from(source.payload())?;
        target.copy_attributes_from(source);
        Ok(())
    }
}

/// Everything a delivery step needs besides the filter itself.
#[derive(Clone)]
pub(crate) struct Route {
    pub(crate) peer: Arc<dyn InputEndpoint>,
    pub(crate) pool: BufferPool,
    pub(crate) populator: Arc<dyn Populate>,
}

/// Result of one delivery step.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// A sample was handled (delivered or dropped); try again.
    Delivered,
    /// The queue is empty (non-blocking steps only).
    Idle,
    /// End-of-stream forwarded, or the pin is flushing or stopping.
    Finished,
}

/// Runs one delivery step for output `pin`.
///
/// With `block`, an empty queue waits on the wake event instead of
/// returning [`Step::Idle`].
pub(crate) fn deliver_next<T: FilterImpl>(
    shared: &FilterShared<T>,
    pin: PinId,
    route: &Route,
    block: bool,
) -> Result<Step> {
    let pop = {
        let mut inner = shared.lock()?;
        loop {
            match inner.pop(pin) {
                Pop::Wait if block => inner = inner.wait()?,
                other => break other,
            }
        }
    };

    match pop {
        Pop::Terminate => Ok(Step::Finished),
        Pop::Wait => Ok(Step::Idle),
        Pop::EndOfStream => {
            lockcheck::assert_not_held("InputEndpoint::end_of_stream");
            debug!("{}: delivering end-of-stream from {}", shared.name(), pin);
            if let Err(err) = route.peer.end_of_stream() {
                warn!("{}: downstream refused end-of-stream: {}", shared.name(), err);
            }
            Ok(Step::Finished)
        }
        Pop::Data(source) => {
            let mut target = match route.pool.acquire() {
                Ok(target) => target,
                Err(Error::NotCommitted) => {
                    debug!("{}: pool decommitted, leaving delivery loop", shared.name());
                    return Ok(Step::Finished);
                }
                Err(err) => {
                    halt(shared, pin, &err)?;
                    return Ok(Step::Delivered);
                }
            };
            let populated = route.populator.populate(&source, &mut target);
            drop(source);
            let pushed = populated.and_then(|()| {
                lockcheck::assert_not_held("InputEndpoint::receive");
                trace!("{}: delivering {:?}", shared.name(), target);
                route.peer.receive(target)
            });
            if let Err(err) = pushed {
                halt(shared, pin, &err)?;
            }
            Ok(Step::Delivered)
        }
    }
}

/// Marks output `pin` done after a failed delivery.
///
/// Queued samples are dropped; a queued end-of-stream sentinel survives so
/// downstream still sees the end of the stream.
fn halt<T: FilterImpl>(shared: &FilterShared<T>, pin: PinId, cause: &Error) -> Result<()> {
    let mut inner = shared.lock()?;
    let delivery = &mut inner.pin_mut(pin)?.delivery;
    let dropped = delivery.queue.purge_samples();
    if !delivery.done {
        warn!(
            "{}: delivery from {} halted ({}), dropped {} queued samples",
            shared.name(),
            pin,
            cause,
            dropped
        );
    }
    delivery.done = true;
    Ok(())
}

/// Body of an asynchronous pump thread.
fn pump_loop<T: FilterImpl>(shared: Arc<FilterShared<T>>, pin: PinId, route: Route) {
    loop {
        match deliver_next(&shared, pin, &route, true) {
            Ok(Step::Delivered | Step::Idle) => {}
            Ok(Step::Finished) => break,
            Err(err) => {
                error!("{}: pump for {} failed: {}", shared.name(), pin, err);
                break;
            }
        }
    }
    debug!("{}: pump for {} exiting", shared.name(), pin);
}

/// Spawns the pump thread of output `pin` unless one already exists.
pub(crate) fn spawn_pump<T: FilterImpl>(
    shared: &Arc<FilterShared<T>>,
    pin: PinId,
    route: Route,
) -> Result<SupervisedTask> {
    let thread_shared = shared.clone();
    SupervisedTask::spawn(format!("{}-pump-{}", shared.name(), pin.0), move || {
        pump_loop(thread_shared, pin, route)
    })
}

/// Drains output `pin` on the calling thread until its queue is empty.
pub(crate) fn drain_sync<T: FilterImpl>(
    shared: &FilterShared<T>,
    pin: PinId,
    route: &Route,
) -> Result<()> {
    while deliver_next(shared, pin, route, false)? == Step::Delivered {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_populator_copies_everything() {
        let source = Sample::from_vec(vec![1, 2, 3]).with_time(7, None);
        let mut target = Sample::with_capacity(8).unwrap();
        CopyPopulator.populate(&source, &mut target).unwrap();
        assert_eq!(target.payload(), &[1, 2, 3]);
        assert_eq!(target.time(), source.time());
    }

    #[test]
    fn copy_populator_rejects_small_target() {
        let source = Sample::from_vec(vec![0; 9]);
        let mut target = Sample::with_capacity(8).unwrap();
        assert!(matches!(
            CopyPopulator.populate(&source, &mut target),
            Err(Error::PoolExhausted)
        ));
    }
}
