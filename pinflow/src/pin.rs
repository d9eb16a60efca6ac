// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Pin identities and the consumer endpoint seen by upstream producers.
//!
//! Pins live in an arena owned by their filter and are addressed by
//! [`PinId`]. A producer holds its downstream peer as an
//! `Arc<dyn InputEndpoint>`; a consumer only records the upstream
//! [`PinKey`], so connections never form ownership cycles.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{FormatDescriptor, PendingQueue, Result, Sample, pool::BufferPool, pool::PoolRequest};

/// Index of a pin within its filter.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PinId(pub usize);

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Globally unique pin address: owning filter plus pin index.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PinKey {
    pub filter: Uuid,
    pub pin: PinId,
}

/// Data direction of a pin.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Consumer pin: receives samples from upstream.
    Input,
    /// Producer pin: delivers samples downstream.
    Output,
}

/// Declares one pin of a filter.
#[derive(Clone, Debug)]
pub struct PinTemplate {
    pub name: String,
    pub direction: Direction,
}

impl PinTemplate {
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Input,
        }
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Output,
        }
    }
}

/// Snapshot of a pin's public state.
#[derive(Clone, Debug)]
pub struct PinInfo {
    pub id: PinId,
    pub name: String,
    pub direction: Direction,
    pub format: Option<FormatDescriptor>,
    pub peer: Option<PinKey>,
}

impl PinInfo {
    pub fn is_connected(&self) -> bool {
        self.format.is_some()
    }
}

/// The consumer side of a connection, as called by the upstream producer.
///
/// Implementations must not require the caller to hold any filter lock; the
/// producer always releases its own lock before calling in.
pub trait InputEndpoint: Send + Sync {
    /// Address of this pin.
    fn key(&self) -> PinKey;

    /// Acceptance predicate; does not change connection state.
    fn query_accept(&self, format: &FormatDescriptor) -> Result<()>;

    /// Completes a connection initiated by `upstream` with `format`.
    fn receive_connection(&self, upstream: PinKey, format: &FormatDescriptor) -> Result<()>;

    /// Drops the connection. Called by the upstream producer.
    fn disconnect(&self) -> Result<()>;

    /// Allocator hints for the producer's pool.
    fn allocator_request(&self) -> PoolRequest {
        PoolRequest::default()
    }

    /// Pushes one sample.
    fn receive(&self, sample: Sample) -> Result<()>;

    /// Pushes samples in order, stopping at the first failure.
    ///
    /// Returns the number of samples accepted.
    fn receive_multiple(&self, samples: Vec<Sample>) -> Result<usize> {
        let mut accepted = 0;
        for sample in samples {
            self.receive(sample)?;
            accepted += 1;
        }
        Ok(accepted)
    }

    /// Whether [`InputEndpoint::receive`] may block the caller.
    fn receive_can_block(&self) -> bool {
        false
    }

    /// Signals that no more samples follow.
    fn end_of_stream(&self) -> Result<()>;

    /// Starts discarding data and unblocks any waits.
    fn begin_flush(&self) -> Result<()>;

    /// Ends a flush; the stream resumes with fresh state.
    fn end_flush(&self) -> Result<()>;
}

/// Peer reference held by a connected pin.
pub(crate) enum Peer {
    Downstream(Arc<dyn InputEndpoint>),
    Upstream(PinKey),
}

pub(crate) struct Connection {
    pub(crate) format: FormatDescriptor,
    pub(crate) peer: Peer,
}

/// Streaming flags of a consumer pin.
#[derive(Debug, Default)]
pub(crate) struct StreamFlags {
    pub(crate) flushing: bool,
    pub(crate) end_of_stream: bool,
    /// Set after a fatal codec failure; cleared by a flush or restart.
    pub(crate) halted: bool,
}

/// Delivery state of a producer pin.
#[derive(Default)]
pub(crate) struct Delivery {
    pub(crate) queue: PendingQueue,
    pub(crate) pool: Option<BufferPool>,
    pub(crate) flushing: bool,
    /// Downstream refused a sample; nothing more is delivered until a flush.
    pub(crate) done: bool,
    pub(crate) pump: Option<crate::task::SupervisedTask>,
    pub(crate) populator: Option<Arc<dyn crate::filter::Populate>>,
}

impl Delivery {
    pub(crate) fn reset(&mut self) {
        self.queue.clear();
        self.flushing = false;
        self.done = false;
    }
}

/// One entry of a filter's pin arena.
pub(crate) struct Pin {
    pub(crate) name: String,
    pub(crate) direction: Direction,
    pub(crate) connection: Option<Connection>,
    pub(crate) stream: StreamFlags,
    pub(crate) delivery: Delivery,
}

impl Pin {
    pub(crate) fn new(template: PinTemplate) -> Self {
        Self {
            name: template.name,
            direction: template.direction,
            connection: None,
            stream: StreamFlags::default(),
            delivery: Delivery::default(),
        }
    }

    pub(crate) fn format(&self) -> Option<&FormatDescriptor> {
        self.connection.as_ref().map(|c| &c.format)
    }

    pub(crate) fn peer_key(&self) -> Option<PinKey> {
        match self.connection.as_ref().map(|c| &c.peer) {
            Some(Peer::Downstream(peer)) => Some(peer.key()),
            Some(Peer::Upstream(key)) => Some(*key),
            None => None,
        }
    }

    pub(crate) fn downstream(&self) -> Option<Arc<dyn InputEndpoint>> {
        match self.connection.as_ref().map(|c| &c.peer) {
            Some(Peer::Downstream(peer)) => Some(peer.clone()),
            _ => None,
        }
    }
}
