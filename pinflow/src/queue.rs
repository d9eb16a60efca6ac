// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Pending queue of an asynchronous output pin.
//!
//! The queue holds samples waiting for delivery, optionally terminated by an
//! end-of-stream sentinel. Once the sentinel is appended the queue is sealed:
//! further appends fail with [`Error::RejectedEos`] and the sentinel stays
//! the last entry. The queue is only touched under the owning filter's lock.

use std::collections::VecDeque;

use crate::{Error, Result, Sample};

/// One queued entry.
#[derive(Debug)]
pub enum QueueEntry {
    Sample(Sample),
    EndOfStream,
}

/// Outcome of one pop attempt by a delivery loop.
#[derive(Debug)]
pub enum Pop {
    /// Deliver this sample downstream.
    Data(Sample),
    /// Forward end-of-stream downstream, then stop.
    EndOfStream,
    /// Nothing queued; release the lock and wait for a wake-up.
    Wait,
    /// Flushing or stopping; exit the loop now.
    Terminate,
}

/// FIFO of samples with an optional trailing end-of-stream sentinel.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: VecDeque<QueueEntry>,
    sealed: bool,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RejectedEos`] once the end-of-stream sentinel is queued.
    pub fn push_sample(&mut self, sample: Sample) -> Result<()> {
        if self.sealed {
            return Err(Error::RejectedEos);
        }
        self.entries.push_back(QueueEntry::Sample(sample));
        Ok(())
    }

    /// Appends the end-of-stream sentinel and seals the queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RejectedEos`] if the sentinel is already queued.
    pub fn push_end_of_stream(&mut self) -> Result<()> {
        if self.sealed {
            return Err(Error::RejectedEos);
        }
        self.entries.push_back(QueueEntry::EndOfStream);
        self.sealed = true;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Drops every queued sample but keeps the sentinel, if any.
    ///
    /// Returns the number of samples dropped.
    pub fn purge_samples(&mut self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| matches!(entry, QueueEntry::EndOfStream));
        before - self.entries.len()
    }

    /// Empties the queue and unseals it.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.sealed = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the end-of-stream sentinel has been queued.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Iterates queued entries front to back.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }
}
