// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Packaging of encoder output into pending samples.
//!
//! After each call into an encoder, its packets are copied in emission order
//! into samples sized to the negotiated buffer size and appended to the
//! output pin's [`PendingQueue`]. Statistics packets produced by a first
//! (analysis) pass go to a side sink instead. The first sample after a
//! connect, seek or forced keyframe is flagged as a discontinuity.

use std::io::Write;

use tracing::{trace, warn};

use crate::{
    Error, PendingQueue, Result, Sample, SampleFlags, SampleTime,
    codec::{CodecPacket, EncoderOutput},
};

/// Turns encoder packets into queued samples.
#[derive(Debug)]
pub struct EncodedFrameQueue {
    frame_size: usize,
    discontinuity: bool,
    frames_queued: u64,
}

impl Default for EncodedFrameQueue {
    fn default() -> Self {
        Self::new(0)
    }
}

impl EncodedFrameQueue {
    /// Creates a queue whose samples hold `frame_size` bytes. The first
    /// packaged sample is a discontinuity.
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            discontinuity: true,
            frames_queued: 0,
        }
    }

    /// Resizes samples to the negotiated buffer size and marks the next
    /// sample as a discontinuity.
    pub fn reset(&mut self, frame_size: usize) {
        self.frame_size = frame_size;
        self.discontinuity = true;
        self.frames_queued = 0;
    }

    /// Marks the next packaged sample as a discontinuity.
    pub fn request_discontinuity(&mut self) {
        self.discontinuity = true;
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Number of frame samples queued since the last reset.
    pub fn frames_queued(&self) -> u64 {
        self.frames_queued
    }

    /// Queues frame packets and routes statistics to `stats`.
    ///
    /// Returns the number of samples appended to `queue`.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolExhausted`] if a packet exceeds the negotiated size.
    /// - [`Error::RejectedEos`] if `queue` is already sealed.
    /// - [`Error::Io`] if the statistics sink fails.
    pub fn package(
        &mut self,
        outputs: Vec<EncoderOutput>,
        mut stats: Option<&mut (dyn Write + Send)>,
        queue: &mut PendingQueue,
    ) -> Result<usize> {
        let mut queued = 0;
        for output in outputs {
            match output {
                EncoderOutput::Frame(packet) => {
                    queue.push_sample(self.to_sample(packet)?)?;
                    queued += 1;
                }
                EncoderOutput::Stats(data) => match stats.as_deref_mut() {
                    Some(sink) => {
                        trace!("Writing {} bytes of first-pass statistics", data.len());
                        sink.write_all(&data)?;
                    }
                    None => warn!("Dropping {} bytes of statistics: no sink", data.len()),
                },
            }
        }
        Ok(queued)
    }

    /// Queues compressed packets that carry no side-channel data.
    ///
    /// # Errors
    ///
    /// As [`EncodedFrameQueue::package`].
    pub fn package_packets(
        &mut self,
        packets: Vec<CodecPacket>,
        queue: &mut PendingQueue,
    ) -> Result<usize> {
        self.package(
            packets.into_iter().map(EncoderOutput::Frame).collect(),
            None,
            queue,
        )
    }

    fn to_sample(&mut self, packet: CodecPacket) -> Result<Sample> {
        if packet.data.len() > self.frame_size {
            warn!(
                "Encoded packet of {} bytes exceeds negotiated buffer size {}",
                packet.data.len(),
                self.frame_size
            );
            return Err(Error::PoolExhausted);
        }
        let mut sample = Sample::with_capacity(self.frame_size)?;
        sample.fill_from(&packet.data)?;
        sample.set_time(Some(SampleTime::new(
            packet.pts,
            packet.duration.map(|duration| packet.pts + duration),
        )));
        sample.set_flags(SampleFlags {
            sync_point: packet.keyframe,
            preroll: false,
            discontinuity: std::mem::take(&mut self.discontinuity),
        });
        self.frames_queued += 1;
        Ok(sample)
    }
}
