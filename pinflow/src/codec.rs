// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Call/return contracts of the external codec collaborators.
//!
//! Filters only depend on these traits. Codec internals (bitstream syntax,
//! rate control, psychoacoustics) live behind them.

use crate::{Error, Result};

/// One compressed packet in emission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodecPacket {
    pub data: Vec<u8>,
    /// Presentation time in 100 ns units.
    pub pts: i64,
    pub duration: Option<i64>,
    pub keyframe: bool,
}

/// What a video encoder emits per call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncoderOutput {
    /// A compressed frame destined for the output pin.
    Frame(CodecPacket),
    /// First-pass analysis statistics destined for a side sink.
    Stats(Vec<u8>),
}

/// Per-call encoder controls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeFlags {
    pub force_keyframe: bool,
}

/// A raw picture in planar I420 layout handed to a video encoder.
#[derive(Clone, Copy, Debug)]
pub struct RawFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub pts: i64,
    pub duration: Option<i64>,
}

/// A decoded picture as three planes (Y, U, V) with their strides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedPicture {
    pub width: u32,
    pub height: u32,
    pub planes: [Vec<u8>; 3],
    pub strides: [usize; 3],
    pub pts: Option<i64>,
}

/// Planar audio in the codec's canonical channel order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanarAudio {
    pub channels: Vec<Vec<f32>>,
}

impl PlanarAudio {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: vec![Vec::new(); channels],
        }
    }

    /// Frames per channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] when channel planes differ in length.
    pub fn frames(&self) -> Result<usize> {
        let Some(first) = self.channels.first() else {
            return Ok(0);
        };
        if self.channels.iter().any(|plane| plane.len() != first.len()) {
            return Err(Error::InvalidArg("channel planes differ in length".into()));
        }
        Ok(first.len())
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(Vec::is_empty)
    }

    /// Appends `other`'s frames channel by channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] on a channel count mismatch.
    pub fn append(&mut self, other: PlanarAudio) -> Result<()> {
        if other.channels.len() != self.channels.len() {
            return Err(Error::InvalidArg(format!(
                "expected {} channels, got {}",
                self.channels.len(),
                other.channels.len()
            )));
        }
        for (plane, more) in self.channels.iter_mut().zip(other.channels) {
            plane.extend(more);
        }
        Ok(())
    }
}

/// Video compressor.
pub trait VideoEncoderCodec: Send {
    /// Encodes one frame, or drains buffered frames when `frame` is `None`.
    ///
    /// Returns zero or more outputs in emission order.
    fn encode(&mut self, frame: Option<&RawFrame<'_>>, flags: EncodeFlags)
    -> Result<Vec<EncoderOutput>>;

    /// Drops internal state after a seek or flush.
    fn restart(&mut self) -> Result<()>;
}

/// Video decompressor.
pub trait VideoDecoderCodec: Send {
    /// Decodes one packet into zero or more pictures.
    fn decode(&mut self, data: &[u8], pts: Option<i64>) -> Result<Vec<DecodedPicture>>;

    /// Returns pictures still buffered at end-of-stream.
    fn flush(&mut self) -> Result<Vec<DecodedPicture>>;

    fn restart(&mut self) -> Result<()>;
}

/// Audio decompressor.
pub trait AudioDecoderCodec: Send {
    /// Feeds out-of-band stream headers before the first packet.
    fn configure(&mut self, codec_private: Option<&[u8]>) -> Result<()>;

    /// Decodes one packet into planar audio (possibly empty).
    fn decode(&mut self, data: &[u8]) -> Result<PlanarAudio>;

    fn restart(&mut self) -> Result<()>;
}

/// Audio compressor.
pub trait AudioEncoderCodec: Send {
    /// Encodes planar audio starting at `pts` into zero or more packets.
    fn encode(&mut self, pcm: &PlanarAudio, pts: i64) -> Result<Vec<CodecPacket>>;

    /// Out-of-band stream headers advertised as codec private data.
    fn headers(&self) -> Option<Vec<u8>> {
        None
    }

    /// Returns packets still buffered at end-of-stream.
    fn finish(&mut self) -> Result<Vec<CodecPacket>>;

    fn restart(&mut self) -> Result<()>;
}
