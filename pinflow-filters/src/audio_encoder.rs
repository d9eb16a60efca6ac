// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Float PCM to Vorbis encoder filter.
//!
//! An [`AudioEncoder`] collects interleaved float PCM into chunks of
//! `rate / 8` frames, splits each chunk into codec-ordered planes and hands
//! it to an [`AudioEncoderCodec`]. Packets are queued through an
//! [`EncodedFrameQueue`]; the codec's stream headers travel as codec private
//! data on the output format.

use pinflow::{
    AudioFormat, Error, FilterImpl, FormatDescriptor, FormatList, Outputs, PCM_CHUNK_DIVISOR,
    PendingQueue, PinId, PinTemplate, PoolProperties, Result, Sample, StreamContext, Subtype,
    channel_map::{deinterleave, read_f32_le},
    codec::{AudioEncoderCodec, CodecPacket, PlanarAudio},
    frame_queue::EncodedFrameQueue,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

/// Smallest output buffer, whatever the chunk size.
pub const MIN_PACKET_BUFFER: usize = 4096;

/// Rate control settings. Every field is optional; unset fields keep the
/// codec default.
///
/// # Examples
///
/// ```
/// use pinflow_filters::AudioEncoderConfig;
///
/// let config: AudioEncoderConfig = serde_json::from_str(r#"{ "quality": 0.4 }"#).unwrap();
/// assert_eq!(config.quality, Some(0.4));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AudioEncoderConfig {
    /// Variable bitrate quality, -0.1 (lowest) to 1.0 (highest).
    pub quality: Option<f32>,
    /// Bitrates in bits per second.
    pub min_bitrate: Option<u32>,
    pub nominal_bitrate: Option<u32>,
    pub max_bitrate: Option<u32>,
}

impl AudioEncoderConfig {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] for a quality outside -0.1..=1.0 or
    /// bitrates that are not ordered min <= nominal <= max.
    pub fn validate(&self) -> Result<()> {
        if let Some(quality) = self.quality {
            if !(-0.1..=1.0).contains(&quality) {
                return Err(Error::InvalidArg(format!(
                    "quality {quality} outside -0.1..=1.0"
                )));
            }
        }
        let ordered = [self.min_bitrate, self.nominal_bitrate, self.max_bitrate]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        if ordered.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(Error::InvalidArg(format!(
                "bitrates must satisfy min <= nominal <= max: {:?}",
                (self.min_bitrate, self.nominal_bitrate, self.max_bitrate)
            )));
        }
        Ok(())
    }

    /// Parses a JSON settings document and validates it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

fn chunk_frames(rate: u32) -> usize {
    (rate as usize / PCM_CHUNK_DIVISOR).max(1)
}

/// Interleaved float PCM to Vorbis encoder.
pub struct AudioEncoder {
    codec: Box<dyn AudioEncoderCodec>,
    config: AudioEncoderConfig,
    frames: EncodedFrameQueue,
    input: Option<AudioFormat>,
    /// Interleaved samples waiting for a whole chunk, wire order
    pending: Vec<f32>,
    first_time: Option<i64>,
    /// Frames handed to the codec since `first_time`
    consumed: u64,
}

impl AudioEncoder {
    pub const INPUT: PinId = PinId(0);
    pub const OUTPUT: PinId = PinId(1);

    pub fn new(codec: impl AudioEncoderCodec + 'static) -> Self {
        Self {
            codec: Box::new(codec),
            config: AudioEncoderConfig::default(),
            frames: EncodedFrameQueue::default(),
            input: None,
            pending: Vec::new(),
            first_time: None,
            consumed: 0,
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] if `config` does not validate.
    pub fn with_config(mut self, config: AudioEncoderConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &AudioEncoderConfig {
        &self.config
    }

    fn reset_timeline(&mut self) {
        self.pending.clear();
        self.first_time = None;
        self.consumed = 0;
    }

    /// Encodes whole chunks of pending PCM, or everything when `drain` is set.
    fn encode_pending(&mut self, outputs: &mut Outputs<'_>, drain: bool) -> Result<()> {
        let format = self.input.clone().ok_or(Error::NotConnected)?;
        let channels = format.channels as usize;
        let chunk = chunk_frames(format.sample_rate) * channels;
        let mut packets = Vec::new();
        while self.pending.len() >= chunk || (drain && !self.pending.is_empty()) {
            let take = chunk.min(self.pending.len());
            let pcm = PlanarAudio {
                channels: deinterleave(&self.pending[..take], channels)?,
            };
            self.pending.drain(..take);
            let pts = self.first_time.unwrap_or(0) + format.frames_to_ticks(self.consumed);
            self.consumed += (take / channels) as u64;
            packets.extend(self.codec.encode(&pcm, pts)?);
        }
        self.package(packets, outputs)
    }

    fn package(&mut self, packets: Vec<CodecPacket>, outputs: &mut Outputs<'_>) -> Result<()> {
        if packets.is_empty() {
            return Ok(());
        }
        trace!("Packaging {} packets", packets.len());
        if outputs.is_connected(Self::OUTPUT) {
            self.frames
                .package_packets(packets, outputs.queue(Self::OUTPUT)?)?;
        } else {
            self.frames.package_packets(packets, &mut PendingQueue::new())?;
        }
        Ok(())
    }
}

impl FilterImpl for AudioEncoder {
    fn type_name(&self) -> &'static str {
        "audio-encoder"
    }

    fn pin_templates(&self) -> Vec<PinTemplate> {
        vec![PinTemplate::input("in"), PinTemplate::output("out")]
    }

    fn preferred_formats(&self, pin: PinId, upstream: Option<&FormatDescriptor>) -> FormatList {
        let Some(pcm) = upstream.and_then(FormatDescriptor::audio_details) else {
            return FormatList::new();
        };
        if pin != Self::OUTPUT {
            return FormatList::new();
        }
        let mut vorbis =
            FormatDescriptor::audio(Subtype::Vorbis, AudioFormat::float(pcm.channels, pcm.sample_rate));
        if let Some(headers) = self.codec.headers() {
            vorbis = vorbis.with_codec_private(headers);
        }
        vec![vorbis].into()
    }

    fn query_accept(
        &self,
        pin: PinId,
        format: &FormatDescriptor,
        upstream: Option<&FormatDescriptor>,
    ) -> Result<()> {
        if pin == Self::INPUT {
            return match format.audio_details() {
                Some(pcm)
                    if format.subtype == Subtype::PcmFloat
                        && pcm.bits_per_sample == 32
                        && pcm.channels > 0
                        && pcm.sample_rate > 0 =>
                {
                    Ok(())
                }
                _ => Err(Error::NoAcceptableFormat),
            };
        }
        match (
            format.audio_details(),
            upstream.and_then(FormatDescriptor::audio_details),
        ) {
            (Some(out), Some(pcm))
                if format.subtype == Subtype::Vorbis
                    && out.channels == pcm.channels
                    && out.sample_rate == pcm.sample_rate =>
            {
                Ok(())
            }
            _ => Err(Error::NoAcceptableFormat),
        }
    }

    fn pool_requirements(&self, _pin: PinId, format: &FormatDescriptor) -> PoolProperties {
        let chunk = format.audio_details().map_or(0, |audio| {
            chunk_frames(audio.sample_rate) * audio.channels as usize * 4
        });
        PoolProperties {
            buffer_count: 2,
            buffer_size: chunk.max(MIN_PACKET_BUFFER),
            alignment: 1,
            prefix: 0,
        }
    }

    fn start(&mut self, context: &StreamContext) -> Result<()> {
        self.config.validate()?;
        let input = context
            .format(Self::INPUT)
            .and_then(FormatDescriptor::audio_details)
            .cloned()
            .ok_or(Error::NotConnected)?;
        let frame_size = context.pool(Self::OUTPUT).map_or(0, |pool| pool.buffer_size);
        self.codec.restart()?;
        self.frames.reset(frame_size);
        info!(
            "Encoding {} channels at {} Hz ({:?})",
            input.channels, input.sample_rate, self.config
        );
        self.input = Some(input);
        self.reset_timeline();
        Ok(())
    }

    fn stop(&mut self) {
        self.input = None;
        self.pending.clear();
    }

    fn receive(&mut self, _pin: PinId, sample: Sample, outputs: &mut Outputs<'_>) -> Result<()> {
        let block_align = self
            .input
            .as_ref()
            .map(AudioFormat::block_align)
            .ok_or(Error::NotConnected)?;
        if sample.actual_len() % block_align != 0 {
            return Err(Error::InvalidArg(format!(
                "{} bytes is not a whole number of {}-byte frames",
                sample.actual_len(),
                block_align
            )));
        }
        if self.first_time.is_none() {
            self.first_time = Some(sample.time().map_or(0, |t| t.start));
        }
        if sample.flags().discontinuity {
            self.frames.request_discontinuity();
        }
        self.pending.extend(read_f32_le(sample.payload())?);
        self.encode_pending(outputs, false)
    }

    fn end_of_stream(&mut self, _pin: PinId, outputs: &mut Outputs<'_>) -> Result<()> {
        self.encode_pending(outputs, true)?;
        let tail = self.codec.finish()?;
        debug!("Codec finished with {} packets", tail.len());
        self.package(tail, outputs)
    }

    fn flush(&mut self) -> Result<()> {
        self.codec.restart()?;
        self.frames.request_discontinuity();
        self.reset_timeline();
        Ok(())
    }
}
