// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Identity codecs.
//!
//! These implement the codec contracts without compressing anything: a
//! "compressed" video frame is the raw I420 picture, and an audio packet is
//! the planar f32 samples in little-endian byte order. They honour the
//! contract details the filters rely on (lagged output, draining, keyframe
//! forcing, first-pass statistics, stream headers), which makes them useful
//! for tests and demos.

use std::collections::VecDeque;

use pinflow::{
    Error, Result,
    channel_map::read_f32_le,
    codec::{
        AudioDecoderCodec, AudioEncoderCodec, CodecPacket, DecodedPicture, EncodeFlags,
        EncoderOutput, PlanarAudio, RawFrame, VideoDecoderCodec, VideoEncoderCodec,
    },
};
use tracing::trace;

use crate::{
    planar::PlanarLayout,
    video_encoder::{EncoderConfig, KeyframeMode, PassMode},
};

/// Magic prefix of the identity audio stream headers.
pub const AUDIO_HEADER_MAGIC: &[u8; 4] = b"PFA1";

/// Size of one first-pass statistics record.
pub const STATS_RECORD_SIZE: usize = 16;

/// Builds the identity audio stream headers for `channels` at `sample_rate`.
pub fn audio_headers(channels: u16, sample_rate: u32) -> Vec<u8> {
    let mut headers = AUDIO_HEADER_MAGIC.to_vec();
    headers.extend_from_slice(&channels.to_le_bytes());
    headers.extend_from_slice(&sample_rate.to_le_bytes());
    headers
}

/// Parses headers built by [`audio_headers`] into `(channels, sample_rate)`.
///
/// # Errors
///
/// Returns [`Error::Codec`] for anything else.
pub fn parse_audio_headers(headers: &[u8]) -> Result<(u16, u32)> {
    match headers {
        [m0, m1, m2, m3, c0, c1, r0, r1, r2, r3]
            if [*m0, *m1, *m2, *m3] == *AUDIO_HEADER_MAGIC =>
        {
            let channels = u16::from_le_bytes([*c0, *c1]);
            if channels == 0 {
                return Err(Error::Codec("stream headers declare zero channels".into()));
            }
            Ok((channels, u32::from_le_bytes([*r0, *r1, *r2, *r3])))
        }
        _ => Err(Error::Codec("unrecognised stream headers".into())),
    }
}

/// Video "encoder" whose frames are the raw I420 pictures.
///
/// Holds up to `lag_in_frames` frames before emitting, places keyframes
/// every `keyframe_max_interval` frames (unless keyframes are disabled),
/// and in first-pass mode emits one statistics record per frame instead.
#[derive(Debug)]
pub struct IdentityVideoEncoder {
    lag: usize,
    keyframe_interval: Option<u64>,
    first_pass: bool,
    held: VecDeque<CodecPacket>,
    since_keyframe: Option<u64>,
}

impl IdentityVideoEncoder {
    pub fn new(config: &EncoderConfig) -> Self {
        let keyframe_interval = match config.keyframe_mode {
            Some(KeyframeMode::Disabled) => None,
            _ => config.keyframe_max_interval.map(|n| u64::from(n.max(1))),
        };
        Self {
            lag: config.lag_in_frames.unwrap_or(0) as usize,
            keyframe_interval,
            first_pass: config.pass_mode == PassMode::FirstPass,
            held: VecDeque::new(),
            since_keyframe: None,
        }
    }

    fn is_keyframe(&mut self, forced: bool) -> bool {
        let due = match (self.since_keyframe, self.keyframe_interval) {
            (None, _) => true,
            (Some(n), Some(interval)) => n + 1 >= interval,
            (Some(_), None) => false,
        };
        let keyframe = forced || due;
        self.since_keyframe = Some(if keyframe {
            0
        } else {
            self.since_keyframe.map_or(0, |n| n + 1)
        });
        keyframe
    }
}

impl VideoEncoderCodec for IdentityVideoEncoder {
    fn encode(
        &mut self,
        frame: Option<&RawFrame<'_>>,
        flags: EncodeFlags,
    ) -> Result<Vec<EncoderOutput>> {
        let Some(frame) = frame else {
            trace!("Draining {} held frames", self.held.len());
            return Ok(self.held.drain(..).map(EncoderOutput::Frame).collect());
        };
        let layout = PlanarLayout::new(frame.width, frame.height);
        if frame.data.len() != layout.total_size() {
            return Err(Error::Codec(format!(
                "frame of {} bytes is not a {}x{} I420 picture",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }
        let keyframe = self.is_keyframe(flags.force_keyframe);

        if self.first_pass {
            let mut record = Vec::with_capacity(STATS_RECORD_SIZE);
            record.extend_from_slice(&frame.pts.to_le_bytes());
            record.extend_from_slice(&(frame.data.len() as u32).to_le_bytes());
            record.extend_from_slice(&u32::from(keyframe).to_le_bytes());
            return Ok(vec![EncoderOutput::Stats(record)]);
        }

        self.held.push_back(CodecPacket {
            data: frame.data.to_vec(),
            pts: frame.pts,
            duration: frame.duration,
            keyframe,
        });
        let mut out = Vec::new();
        while self.held.len() > self.lag {
            if let Some(packet) = self.held.pop_front() {
                out.push(EncoderOutput::Frame(packet));
            }
        }
        Ok(out)
    }

    fn restart(&mut self) -> Result<()> {
        self.held.clear();
        self.since_keyframe = None;
        Ok(())
    }
}

/// Video "decoder" for [`IdentityVideoEncoder`] streams.
///
/// Emits planes with rows padded to `stride_align` bytes, the way hardware
/// oriented decoders do, so consumers must repack.
#[derive(Debug)]
pub struct IdentityVideoDecoder {
    width: u32,
    height: u32,
    stride_align: usize,
}

impl IdentityVideoDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            stride_align: 16,
        }
    }

    pub fn with_stride_align(mut self, align: usize) -> Self {
        self.stride_align = align.max(1);
        self
    }

    fn padded_plane(&self, src: &[u8], width: usize, height: usize) -> (Vec<u8>, usize) {
        let stride = width.div_ceil(self.stride_align) * self.stride_align;
        let mut plane = vec![0; stride * height];
        for row in 0..height {
            plane[row * stride..row * stride + width]
                .copy_from_slice(&src[row * width..(row + 1) * width]);
        }
        (plane, stride)
    }
}

impl VideoDecoderCodec for IdentityVideoDecoder {
    fn decode(&mut self, data: &[u8], pts: Option<i64>) -> Result<Vec<DecodedPicture>> {
        let layout = PlanarLayout::new(self.width, self.height);
        if data.len() != layout.total_size() {
            return Err(Error::Codec(format!(
                "packet of {} bytes is not a {}x{} picture",
                data.len(),
                self.width,
                self.height
            )));
        }
        let (luma, chroma) = data.split_at(layout.luma_size());
        let (u, v) = chroma.split_at(layout.chroma_size());
        let (y_plane, y_stride) = self.padded_plane(luma, layout.width, layout.height);
        let (u_plane, u_stride) =
            self.padded_plane(u, layout.chroma_width, layout.chroma_height);
        let (v_plane, v_stride) =
            self.padded_plane(v, layout.chroma_width, layout.chroma_height);
        Ok(vec![DecodedPicture {
            width: self.width,
            height: self.height,
            planes: [y_plane, u_plane, v_plane],
            strides: [y_stride, u_stride, v_stride],
            pts,
        }])
    }

    fn flush(&mut self) -> Result<Vec<DecodedPicture>> {
        Ok(Vec::new())
    }

    fn restart(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Audio "encoder" producing planar f32 packets.
#[derive(Debug)]
pub struct IdentityAudioEncoder {
    channels: u16,
    sample_rate: u32,
}

impl IdentityAudioEncoder {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }
}

impl AudioEncoderCodec for IdentityAudioEncoder {
    fn encode(&mut self, pcm: &PlanarAudio, pts: i64) -> Result<Vec<CodecPacket>> {
        if pcm.channels.len() != self.channels as usize {
            return Err(Error::Codec(format!(
                "expected {} channels, got {}",
                self.channels,
                pcm.channels.len()
            )));
        }
        let frames = pcm.frames()?;
        if frames == 0 {
            return Ok(Vec::new());
        }
        let data = pcm
            .channels
            .iter()
            .flatten()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        let duration = (frames as i64 * 10_000_000) / i64::from(self.sample_rate.max(1));
        Ok(vec![CodecPacket {
            data,
            pts,
            duration: Some(duration),
            keyframe: true,
        }])
    }

    fn headers(&self) -> Option<Vec<u8>> {
        Some(audio_headers(self.channels, self.sample_rate))
    }

    fn finish(&mut self) -> Result<Vec<CodecPacket>> {
        Ok(Vec::new())
    }

    fn restart(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Audio "decoder" for [`IdentityAudioEncoder`] streams.
#[derive(Debug, Default)]
pub struct IdentityAudioDecoder {
    channels: Option<usize>,
}

impl IdentityAudioDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioDecoderCodec for IdentityAudioDecoder {
    fn configure(&mut self, codec_private: Option<&[u8]>) -> Result<()> {
        let headers =
            codec_private.ok_or_else(|| Error::Codec("stream headers are required".into()))?;
        let (channels, _rate) = parse_audio_headers(headers)?;
        self.channels = Some(channels as usize);
        Ok(())
    }

    fn decode(&mut self, data: &[u8]) -> Result<PlanarAudio> {
        let channels = self
            .channels
            .ok_or_else(|| Error::Codec("decoder is not configured".into()))?;
        let plane_bytes = data.len() / channels;
        if data.len() % (channels * 4) != 0 {
            return Err(Error::Codec(format!(
                "packet of {} bytes does not hold whole frames of {} channels",
                data.len(),
                channels
            )));
        }
        let planes = data
            .chunks_exact(plane_bytes.max(1))
            .take(channels)
            .map(read_f32_le)
            .collect::<Result<Vec<_>>>()?;
        if planes.is_empty() {
            return Ok(PlanarAudio::new(channels));
        }
        Ok(PlanarAudio { channels: planes })
    }

    fn restart(&mut self) -> Result<()> {
        Ok(())
    }
}
