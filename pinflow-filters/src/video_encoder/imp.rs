// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use pinflow::{
    Error, FilterImpl, FormatDescriptor, FormatList, Outputs, PendingQueue, PinId, PinTemplate,
    Result, Sample, StreamContext, Subtype, VideoFormat,
    codec::{EncodeFlags, EncoderOutput, RawFrame, VideoEncoderCodec},
    frame_queue::EncodedFrameQueue,
};
use tracing::{debug, info, trace, warn};

use super::state::{EncoderConfig, PassMode};
use crate::planar::{PlanarLayout, convert_planar, yuy2_to_i420};

/// Input subtypes in preference order.
const INPUT_SUBTYPES: [Subtype; 3] = [Subtype::I420, Subtype::Yv12, Subtype::Yuy2];

/// Geometry of the connected raw input, captured at start.
#[derive(Clone, Copy, Debug)]
struct InputLayout {
    subtype: Subtype,
    width: u32,
    height: u32,
    frame_duration: Option<i64>,
}

impl InputLayout {
    fn from_format(format: &FormatDescriptor) -> Result<Self> {
        let video = format
            .video_details()
            .ok_or_else(|| Error::InvalidArg("raw video format without details".into()))?;
        Ok(Self {
            subtype: format.subtype,
            width: video.width,
            height: video.height,
            frame_duration: video.frame_duration,
        })
    }

    fn frame_size(&self) -> usize {
        match self.subtype {
            Subtype::Yuy2 => self.width as usize * 2 * self.height as usize,
            _ => PlanarLayout::new(self.width, self.height).total_size(),
        }
    }
}

/// Checks the raw input constraints shared by acceptance and start.
fn check_input(format: &FormatDescriptor) -> Result<()> {
    if !INPUT_SUBTYPES.contains(&format.subtype) {
        return Err(Error::NoAcceptableFormat);
    }
    let video = format.video_details().ok_or(Error::NoAcceptableFormat)?;
    if video.width == 0 || video.height == 0 || video.width % 2 != 0 || video.height % 2 != 0 {
        return Err(Error::NoAcceptableFormat);
    }
    let tight = match format.subtype {
        Subtype::Yuy2 => video.width * 2,
        _ => video.width,
    };
    if video.stride.is_some_and(|stride| stride != tight) {
        return Err(Error::NoAcceptableFormat);
    }
    Ok(())
}

/// VP8/VP9 video encoder filter.
///
/// Raw pictures arriving on the input are normalised to I420 and handed to
/// the codec; the packets it emits are packaged into samples sized to the
/// negotiated output buffer and queued for delivery.
pub struct VideoEncoder {
    /// External compressor
    codec: Box<dyn VideoEncoderCodec>,

    /// Compressed output subtype (VP8 or VP9)
    output: Subtype,

    /// User settings, validated at start
    config: EncoderConfig,

    /// Side sink for first-pass statistics
    stats: Option<Box<dyn Write + Send>>,

    /// Packaging of codec output into pending samples
    frames: EncodedFrameQueue,

    /// Connected input geometry (set at start)
    input: Option<InputLayout>,

    /// I420 staging buffer for non-I420 input
    scratch: Vec<u8>,

    /// Host requested a keyframe for the next frame
    force_keyframe: bool,

    /// Start time of the previous input frame
    last_start: i64,

    /// Start time assumed for an untimed input frame
    next_start: i64,
}

impl VideoEncoder {
    pub const INPUT: PinId = PinId(0);
    pub const OUTPUT: PinId = PinId(1);

    /// An encoder producing VP8 with default settings.
    pub fn vp8(codec: impl VideoEncoderCodec + 'static) -> Self {
        Self::with_output(Box::new(codec), Subtype::Vp8)
    }

    /// An encoder producing VP9 with default settings.
    pub fn vp9(codec: impl VideoEncoderCodec + 'static) -> Self {
        Self::with_output(Box::new(codec), Subtype::Vp9)
    }

    fn with_output(codec: Box<dyn VideoEncoderCodec>, output: Subtype) -> Self {
        Self {
            codec,
            output,
            config: EncoderConfig::default(),
            stats: None,
            frames: EncodedFrameQueue::default(),
            input: None,
            scratch: Vec::new(),
            force_keyframe: false,
            last_start: 0,
            next_start: 0,
        }
    }

    /// Builder form of [`VideoEncoder::set_config`].
    pub fn with_config(mut self, config: EncoderConfig) -> Result<Self> {
        self.set_config(config)?;
        Ok(self)
    }

    /// Directs first-pass statistics to `sink`.
    pub fn with_stats_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stats = Some(Box::new(sink));
        self
    }

    /// Replaces the settings. They take effect at the next start.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] if `config` does not validate.
    pub fn set_config(&mut self, config: EncoderConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Makes the next encoded frame a keyframe.
    pub fn force_keyframe(&mut self) {
        self.force_keyframe = true;
    }

    /// Normalises `payload` to I420 in the staging buffer, or borrows it
    /// directly when it already is I420.
    fn stage<'a>(
        scratch: &'a mut Vec<u8>,
        input: &InputLayout,
        payload: &'a [u8],
    ) -> Result<&'a [u8]> {
        let size = input.frame_size();
        if payload.len() < size {
            return Err(Error::InvalidArg(format!(
                "{:?} sample of {} bytes, frame needs {}",
                input.subtype,
                payload.len(),
                size
            )));
        }
        match input.subtype {
            Subtype::I420 => Ok(&payload[..size]),
            Subtype::Yv12 => {
                let layout = PlanarLayout::new(input.width, input.height);
                scratch.resize(layout.total_size(), 0);
                convert_planar(payload, Subtype::Yv12, Subtype::I420, &layout, scratch)?;
                Ok(scratch.as_slice())
            }
            Subtype::Yuy2 => {
                yuy2_to_i420(payload, input.width, input.height, input.width as usize * 2, scratch)?;
                Ok(scratch.as_slice())
            }
            other => Err(Error::InvalidArg(format!("{other:?} is not raw video input"))),
        }
    }

    /// Routes codec output: frames to the output queue, statistics to the
    /// stats sink. First-pass frames are dropped.
    fn package(&mut self, mut out: Vec<EncoderOutput>, outputs: &mut Outputs<'_>) -> Result<()> {
        let connected = outputs.is_connected(Self::OUTPUT);
        if self.config.pass_mode == PassMode::FirstPass || !connected {
            let before = out.len();
            out.retain(|o| matches!(o, EncoderOutput::Stats(_)));
            if before != out.len() {
                trace!("Dropped {} frame packets", before - out.len());
            }
        }
        let stats = self
            .stats
            .as_mut()
            .map(|sink| &mut **sink as &mut (dyn Write + Send));
        if connected {
            self.frames.package(out, stats, outputs.queue(Self::OUTPUT)?)?;
        } else {
            self.frames.package(out, stats, &mut PendingQueue::new())?;
        }
        Ok(())
    }
}

impl FilterImpl for VideoEncoder {
    fn type_name(&self) -> &'static str {
        "video-encoder"
    }

    fn pin_templates(&self) -> Vec<PinTemplate> {
        vec![PinTemplate::input("in"), PinTemplate::output("out")]
    }

    fn preferred_formats(&self, pin: PinId, upstream: Option<&FormatDescriptor>) -> FormatList {
        let Some(video) = upstream.and_then(FormatDescriptor::video_details) else {
            return FormatList::new();
        };
        if pin != Self::OUTPUT {
            return FormatList::new();
        }
        let mut out = VideoFormat::new(video.width, video.height);
        out.frame_duration = video.frame_duration;
        vec![FormatDescriptor::video(self.output, out)].into()
    }

    fn query_accept(
        &self,
        pin: PinId,
        format: &FormatDescriptor,
        upstream: Option<&FormatDescriptor>,
    ) -> Result<()> {
        if pin == Self::INPUT {
            return check_input(format);
        }
        match (
            format.video_details(),
            upstream.and_then(FormatDescriptor::video_details),
        ) {
            (Some(out), Some(input))
                if format.subtype == self.output
                    && out.width == input.width
                    && out.height == input.height =>
            {
                Ok(())
            }
            _ => Err(Error::NoAcceptableFormat),
        }
    }

    fn start(&mut self, context: &StreamContext) -> Result<()> {
        self.config.validate()?;
        let format = context.format(Self::INPUT).ok_or(Error::NotConnected)?;
        check_input(format).map_err(|_| Error::InvalidArg("unsupported input format".into()))?;
        let input = InputLayout::from_format(format)?;
        let frame_size = context.pool(Self::OUTPUT).map_or(0, |pool| pool.buffer_size);
        if self.config.pass_mode == PassMode::FirstPass && self.stats.is_none() {
            warn!("First pass without a statistics sink; statistics will be dropped");
        }
        self.codec.restart()?;
        self.frames.reset(frame_size);
        self.input = Some(input);
        self.force_keyframe = false;
        self.last_start = 0;
        self.next_start = 0;
        info!(
            "Encoding {:?} {}x{} as {:?} ({:?})",
            input.subtype, input.width, input.height, self.output, self.config.pass_mode
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.input = None;
    }

    fn receive(&mut self, _pin: PinId, sample: Sample, outputs: &mut Outputs<'_>) -> Result<()> {
        let input = self.input.ok_or(Error::NotConnected)?;
        let data = Self::stage(&mut self.scratch, &input, sample.payload())?;

        let time = sample.time();
        let start = time.map_or(self.next_start, |t| t.start);
        if start < self.last_start {
            warn!("Input time went backwards: {} after {}", start, self.last_start);
        }
        self.last_start = start;
        let duration = time.and_then(|t| t.duration()).or(input.frame_duration);
        self.next_start = start + duration.unwrap_or(0);

        let discontinuity = sample.flags().discontinuity;
        let host_forced = std::mem::take(&mut self.force_keyframe);
        if host_forced || discontinuity {
            self.frames.request_discontinuity();
        }
        let flags = EncodeFlags {
            force_keyframe: host_forced || discontinuity || start <= 0,
        };

        let frame = RawFrame {
            data,
            width: input.width,
            height: input.height,
            pts: start,
            duration,
        };
        trace!("Encoding frame at {} (force keyframe: {})", start, flags.force_keyframe);
        let out = self.codec.encode(Some(&frame), flags)?;
        self.package(out, outputs)
    }

    fn end_of_stream(&mut self, _pin: PinId, outputs: &mut Outputs<'_>) -> Result<()> {
        let out = self.codec.encode(None, EncodeFlags::default())?;
        debug!("Drained {} packets at end-of-stream", out.len());
        self.package(out, outputs)?;
        if let Some(sink) = self.stats.as_mut() {
            sink.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.codec.restart()?;
        self.frames.request_discontinuity();
        self.force_keyframe = false;
        self.last_start = 0;
        self.next_start = 0;
        Ok(())
    }
}
