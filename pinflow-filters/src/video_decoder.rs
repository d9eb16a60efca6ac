// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! VP8/VP9 decoder filter.
//!
//! A [`VideoDecoder`] hands each compressed sample to a
//! [`VideoDecoderCodec`] and repacks the decoded pictures, whose planes may
//! carry padded rows, into tight I420 or YV12 samples. Pictures without a
//! presentation time are stamped from the previous one plus the nominal
//! frame duration. Frames the codec still holds are collected at
//! end-of-stream.

use pinflow::{
    Error, FilterImpl, FormatDescriptor, FormatList, Outputs, PinId, PinTemplate, Result, Sample,
    SampleFlags, SampleTime, StreamContext, Subtype, VideoFormat,
    codec::{DecodedPicture, VideoDecoderCodec},
};
use tracing::{debug, info, trace, warn};

use crate::planar::{PlanarLayout, pack_picture};

/// Output subtypes in preference order.
const OUTPUT_SUBTYPES: [Subtype; 2] = [Subtype::I420, Subtype::Yv12];

/// Negotiated output picture, captured at start.
#[derive(Clone, Copy, Debug)]
struct OutputLayout {
    subtype: Subtype,
    width: u32,
    height: u32,
    frame_duration: Option<i64>,
}

/// Compressed video to planar 4:2:0 decoder.
pub struct VideoDecoder {
    codec: Box<dyn VideoDecoderCodec>,
    output: Option<OutputLayout>,
    /// Next sample is the first after a start or flush.
    discontinuity: bool,
    /// Time assumed for a picture without presentation time.
    next_start: i64,
}

impl VideoDecoder {
    pub const INPUT: PinId = PinId(0);
    pub const OUTPUT: PinId = PinId(1);

    /// A decoder accepting VP8 and VP9 input.
    pub fn new(codec: impl VideoDecoderCodec + 'static) -> Self {
        Self {
            codec: Box::new(codec),
            output: None,
            discontinuity: true,
            next_start: 0,
        }
    }

    /// Repacks decoded pictures and queues them on the output.
    fn emit(&mut self, pictures: Vec<DecodedPicture>, outputs: &mut Outputs<'_>) -> Result<()> {
        let layout = self.output.ok_or(Error::NotConnected)?;
        if !outputs.is_connected(Self::OUTPUT) {
            trace!("Output not connected, dropping {} pictures", pictures.len());
            return Ok(());
        }
        for picture in pictures {
            if picture.width != layout.width || picture.height != layout.height {
                return Err(Error::Codec(format!(
                    "decoded {}x{} picture on a {}x{} connection",
                    picture.width, picture.height, layout.width, layout.height
                )));
            }
            let size = PlanarLayout::new(layout.width, layout.height).total_size();
            let mut sample = Sample::with_capacity(size)?;
            let written = pack_picture(&picture, layout.subtype, sample.buffer_mut())?;
            sample.set_actual_len(written)?;

            let start = picture.pts.unwrap_or(self.next_start);
            let stop = layout.frame_duration.map(|duration| start + duration);
            self.next_start = stop.unwrap_or(start);
            sample.set_time(Some(SampleTime::new(start, stop)));
            sample.set_flags(SampleFlags {
                sync_point: true,
                preroll: false,
                discontinuity: std::mem::take(&mut self.discontinuity),
            });
            outputs.push(Self::OUTPUT, sample)?;
        }
        Ok(())
    }
}

impl FilterImpl for VideoDecoder {
    fn type_name(&self) -> &'static str {
        "video-decoder"
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
        OUTPUT_SUBTYPES
            .iter()
            .map(|subtype| {
                let mut out = VideoFormat::new(video.width, video.height);
                out.frame_duration = video.frame_duration;
                FormatDescriptor::video(*subtype, out)
            })
            .collect()
    }

    fn query_accept(
        &self,
        pin: PinId,
        format: &FormatDescriptor,
        upstream: Option<&FormatDescriptor>,
    ) -> Result<()> {
        if pin == Self::INPUT {
            return match (format.subtype, format.video_details()) {
                (Subtype::Vp8 | Subtype::Vp9, Some(video)) if video.width > 0 && video.height > 0 => {
                    Ok(())
                }
                _ => Err(Error::NoAcceptableFormat),
            };
        }
        match (
            format.video_details(),
            upstream.and_then(FormatDescriptor::video_details),
        ) {
            (Some(out), Some(input))
                if OUTPUT_SUBTYPES.contains(&format.subtype)
                    && out.width == input.width
                    && out.height == input.height
                    && out.stride.is_none()
                    && !out.bottom_up =>
            {
                Ok(())
            }
            _ => Err(Error::NoAcceptableFormat),
        }
    }

    fn start(&mut self, context: &StreamContext) -> Result<()> {
        let input = context.format(Self::INPUT).ok_or(Error::NotConnected)?;
        let video = input
            .video_details()
            .ok_or_else(|| Error::InvalidArg("compressed video format without details".into()))?;
        let subtype = context
            .format(Self::OUTPUT)
            .map_or(Subtype::I420, |output| output.subtype);
        self.codec.restart()?;
        self.output = Some(OutputLayout {
            subtype,
            width: video.width,
            height: video.height,
            frame_duration: video.frame_duration,
        });
        self.discontinuity = true;
        self.next_start = 0;
        info!(
            "Decoding {:?} {}x{} to {:?}",
            input.subtype, video.width, video.height, subtype
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.output = None;
    }

    fn receive(&mut self, _pin: PinId, sample: Sample, outputs: &mut Outputs<'_>) -> Result<()> {
        if sample.flags().discontinuity {
            self.discontinuity = true;
        }
        let pts = sample.time().map(|t| t.start);
        let pictures = self.codec.decode(sample.payload(), pts)?;
        trace!("Decoded {} pictures from {:?}", pictures.len(), sample);
        self.emit(pictures, outputs)
    }

    fn end_of_stream(&mut self, _pin: PinId, outputs: &mut Outputs<'_>) -> Result<()> {
        let pictures = self.codec.flush()?;
        debug!("Flushed {} pictures at end-of-stream", pictures.len());
        self.emit(pictures, outputs)
    }

    fn flush(&mut self) -> Result<()> {
        if let Err(err) = self.codec.restart() {
            warn!("Decoder restart after flush failed: {}", err);
            return Err(err);
        }
        self.discontinuity = true;
        self.next_start = 0;
        Ok(())
    }
}
