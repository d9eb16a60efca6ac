// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use pinflow::{
    CopyPopulator, Error, FilterImpl, FormatDescriptor, FormatList, Outputs, PinId, PinTemplate,
    Populate, Result, Sample, StreamContext, Subtype, VideoFormat,
};
use tracing::{debug, trace};

use super::convert::{ConvertPopulator, RgbLayout};

/// Output subtypes in preference order.
const OUTPUT_SUBTYPES: [Subtype; 2] = [Subtype::Yv12, Subtype::I420];

/// RGB24/RGB32 to YV12/I420 converter.
///
/// Input samples are validated and queued as they arrive; the conversion
/// itself happens on the delivery path, straight into the pooled output
/// buffer.
#[derive(Debug, Default)]
pub struct ColorConverter {
    /// Layout of the connected input, captured at start
    input: Option<RgbLayout>,

    /// Converter for the connected output, captured at start
    populator: Option<Arc<ConvertPopulator>>,
}

impl ColorConverter {
    pub const INPUT: PinId = PinId(0);
    pub const OUTPUT: PinId = PinId(1);

    pub fn new() -> Self {
        Self::default()
    }
}

impl FilterImpl for ColorConverter {
    fn type_name(&self) -> &'static str {
        "color-converter"
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
            return RgbLayout::from_format(format)
                .map(|_| ())
                .map_err(|_| Error::NoAcceptableFormat);
        }
        let (Some(out), Some(input)) = (
            format.video_details(),
            upstream.and_then(FormatDescriptor::video_details),
        ) else {
            return Err(Error::NoAcceptableFormat);
        };
        if !OUTPUT_SUBTYPES.contains(&format.subtype)
            || out.width != input.width
            || out.height != input.height
            || out.bottom_up
        {
            return Err(Error::NoAcceptableFormat);
        }
        Ok(())
    }

    fn start(&mut self, context: &StreamContext) -> Result<()> {
        let input = context.format(Self::INPUT).ok_or(Error::NotConnected)?;
        let layout = RgbLayout::from_format(input)?;
        self.input = Some(layout);
        self.populator = context.format(Self::OUTPUT).map(|output| {
            debug!(
                "Converting {:?} {}x{} to {:?}",
                input.subtype, layout.width, layout.height, output.subtype
            );
            Arc::new(ConvertPopulator {
                layout,
                output: output.subtype,
            })
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.input = None;
        self.populator = None;
    }

    fn populator(&self, _pin: PinId, _context: &StreamContext) -> Arc<dyn Populate> {
        match &self.populator {
            Some(populator) => populator.clone(),
            None => Arc::new(CopyPopulator),
        }
    }

    fn receive(&mut self, _pin: PinId, sample: Sample, outputs: &mut Outputs<'_>) -> Result<()> {
        let layout = self.input.ok_or(Error::NotConnected)?;
        if sample.actual_len() < layout.frame_size() {
            return Err(Error::InvalidArg(format!(
                "RGB sample of {} bytes, frame needs {}",
                sample.actual_len(),
                layout.frame_size()
            )));
        }
        if !outputs.is_connected(Self::OUTPUT) {
            trace!("Output not connected, dropping sample");
            return Ok(());
        }
        outputs.push(Self::OUTPUT, sample)
    }
}
