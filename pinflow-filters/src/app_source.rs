// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Host-fed source filter.
//!
//! An [`AppSource`] has one output pin and no inputs. The host offers a
//! ranked list of formats, connects the source like any other filter and
//! then feeds it through [`pinflow::Filter::push_output`],
//! [`pinflow::Filter::push_output_end_of_stream`] and the
//! `begin_flush`/`end_flush` pair.

use pinflow::{
    Error, FilterImpl, FormatDescriptor, FormatList, Outputs, PinId, PinTemplate, PoolProperties,
    Result, Sample,
};

/// Output-only filter whose samples come from the host.
#[derive(Clone, Debug)]
pub struct AppSource {
    formats: Vec<FormatDescriptor>,
    buffer_count: usize,
    buffer_size: Option<usize>,
}

impl AppSource {
    pub const OUTPUT: PinId = PinId(0);

    /// A source offering `formats` in preference order.
    pub fn new(formats: Vec<FormatDescriptor>) -> Self {
        Self {
            formats,
            buffer_count: 1,
            buffer_size: None,
        }
    }

    /// Minimum number of pool buffers to negotiate.
    pub fn with_buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count.max(1);
        self
    }

    /// Minimum buffer size, for formats that do not imply one.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }
}

impl FilterImpl for AppSource {
    fn type_name(&self) -> &'static str {
        "app-source"
    }

    fn pin_templates(&self) -> Vec<PinTemplate> {
        vec![PinTemplate::output("out")]
    }

    fn preferred_formats(&self, _pin: PinId, _upstream: Option<&FormatDescriptor>) -> FormatList {
        self.formats.iter().cloned().collect()
    }

    fn query_accept(
        &self,
        _pin: PinId,
        format: &FormatDescriptor,
        _upstream: Option<&FormatDescriptor>,
    ) -> Result<()> {
        if self.formats.iter().any(|offered| offered.is_compatible(format)) {
            Ok(())
        } else {
            Err(Error::NoAcceptableFormat)
        }
    }

    fn pool_requirements(&self, _pin: PinId, format: &FormatDescriptor) -> PoolProperties {
        let implied = format.minimum_buffer_size().unwrap_or(0);
        PoolProperties {
            buffer_count: self.buffer_count,
            buffer_size: implied.max(self.buffer_size.unwrap_or(0)),
            alignment: 1,
            prefix: 0,
        }
    }

    fn receive(&mut self, pin: PinId, _sample: Sample, _outputs: &mut Outputs<'_>) -> Result<()> {
        Err(Error::InvalidArg(format!("app-source has no input {pin}")))
    }
}
