//! Color Converter Filter
//!
//! This module implements `ColorConverter`, a one-in one-out filter turning
//! packed RGB pictures into planar YUV for the video encoder.
//!
//! ## Responsibilities
//! - Accepts RGB24 or RGB32 input, top-down or bottom-up, with even dimensions
//! - Offers YV12 (preferred) and I420 output at the input resolution
//! - Converts with BT.601 integer math while delivering into the output pool
//! - Marks every output sample as a sync point and keeps the discontinuity flag
//!
//! ## Example
//! ```
//! use pinflow::{Filter, FormatDescriptor, Subtype, VideoFormat};
//! use pinflow_filters::{AppSource, ColorConverter};
//!
//! # fn main() -> pinflow::Result<()> {
//! let rgb = FormatDescriptor::video(Subtype::Rgb24, VideoFormat::new(320, 240));
//! let source = Filter::new("source", AppSource::new(vec![rgb]));
//! let converter = Filter::new("convert", ColorConverter::new());
//! let format = source.connect(
//!     AppSource::OUTPUT,
//!     converter.input(ColorConverter::INPUT)?,
//!     None,
//! )?;
//! assert_eq!(format.subtype, Subtype::Rgb24);
//! # Ok(())
//! # }
//! ```

// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

/// BT.601 conversion and the delivery populator
mod convert;

/// Filter implementation (pins, negotiation, queuing)
mod imp;

pub use imp::ColorConverter;
