//! Video Encoder Filter
//!
//! This module implements `VideoEncoder`, a one-in one-out filter that
//! compresses raw pictures into VP8 or VP9 through an external
//! [`pinflow::codec::VideoEncoderCodec`].
//!
//! ## Responsibilities
//! - Accepts I420, YV12 or YUY2 input with even dimensions; YV12 and YUY2
//!   are converted to I420 before encoding
//! - Forces a keyframe when the host asks for one, when the input sample is
//!   a discontinuity, or when its start time is at or before zero
//! - Packages codec packets into samples sized to the negotiated output
//!   buffer; the first sample after a start, flush or forced keyframe is
//!   flagged as a discontinuity
//! - Routes first-pass statistics to a side sink and drops first-pass frames
//! - Drains the codec at end-of-stream and restarts it on flush
//!
//! ## Settings (applied at the next start)
//! See [`EncoderConfig`]; every tuning knob is optional.
//!
//! ## Example
//! ```
//! use pinflow::Filter;
//! use pinflow_filters::{EncoderConfig, VideoEncoder, reference::IdentityVideoEncoder};
//!
//! # fn main() -> pinflow::Result<()> {
//! let config = EncoderConfig {
//!     keyframe_max_interval: Some(30),
//!     ..Default::default()
//! };
//! let encoder = VideoEncoder::vp8(IdentityVideoEncoder::new(&config)).with_config(config)?;
//! let encoder = Filter::new("encode", encoder);
//! encoder.with_impl(|e| e.force_keyframe())?;
//! # Ok(())
//! # }
//! ```

// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

/// Filter implementation (pins, staging, packaging, drain and flush)
mod imp;

/// Encoder settings and validation
mod state;


pub use imp::VideoEncoder;
pub use state::{EncoderConfig, EndUsage, KeyframeMode, MAX_QUANTIZER, PassMode};
