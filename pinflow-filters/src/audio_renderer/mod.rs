//! Audio Renderer
//!
//! This module implements `AudioRenderer`, an input-only filter that plays
//! interleaved PCM through an [`AudioDevice`].
//!
//! ## Responsibilities
//! - Accepts 32-bit float or 16-bit integer PCM
//! - Opens the device when the filter starts and stops it when the filter stops
//! - Starts playback on entering Running and pauses it on entering Paused
//! - Writes every received payload to the device from the receive path,
//!   which may block while the device buffer is full
//! - Reports frames played from the device cursor
//!
//! The device is a leaf collaborator rather than a pipeline stage:
//! [`MemoryDevice`] keeps everything in memory for tests and demos.
//!
//! ## Example
//! ```
//! use pinflow::{AudioFormat, Filter, FormatDescriptor, Graph, Sample, Subtype};
//! use pinflow_filters::{AppSource, AudioRenderer, MemoryDevice};
//!
//! # fn main() -> pinflow::Result<()> {
//! let pcm = FormatDescriptor::audio(Subtype::PcmFloat, AudioFormat::float(1, 8000));
//! let device = MemoryDevice::new();
//! let source = Filter::new("source", AppSource::new(vec![pcm]));
//! let renderer = Filter::new("render", AudioRenderer::new(device.clone()));
//!
//! let mut graph = Graph::new();
//! graph.add(&source);
//! graph.add(&renderer);
//! graph.connect(&source, AppSource::OUTPUT, &renderer, AudioRenderer::INPUT, None)?;
//! graph.run()?;
//! assert!(device.snapshot()?.playing);
//! graph.stop()?;
//! # Ok(())
//! # }
//! ```

// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

/// Device contract and the in-memory device
mod device;

/// Filter implementation (negotiation, state mapping, writes)
mod imp;

pub use device::{AudioDevice, MemoryDevice, MemoryState};
pub use imp::AudioRenderer;
