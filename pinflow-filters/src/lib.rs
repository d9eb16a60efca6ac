//! Media filters for the pinflow pin protocol
//!
//! This crate provides concrete processing stages built on
//! [`pinflow::Filter`]: a host-fed source, a collecting sink, an RGB to
//! planar YUV converter, video and audio encoders and decoders, and an
//! audio renderer. Codecs and audio devices are external collaborators
//! reached through traits; [`reference`] ships identity implementations
//! used by the tests and the `transcode` demo.
//!
//! ## Filters
//! - **AppSource**: output-only; the host pushes samples, end-of-stream and flushes
//! - **CollectSink**: input-only; records everything it receives
//! - **ColorConverter**: RGB24/RGB32 to YV12/I420 (BT.601)
//! - **VideoEncoder**: I420/YV12/YUY2 to VP8/VP9 through a [`pinflow::codec::VideoEncoderCodec`]
//! - **VideoDecoder**: VP8/VP9 to I420/YV12 through a [`pinflow::codec::VideoDecoderCodec`]
//! - **AudioDecoder**: Vorbis to interleaved float PCM in wire channel order
//! - **AudioEncoder**: interleaved float PCM to Vorbis
//! - **AudioRenderer**: writes PCM to an [`audio_renderer::AudioDevice`]
//!
//! ## Pins
//! Every filter exposes its pin ids as associated constants (`INPUT`,
//! `OUTPUT`), in the order of its pin templates.
//!
//! ## Example
//! ```
//! use pinflow::{Filter, FormatDescriptor, Graph, Sample, Subtype, VideoFormat};
//! use pinflow_filters::{AppSource, CollectSink};
//!
//! # fn main() -> pinflow::Result<()> {
//! let format = FormatDescriptor::video(Subtype::I420, VideoFormat::new(4, 2));
//! let source = Filter::new("source", AppSource::new(vec![format]));
//! let sink = CollectSink::new();
//! let records = sink.handle();
//! let sink = Filter::new("sink", sink);
//!
//! let mut graph = Graph::new();
//! graph.add(&source);
//! graph.add(&sink);
//! graph.connect(&source, AppSource::OUTPUT, &sink, CollectSink::INPUT, None)?;
//! graph.run()?;
//!
//! source.push_output(AppSource::OUTPUT, Sample::from_vec(vec![0; 12]).with_time(0, Some(10)))?;
//! source.push_output_end_of_stream(AppSource::OUTPUT)?;
//! let collected = records.wait_for_end_of_stream(1, std::time::Duration::from_secs(5))?;
//! assert_eq!(collected.samples.len(), 1);
//! graph.stop()?;
//! # Ok(())
//! # }
//! ```

// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

/// Host-fed source filter
pub mod app_source;

/// Vorbis to float PCM decoder filter
pub mod audio_decoder;

/// Float PCM to Vorbis encoder filter
pub mod audio_encoder;

/// PCM renderer and the audio device contract
pub mod audio_renderer;

/// Sink that records what it receives
pub mod collect_sink;

/// RGB to planar YUV converter
pub mod color_convert;

/// Planar 4:2:0 picture helpers
pub mod planar;

/// Identity codecs implementing the codec contracts
pub mod reference;

/// VP8/VP9 decoder filter
pub mod video_decoder;

/// VP8/VP9 encoder filter
pub mod video_encoder;

pub use app_source::AppSource;
pub use audio_decoder::AudioDecoder;
pub use audio_encoder::{AudioEncoder, AudioEncoderConfig};
pub use audio_renderer::{AudioDevice, AudioRenderer, MemoryDevice};
pub use collect_sink::{CollectHandle, CollectSink, Collected, CollectedSample};
pub use color_convert::ColorConverter;
pub use video_decoder::VideoDecoder;
pub use video_encoder::{EncoderConfig, EndUsage, KeyframeMode, PassMode, VideoEncoder};
