//! Audio Decoder Filter
//!
//! This module implements `AudioDecoder`, a one-in one-out filter turning
//! Vorbis packets into interleaved 32-bit float PCM through an external
//! [`pinflow::codec::AudioDecoderCodec`].
//!
//! ## Responsibilities
//! - Accepts Vorbis input whose format carries the stream headers as codec
//!   private data, and configures the codec from them at start
//! - Offers float PCM at the stream's channel count and rate, with the
//!   speaker mask for that channel count
//! - Reorders channels from codec order to wire order while interleaving
//! - Emits fixed chunks of `rate / 8` frames; whatever remains is emitted at
//!   end-of-stream
//! - Stamps chunks from the first timed input plus the number of frames
//!   emitted so far, so output timing has no gaps or overlaps
//!
//! ## Example
//! ```
//! use pinflow::{AudioFormat, Filter, FormatDescriptor, Subtype};
//! use pinflow_filters::{AppSource, AudioDecoder, reference};
//!
//! # fn main() -> pinflow::Result<()> {
//! let vorbis = FormatDescriptor::audio(Subtype::Vorbis, AudioFormat::float(2, 48000))
//!     .with_codec_private(reference::audio_headers(2, 48000));
//! let source = Filter::new("source", AppSource::new(vec![vorbis]));
//! let decoder = Filter::new("decode", AudioDecoder::new(reference::IdentityAudioDecoder::new()));
//! source.connect(AppSource::OUTPUT, decoder.input(AudioDecoder::INPUT)?, None)?;
//! # Ok(())
//! # }
//! ```

// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

/// Filter implementation (negotiation, chunking, timing)
mod imp;

pub use imp::{AudioDecoder, MIN_OUTPUT_BUFFERS};
