// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Format descriptors and ranked format lists.
//!
//! A [`FormatDescriptor`] names the media kind, the subtype and a structured
//! payload describing the data layout (resolution and stride for video,
//! channels, rate and bit depth for audio). Pins advertise a
//! [`FormatList`] whose declaration order is the negotiation preference.
//!
//! Descriptors are plain serde structures so hosts can supply them as JSON:
//!
//! ```
//! use pinflow::{FormatDescriptor, Subtype};
//!
//! let json = r#"{
//!     "major": "video",
//!     "subtype": "I420",
//!     "details": { "kind": "video", "width": 320, "height": 240 }
//! }"#;
//! let format: FormatDescriptor = serde_json::from_str(json).unwrap();
//! assert_eq!(format.subtype, Subtype::I420);
//! assert_eq!(format.minimum_buffer_size(), Some(320 * 240 * 3 / 2));
//! ```

mod negotiate;

pub use negotiate::negotiate;

use serde::{Deserialize, Serialize};

/// Major media kind.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MajorType {
    Video,
    Audio,
}

/// Data layout within a major kind.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subtype {
    /// Planar 4:2:0, Y then U then V.
    #[serde(rename = "I420")]
    I420,
    /// Planar 4:2:0, Y then V then U.
    #[serde(rename = "YV12")]
    Yv12,
    /// Packed 4:2:2, Y0 U Y1 V.
    #[serde(rename = "YUY2")]
    Yuy2,
    /// Packed B G R, rows padded to four bytes.
    #[serde(rename = "RGB24")]
    Rgb24,
    /// Packed B G R X.
    #[serde(rename = "RGB32")]
    Rgb32,
    #[serde(rename = "VP8")]
    Vp8,
    #[serde(rename = "VP9")]
    Vp9,
    /// Interleaved 32-bit float PCM.
    #[serde(rename = "PCM_FLOAT")]
    PcmFloat,
    /// Interleaved signed 16-bit PCM.
    #[serde(rename = "PCM_S16")]
    PcmS16,
    #[serde(rename = "VORBIS")]
    Vorbis,
}

impl Subtype {
    /// The major kind this subtype belongs to.
    pub fn major(self) -> MajorType {
        match self {
            Subtype::PcmFloat | Subtype::PcmS16 | Subtype::Vorbis => MajorType::Audio,
            _ => MajorType::Video,
        }
    }

    /// Whether the subtype carries codec output rather than raw samples.
    pub fn is_compressed(self) -> bool {
        matches!(self, Subtype::Vp8 | Subtype::Vp9 | Subtype::Vorbis)
    }
}

/// Video layout payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// Row stride in bytes of the first plane. `None` means tightly packed
    /// (or four-byte padded rows for RGB24).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stride: Option<u32>,
    /// Rows are stored last row first (bitmap convention).
    #[serde(default)]
    pub bottom_up: bool,
    /// Nominal frame duration in 100 ns units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_duration: Option<i64>,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            stride: None,
            bottom_up: false,
            frame_duration: None,
        }
    }

    /// Sets the nominal frame duration in 100 ns units.
    pub fn with_frame_duration(mut self, duration: i64) -> Self {
        self.frame_duration = Some(duration);
        self
    }

    /// Size of a planar 4:2:0 picture with these dimensions.
    pub fn planar_420_size(&self) -> usize {
        planar_420_size(self.width as usize, self.height as usize)
    }

    /// Row stride in bytes for a packed subtype.
    pub fn packed_stride(&self, bytes_per_pixel: usize) -> usize {
        if let Some(stride) = self.stride {
            return stride as usize;
        }
        let row = self.width as usize * bytes_per_pixel;
        if bytes_per_pixel == 3 { (row + 3) & !3 } else { row }
    }
}

/// Audio layout payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Speaker position bit mask; `None` when unspecified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_mask: Option<u32>,
}

impl AudioFormat {
    /// Interleaved 32-bit float PCM.
    pub fn float(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample: 32,
            channel_mask: None,
        }
    }

    /// Bytes per interleaved sample frame.
    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// Converts a frame count into a duration in 100 ns units.
    pub fn frames_to_ticks(&self, frames: u64) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (frames as u128 * 10_000_000u128 / self.sample_rate as u128) as i64
    }
}

/// Structured payload of a [`FormatDescriptor`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FormatDetails {
    Video(VideoFormat),
    Audio(AudioFormat),
    None,
}

/// Describes one media data layout.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub major: MajorType,
    pub subtype: Subtype,
    pub details: FormatDetails,
    /// Out-of-band codec configuration (stream headers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_private: Option<Vec<u8>>,
}

impl FormatDescriptor {
    pub fn video(subtype: Subtype, video: VideoFormat) -> Self {
        Self {
            major: MajorType::Video,
            subtype,
            details: FormatDetails::Video(video),
            codec_private: None,
        }
    }

    pub fn audio(subtype: Subtype, audio: AudioFormat) -> Self {
        Self {
            major: MajorType::Audio,
            subtype,
            details: FormatDetails::Audio(audio),
            codec_private: None,
        }
    }

    /// A descriptor matching any layout of `subtype` (used as a wildcard
    /// entry in preference lists).
    pub fn any(subtype: Subtype) -> Self {
        Self {
            major: subtype.major(),
            subtype,
            details: FormatDetails::None,
            codec_private: None,
        }
    }

    pub fn with_codec_private(mut self, data: Vec<u8>) -> Self {
        self.codec_private = Some(data);
        self
    }

    pub fn video_details(&self) -> Option<&VideoFormat> {
        match &self.details {
            FormatDetails::Video(video) => Some(video),
            _ => None,
        }
    }

    pub fn audio_details(&self) -> Option<&AudioFormat> {
        match &self.details {
            FormatDetails::Audio(audio) => Some(audio),
            _ => None,
        }
    }

    /// Smallest buffer able to hold one sample of this format, if the
    /// payload carries enough information to compute it.
    pub fn minimum_buffer_size(&self) -> Option<usize> {
        match (&self.details, self.subtype) {
            (FormatDetails::Video(v), Subtype::I420 | Subtype::Yv12) => Some(v.planar_420_size()),
            (FormatDetails::Video(v), Subtype::Yuy2) => {
                Some(v.packed_stride(2) * v.height as usize)
            }
            (FormatDetails::Video(v), Subtype::Rgb24) => {
                Some(v.packed_stride(3) * v.height as usize)
            }
            (FormatDetails::Video(v), Subtype::Rgb32) => {
                Some(v.packed_stride(4) * v.height as usize)
            }
            (FormatDetails::Video(v), Subtype::Vp8 | Subtype::Vp9) => {
                let w = align16(v.width as usize);
                let h = align16(v.height as usize);
                Some(planar_420_size(w, h))
            }
            (FormatDetails::Audio(a), Subtype::PcmFloat | Subtype::PcmS16) => {
                let frames = (a.sample_rate as usize / PCM_CHUNK_DIVISOR).max(1);
                Some(frames * a.block_align())
            }
            _ => None,
        }
    }

    /// Loose compatibility check: same subtype, and equal payloads unless
    /// either side leaves the payload unspecified.
    pub fn is_compatible(&self, other: &FormatDescriptor) -> bool {
        if self.major != other.major || self.subtype != other.subtype {
            return false;
        }
        match (&self.details, &other.details) {
            (FormatDetails::None, _) | (_, FormatDetails::None) => true,
            (FormatDetails::Video(a), FormatDetails::Video(b)) => {
                a.width == b.width && a.height == b.height
            }
            (FormatDetails::Audio(a), FormatDetails::Audio(b)) => {
                a.channels == b.channels
                    && a.sample_rate == b.sample_rate
                    && a.bits_per_sample == b.bits_per_sample
            }
            _ => false,
        }
    }
}

/// PCM output is produced in chunks of `sample_rate / PCM_CHUNK_DIVISOR` frames.
pub const PCM_CHUNK_DIVISOR: usize = 8;

fn align16(n: usize) -> usize {
    (n + 15) & !15
}

fn planar_420_size(width: usize, height: usize) -> usize {
    width * height + 2 * width.div_ceil(2) * height.div_ceil(2)
}

/// A ranked list of format descriptors.
///
/// The position of each entry is its preference index; earlier entries are
/// preferred. An empty list means the pin offers nothing yet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormatList {
    entries: Vec<FormatDescriptor>,
}

impl FormatList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a candidate at the lowest preference.
    pub fn push(&mut self, format: FormatDescriptor) {
        self.entries.push(format);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FormatDescriptor> {
        self.entries.get(index)
    }

    /// Iterates `(preference index, descriptor)` in preference order.
    pub fn ranked(&self) -> impl Iterator<Item = (usize, &FormatDescriptor)> {
        self.entries.iter().enumerate()
    }

    /// Whether any entry is compatible with `format`.
    pub fn accepts(&self, format: &FormatDescriptor) -> bool {
        self.entries.iter().any(|entry| entry.is_compatible(format))
    }
}

impl From<Vec<FormatDescriptor>> for FormatList {
    fn from(entries: Vec<FormatDescriptor>) -> Self {
        Self { entries }
    }
}

impl FromIterator<FormatDescriptor> for FormatList {
    fn from_iter<I: IntoIterator<Item = FormatDescriptor>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
