// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Multi-channel reordering between codec order and wire order.
//!
//! Audio codecs keep channels in their own canonical order (front left,
//! centre, front right, ...), while interleaved wire PCM follows the speaker
//! mask order (front left, front right, centre, LFE, ...). A fixed table per
//! channel count maps between the two. Counts above eight pass through
//! unchanged.
//!
//! ```
//! use pinflow::channel_map::{deinterleave, interleave};
//!
//! // Three channels in codec order: L, C, R.
//! let planes = vec![vec![1.0f32], vec![2.0], vec![3.0]];
//! let wire = interleave(&planes, 0..1).unwrap();
//! assert_eq!(wire, vec![1.0, 3.0, 2.0]); // L, R, C
//! assert_eq!(deinterleave(&wire, 3).unwrap(), planes);
//! ```

use std::ops::Range;

use crate::{Error, Result};

/// Wire position `i` carries codec channel `DECODE_MAPS[n - 1][i]`.
const DECODE_MAPS: [&[usize]; 8] = [
    &[0],
    &[0, 1],
    &[0, 2, 1],
    &[0, 1, 2, 3],
    &[0, 2, 1, 3, 4],
    &[0, 2, 1, 5, 3, 4],
    &[0, 2, 1, 6, 5, 3, 4],
    &[0, 2, 1, 7, 5, 6, 3, 4],
];

pub const SPEAKER_FRONT_LEFT: u32 = 0x1;
pub const SPEAKER_FRONT_RIGHT: u32 = 0x2;
pub const SPEAKER_FRONT_CENTER: u32 = 0x4;
pub const SPEAKER_LOW_FREQUENCY: u32 = 0x8;
pub const SPEAKER_BACK_LEFT: u32 = 0x10;
pub const SPEAKER_BACK_RIGHT: u32 = 0x20;
pub const SPEAKER_BACK_CENTER: u32 = 0x100;
pub const SPEAKER_SIDE_LEFT: u32 = 0x200;
pub const SPEAKER_SIDE_RIGHT: u32 = 0x400;

/// Permutation between codec channel indices and wire channel indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelMap {
    channels: usize,
    table: Option<&'static [usize]>,
}

impl ChannelMap {
    /// Map for `channels` channels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] for zero channels.
    pub fn for_channels(channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidArg("channel count must be at least 1".into()));
        }
        Ok(Self {
            channels,
            table: DECODE_MAPS.get(channels - 1).copied(),
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Codec channel carried at wire position `wire`.
    pub fn codec_index(&self, wire: usize) -> usize {
        self.table.map_or(wire, |table| table[wire])
    }

    /// Wire position of codec channel `codec`.
    pub fn wire_index(&self, codec: usize) -> usize {
        self.table
            .and_then(|table| table.iter().position(|&c| c == codec))
            .unwrap_or(codec)
    }

    /// Whether the map is the identity.
    pub fn is_identity(&self) -> bool {
        (0..self.channels).all(|i| self.codec_index(i) == i)
    }
}

/// Interleaves `range` of codec-ordered planes into wire order.
///
/// The output holds `range.len() * planes.len()` values.
///
/// # Errors
///
/// Returns [`Error::InvalidArg`] for zero planes or a range outside any plane.
pub fn interleave(planes: &[Vec<f32>], range: Range<usize>) -> Result<Vec<f32>> {
    let map = ChannelMap::for_channels(planes.len())?;
    if range.start > range.end || planes.iter().any(|plane| plane.len() < range.end) {
        return Err(Error::InvalidArg(format!(
            "sample range {range:?} outside channel planes"
        )));
    }
    let channels = planes.len();
    let mut out = Vec::with_capacity(range.len() * channels);
    for frame in range {
        for wire in 0..channels {
            out.push(planes[map.codec_index(wire)][frame]);
        }
    }
    Ok(out)
}

/// Splits wire-ordered interleaved audio into codec-ordered planes.
///
/// This is the inverse of [`interleave`].
///
/// # Errors
///
/// Returns [`Error::InvalidArg`] for zero channels or a length that is not a
/// whole number of frames.
pub fn deinterleave(interleaved: &[f32], channels: usize) -> Result<Vec<Vec<f32>>> {
    let map = ChannelMap::for_channels(channels)?;
    if interleaved.len() % channels != 0 {
        return Err(Error::InvalidArg(format!(
            "{} samples is not a multiple of {} channels",
            interleaved.len(),
            channels
        )));
    }
    let frames = interleaved.len() / channels;
    let mut planes = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (wire, value) in frame.iter().enumerate() {
            planes[map.codec_index(wire)].push(*value);
        }
    }
    Ok(planes)
}

/// Speaker mask describing the wire layout for `channels` channels, or 0
/// when the layout is undefined.
pub fn channel_mask(channels: usize) -> u32 {
    const STEREO: u32 = SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT;
    const QUAD: u32 = STEREO | SPEAKER_BACK_LEFT | SPEAKER_BACK_RIGHT;
    match channels {
        1 => SPEAKER_FRONT_CENTER,
        2 => STEREO,
        3 => STEREO | SPEAKER_FRONT_CENTER,
        4 => QUAD,
        5 => QUAD | SPEAKER_FRONT_CENTER,
        6 => QUAD | SPEAKER_FRONT_CENTER | SPEAKER_LOW_FREQUENCY,
        7 => {
            STEREO
                | SPEAKER_FRONT_CENTER
                | SPEAKER_LOW_FREQUENCY
                | SPEAKER_BACK_CENTER
                | SPEAKER_SIDE_LEFT
                | SPEAKER_SIDE_RIGHT
        }
        8 => QUAD | SPEAKER_FRONT_CENTER | SPEAKER_LOW_FREQUENCY | SPEAKER_SIDE_LEFT | SPEAKER_SIDE_RIGHT,
        _ => 0,
    }
}

/// Encodes f32 samples as little-endian bytes into `dst`.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Returns [`Error::PoolExhausted`] if `dst` is too small.
pub fn write_f32_le(samples: &[f32], dst: &mut [u8]) -> Result<usize> {
    let needed = samples.len() * 4;
    if dst.len() < needed {
        return Err(Error::PoolExhausted);
    }
    for (chunk, value) in dst.chunks_exact_mut(4).zip(samples) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    Ok(needed)
}

/// Decodes little-endian f32 samples.
///
/// # Errors
///
/// Returns [`Error::InvalidArg`] if the length is not a multiple of four.
pub fn read_f32_le(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidArg(format!(
            "{} bytes is not a whole number of f32 samples",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Planes whose values encode (channel, frame) with awkward bit patterns.
    fn planes(channels: usize, frames: usize) -> Vec<Vec<f32>> {
        (0..channels)
            .map(|c| {
                (0..frames)
                    .map(|f| f32::from_bits(0x3f80_0000 ^ ((c as u32) << 16) ^ f as u32))
                    .collect()
            })
            .collect()
    }

    fn bits(planes: &[Vec<f32>]) -> Vec<Vec<u32>> {
        planes
            .iter()
            .map(|p| p.iter().map(|v| v.to_bits()).collect())
            .collect()
    }

    #[test]
    fn permutation_is_bijective_and_lossless() {
        for channels in 1..=10 {
            let source = planes(channels, 37);
            let wire = interleave(&source, 0..37).unwrap();
            assert_eq!(wire.len(), 37 * channels);
            let back = deinterleave(&wire, channels).unwrap();
            assert_eq!(bits(&back), bits(&source), "channels={channels}");

            let map = ChannelMap::for_channels(channels).unwrap();
            for wire in 0..channels {
                assert_eq!(map.wire_index(map.codec_index(wire)), wire);
            }
        }
    }

    #[test]
    fn six_channel_layout() {
        // Codec order: FL C FR BL BR LFE. Wire order: FL FR C LFE BL BR.
        let source: Vec<Vec<f32>> = (0..6).map(|c| vec![c as f32]).collect();
        let wire = interleave(&source, 0..1).unwrap();
        assert_eq!(wire, vec![0.0, 2.0, 1.0, 5.0, 3.0, 4.0]);
        assert_eq!(channel_mask(6), 0x3f);
    }

    #[test]
    fn beyond_eight_is_identity() {
        assert!(ChannelMap::for_channels(9).unwrap().is_identity());
        assert!(!ChannelMap::for_channels(3).unwrap().is_identity());
        assert_eq!(channel_mask(9), 0);
    }

    #[test]
    fn sub_range_only() {
        let source = planes(2, 10);
        let wire = interleave(&source, 4..6).unwrap();
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0].to_bits(), source[0][4].to_bits());
        assert_eq!(wire[3].to_bits(), source[1][5].to_bits());
    }

    #[test]
    fn contract_violations() {
        assert!(matches!(interleave(&[], 0..0), Err(Error::InvalidArg(_))));
        assert!(matches!(
            interleave(&planes(2, 3), 0..4),
            Err(Error::InvalidArg(_))
        ));
        assert!(matches!(deinterleave(&[0.0; 5], 2), Err(Error::InvalidArg(_))));
        assert!(matches!(deinterleave(&[], 0), Err(Error::InvalidArg(_))));
    }

    #[test]
    fn byte_conversion() {
        let values = [1.5f32, -0.25];
        let mut bytes = [0u8; 8];
        assert_eq!(write_f32_le(&values, &mut bytes).unwrap(), 8);
        assert_eq!(read_f32_le(&bytes).unwrap(), values);
        assert!(write_f32_le(&values, &mut [0u8; 7]).is_err());
    }
}
