//! RGB to Planar YUV Conversion
//!
//! Converts packed RGB24 (B, G, R) and RGB32 (B, G, R, X) pictures into
//! tightly packed YV12 or I420 using the BT.601 integer approximation:
//!
//! - Y = ((66R + 129G + 25B + 128) >> 8) + 16
//! - U = ((-38R - 74G + 112B + 128) >> 8) + 128
//! - V = ((112R - 94G - 18B + 128) >> 8) + 128
//!
//! Chroma is computed from the average colour of each 2x2 block. Bottom-up
//! sources (bitmap convention) are flipped so the output is top-down.

// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

use pinflow::{Error, FormatDescriptor, Populate, Result, Sample, Subtype};

use crate::planar::PlanarLayout;

/// Geometry of a packed RGB source picture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RgbLayout {
    pub width: usize,
    pub height: usize,
    pub bytes_per_pixel: usize,
    pub stride: usize,
    pub bottom_up: bool,
}

impl RgbLayout {
    /// Reads the layout from a connection format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] for non-RGB formats, missing video
    /// details, zero or odd dimensions, or a stride shorter than a row.
    pub fn from_format(format: &FormatDescriptor) -> Result<Self> {
        let bytes_per_pixel = match format.subtype {
            Subtype::Rgb24 => 3,
            Subtype::Rgb32 => 4,
            other => return Err(Error::InvalidArg(format!("{other:?} is not packed RGB"))),
        };
        let video = format
            .video_details()
            .ok_or_else(|| Error::InvalidArg("RGB format without video details".into()))?;
        if video.width == 0 || video.height == 0 || video.width % 2 != 0 || video.height % 2 != 0
        {
            return Err(Error::InvalidArg(format!(
                "conversion needs even non-zero dimensions, got {}x{}",
                video.width, video.height
            )));
        }
        let stride = video.packed_stride(bytes_per_pixel);
        if stride < video.width as usize * bytes_per_pixel {
            return Err(Error::InvalidArg(format!(
                "stride {} shorter than a row of {} pixels",
                stride, video.width
            )));
        }
        Ok(Self {
            width: video.width as usize,
            height: video.height as usize,
            bytes_per_pixel,
            stride,
            bottom_up: video.bottom_up,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.stride * self.height
    }

    /// Source bytes of output row `row` (top-down).
    fn row<'a>(&self, src: &'a [u8], row: usize) -> &'a [u8] {
        let stored = if self.bottom_up {
            self.height - 1 - row
        } else {
            row
        };
        &src[stored * self.stride..stored * self.stride + self.width * self.bytes_per_pixel]
    }
}

#[inline]
fn luma(r: i32, g: i32, b: i32) -> u8 {
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8
}

#[inline]
fn chroma_u(r: i32, g: i32, b: i32) -> u8 {
    (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8
}

#[inline]
fn chroma_v(r: i32, g: i32, b: i32) -> u8 {
    (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8
}

/// `(r, g, b)` of the pixel starting at `px`.
#[inline]
fn rgb(px: &[u8]) -> (i32, i32, i32) {
    (px[2] as i32, px[1] as i32, px[0] as i32)
}

/// Converts one picture into `dst` as `output` (I420 or YV12).
///
/// Returns the bytes written.
///
/// # Errors
///
/// - [`Error::InvalidArg`] if `src` is shorter than a frame or `output` is
///   not planar 4:2:0.
/// - [`Error::PoolExhausted`] if `dst` cannot hold the picture.
pub(crate) fn rgb_to_planar(
    src: &[u8],
    layout: &RgbLayout,
    output: Subtype,
    dst: &mut [u8],
) -> Result<usize> {
    if src.len() < layout.frame_size() {
        return Err(Error::InvalidArg(format!(
            "RGB frame holds {} bytes, expected {}",
            src.len(),
            layout.frame_size()
        )));
    }
    let planar = PlanarLayout::new(layout.width as u32, layout.height as u32);
    if dst.len() < planar.total_size() {
        return Err(Error::PoolExhausted);
    }
    let (u_offset, v_offset) = planar.chroma_offsets(output)?;
    let bpp = layout.bytes_per_pixel;

    for y in (0..layout.height).step_by(2) {
        let top = layout.row(src, y);
        let bottom = layout.row(src, y + 1);
        for x in (0..layout.width).step_by(2) {
            let mut sum = (0, 0, 0);
            for (row, line) in [(y, top), (y + 1, bottom)] {
                for col in [x, x + 1] {
                    let (r, g, b) = rgb(&line[col * bpp..]);
                    dst[row * layout.width + col] = luma(r, g, b);
                    sum = (sum.0 + r, sum.1 + g, sum.2 + b);
                }
            }
            let (r, g, b) = ((sum.0 + 2) >> 2, (sum.1 + 2) >> 2, (sum.2 + 2) >> 2);
            let chroma = y / 2 * planar.chroma_width + x / 2;
            dst[u_offset + chroma] = chroma_u(r, g, b);
            dst[v_offset + chroma] = chroma_v(r, g, b);
        }
    }
    Ok(planar.total_size())
}

/// Delivery step that converts queued RGB samples into pooled planar
/// buffers.
#[derive(Debug)]
pub(crate) struct ConvertPopulator {
    pub layout: RgbLayout,
    pub output: Subtype,
}

impl Populate for ConvertPopulator {
    fn populate(&self, source: &Sample, target: &mut Sample) -> Result<()> {
        let written = rgb_to_planar(source.payload(), &self.layout, self.output, target.buffer_mut())?;
        target.set_actual_len(written)?;
        target.copy_attributes_from(source);
        // Every converted picture is independently decodable.
        target.flags_mut().sync_point = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinflow::{SampleFlags, VideoFormat};

    fn layout(subtype: Subtype, bottom_up: bool) -> RgbLayout {
        let mut video = VideoFormat::new(2, 2);
        video.bottom_up = bottom_up;
        RgbLayout::from_format(&FormatDescriptor::video(subtype, video)).unwrap()
    }

    #[test]
    fn reference_colours() {
        assert_eq!(luma(0, 0, 0), 16);
        assert_eq!(luma(255, 255, 255), 235);
        assert_eq!(chroma_u(255, 255, 255), 128);
        assert_eq!(chroma_v(255, 255, 255), 128);
        assert_eq!(luma(255, 0, 0), 82);
        assert_eq!(chroma_u(255, 0, 0), 90);
        assert_eq!(chroma_v(255, 0, 0), 240);
    }

    #[test]
    fn rgb24_rows_are_padded() {
        let rgb = layout(Subtype::Rgb24, false);
        assert_eq!(rgb.stride, 8);
        assert_eq!(rgb.frame_size(), 16);
    }

    #[test]
    fn rejects_odd_dimensions() {
        let format = FormatDescriptor::video(Subtype::Rgb32, VideoFormat::new(3, 2));
        assert!(RgbLayout::from_format(&format).is_err());
        let yuv = FormatDescriptor::video(Subtype::I420, VideoFormat::new(2, 2));
        assert!(RgbLayout::from_format(&yuv).is_err());
    }

    #[test]
    fn red_over_white_bottom_up() {
        // Bottom-up RGB32: stored row 0 is the bottom (white), row 1 the top (red).
        let white = [255, 255, 255, 0];
        let red = [0, 0, 255, 0];
        let src: Vec<u8> = [white, white, red, red].concat();
        let mut dst = [0u8; 6];
        let written =
            rgb_to_planar(&src, &layout(Subtype::Rgb32, true), Subtype::Yv12, &mut dst).unwrap();
        assert_eq!(written, 6);
        assert_eq!(&dst[..4], &[82, 82, 235, 235]);
        // YV12: V before U. Average colour is (255, 128, 128).
        assert_eq!(dst[4], chroma_v(255, 128, 128));
        assert_eq!(dst[5], chroma_u(255, 128, 128));
    }

    #[test]
    fn populator_sets_sync_point_and_keeps_discontinuity() {
        let populator = ConvertPopulator {
            layout: layout(Subtype::Rgb24, false),
            output: Subtype::I420,
        };
        let source = Sample::from_vec(vec![0; 16])
            .with_time(5, Some(15))
            .with_flags(SampleFlags {
                discontinuity: true,
                ..SampleFlags::default()
            });
        let mut target = Sample::with_capacity(6).unwrap();
        populator.populate(&source, &mut target).unwrap();
        assert_eq!(target.payload(), &[16, 16, 16, 16, 128, 128]);
        assert!(target.flags().sync_point && target.flags().discontinuity);
        assert_eq!(target.time(), source.time());

        let mut small = Sample::with_capacity(5).unwrap();
        assert!(matches!(
            populator.populate(&source, &mut small),
            Err(Error::PoolExhausted)
        ));
    }
}
