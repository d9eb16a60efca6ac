// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Planar 4:2:0 picture layout and repacking.
//!
//! Pictures travel between filters tightly packed: the luma plane, then two
//! chroma planes of `ceil(w/2) x ceil(h/2)` bytes each. I420 stores U before
//! V, YV12 stores V before U. Codecs always see I420.

use pinflow::{Error, Result, Subtype, codec::DecodedPicture};

/// Plane geometry of a tightly packed 4:2:0 picture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanarLayout {
    pub width: usize,
    pub height: usize,
    pub chroma_width: usize,
    pub chroma_height: usize,
}

impl PlanarLayout {
    pub fn new(width: u32, height: u32) -> Self {
        let width = width as usize;
        let height = height as usize;
        Self {
            width,
            height,
            chroma_width: width.div_ceil(2),
            chroma_height: height.div_ceil(2),
        }
    }

    pub fn luma_size(&self) -> usize {
        self.width * self.height
    }

    pub fn chroma_size(&self) -> usize {
        self.chroma_width * self.chroma_height
    }

    pub fn total_size(&self) -> usize {
        self.luma_size() + 2 * self.chroma_size()
    }

    /// Byte offsets of the U and V planes for `subtype`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] unless `subtype` is I420 or YV12.
    pub fn chroma_offsets(&self, subtype: Subtype) -> Result<(usize, usize)> {
        let first = self.luma_size();
        let second = first + self.chroma_size();
        match subtype {
            Subtype::I420 => Ok((first, second)),
            Subtype::Yv12 => Ok((second, first)),
            other => Err(Error::InvalidArg(format!("{other:?} is not planar 4:2:0"))),
        }
    }

    fn check_len(&self, len: usize, what: &str) -> Result<()> {
        if len < self.total_size() {
            return Err(Error::InvalidArg(format!(
                "{what} holds {len} bytes, {}x{} picture needs {}",
                self.width,
                self.height,
                self.total_size()
            )));
        }
        Ok(())
    }
}

/// Rewrites a tight `from` picture as a tight `to` picture.
///
/// I420 and YV12 differ only in chroma plane order, so this is a copy with
/// the chroma planes optionally swapped. Returns the bytes written.
///
/// # Errors
///
/// Returns [`Error::InvalidArg`] for non-planar subtypes or short buffers.
pub fn convert_planar(
    src: &[u8],
    from: Subtype,
    to: Subtype,
    layout: &PlanarLayout,
    dst: &mut [u8],
) -> Result<usize> {
    layout.check_len(src.len(), "source")?;
    layout.check_len(dst.len(), "destination")?;
    let (src_u, src_v) = layout.chroma_offsets(from)?;
    let (dst_u, dst_v) = layout.chroma_offsets(to)?;
    let luma = layout.luma_size();
    let chroma = layout.chroma_size();
    dst[..luma].copy_from_slice(&src[..luma]);
    dst[dst_u..dst_u + chroma].copy_from_slice(&src[src_u..src_u + chroma]);
    dst[dst_v..dst_v + chroma].copy_from_slice(&src[src_v..src_v + chroma]);
    Ok(layout.total_size())
}

/// Converts packed YUY2 (Y0 U Y1 V) to tight I420.
///
/// Luma is copied; each chroma sample averages the two source rows it
/// covers. `stride` is the source row pitch in bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidArg`] for odd dimensions or a short source.
pub fn yuy2_to_i420(
    src: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    dst: &mut Vec<u8>,
) -> Result<()> {
    if width % 2 != 0 || height % 2 != 0 {
        return Err(Error::InvalidArg(format!(
            "YUY2 needs even dimensions, got {width}x{height}"
        )));
    }
    let layout = PlanarLayout::new(width, height);
    if stride < layout.width * 2 || src.len() < stride * layout.height {
        return Err(Error::InvalidArg(format!(
            "YUY2 source of {} bytes too small for {}x{} with stride {}",
            src.len(),
            width,
            height,
            stride
        )));
    }

    dst.clear();
    dst.resize(layout.total_size(), 0);
    let (y_plane, chroma) = dst.split_at_mut(layout.luma_size());
    let (u_plane, v_plane) = chroma.split_at_mut(layout.chroma_size());

    for row in (0..layout.height).step_by(2) {
        let top = &src[row * stride..row * stride + layout.width * 2];
        let bottom = &src[(row + 1) * stride..(row + 1) * stride + layout.width * 2];
        let chroma_row = row / 2 * layout.chroma_width;
        for (pair, (t, b)) in top.chunks_exact(4).zip(bottom.chunks_exact(4)).enumerate() {
            let x = pair * 2;
            y_plane[row * layout.width + x] = t[0];
            y_plane[row * layout.width + x + 1] = t[2];
            y_plane[(row + 1) * layout.width + x] = b[0];
            y_plane[(row + 1) * layout.width + x + 1] = b[2];
            u_plane[chroma_row + pair] = ((t[1] as u16 + b[1] as u16) / 2) as u8;
            v_plane[chroma_row + pair] = ((t[3] as u16 + b[3] as u16) / 2) as u8;
        }
    }
    Ok(())
}

/// Packs a decoded picture with strided planes into a tight `subtype`
/// picture. Returns the bytes written.
///
/// # Errors
///
/// Returns [`Error::InvalidArg`] if a plane is shorter than its stride and
/// height imply, or [`Error::PoolExhausted`] if `dst` is too small.
pub fn pack_picture(picture: &DecodedPicture, subtype: Subtype, dst: &mut [u8]) -> Result<usize> {
    let layout = PlanarLayout::new(picture.width, picture.height);
    if dst.len() < layout.total_size() {
        return Err(Error::PoolExhausted);
    }
    let (u_offset, v_offset) = layout.chroma_offsets(subtype)?;
    let targets = [
        (0, layout.width, layout.height),
        (u_offset, layout.chroma_width, layout.chroma_height),
        (v_offset, layout.chroma_width, layout.chroma_height),
    ];
    for (plane, ((offset, width, height), stride)) in
        picture.planes.iter().zip(targets.into_iter().zip(picture.strides))
    {
        if stride < width || (height > 0 && plane.len() < stride * (height - 1) + width) {
            return Err(Error::InvalidArg(format!(
                "plane of {} bytes with stride {} cannot hold {}x{}",
                plane.len(),
                stride,
                width,
                height
            )));
        }
        for row in 0..height {
            let src = &plane[row * stride..row * stride + width];
            dst[offset + row * width..offset + (row + 1) * width].copy_from_slice(src);
        }
    }
    Ok(layout.total_size())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 4x2 I420 picture: Y = 0..8, U = [100, 101], V = [200, 201].
    fn i420_4x2() -> Vec<u8> {
        let mut picture: Vec<u8> = (0..8).collect();
        picture.extend([100, 101, 200, 201]);
        picture
    }

    #[test]
    fn layout_rounds_chroma_up() {
        let layout = PlanarLayout::new(5, 3);
        assert_eq!(layout.chroma_width, 3);
        assert_eq!(layout.chroma_height, 2);
        assert_eq!(layout.total_size(), 15 + 12);
        assert_eq!(layout.chroma_offsets(Subtype::Yv12).unwrap(), (21, 15));
        assert!(layout.chroma_offsets(Subtype::Rgb24).is_err());
    }

    #[test]
    fn i420_to_yv12_swaps_chroma() {
        let layout = PlanarLayout::new(4, 2);
        let mut out = vec![0; layout.total_size()];
        convert_planar(&i420_4x2(), Subtype::I420, Subtype::Yv12, &layout, &mut out).unwrap();
        assert_eq!(&out[8..], &[200, 201, 100, 101]);
        assert_eq!(&out[..8], &i420_4x2()[..8]);
    }

    #[test]
    fn yuy2_averages_rows() {
        // Row 0: Y0=1 U=10 Y1=2 V=20, Y0=3 U=30 Y1=4 V=40
        // Row 1: Y0=5 U=12 Y1=6 V=22, Y0=7 U=33 Y1=8 V=41
        let src = [1, 10, 2, 20, 3, 30, 4, 40, 5, 12, 6, 22, 7, 33, 8, 41];
        let mut out = Vec::new();
        yuy2_to_i420(&src, 4, 2, 8, &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 11, 31, 21, 40]);
    }

    #[test]
    fn yuy2_rejects_odd_or_short_input() {
        let mut out = Vec::new();
        assert!(yuy2_to_i420(&[0; 6], 3, 1, 6, &mut out).is_err());
        assert!(yuy2_to_i420(&[0; 8], 4, 2, 8, &mut out).is_err());
    }

    #[test]
    fn strided_planes_are_packed_tight() {
        let picture = DecodedPicture {
            width: 4,
            height: 2,
            planes: [
                vec![0, 1, 2, 3, 99, 99, 4, 5, 6, 7, 99, 99],
                vec![100, 101, 99, 99],
                vec![200, 201, 99, 99],
            ],
            strides: [6, 4, 4],
            pts: None,
        };
        let mut out = vec![0; 12];
        assert_eq!(pack_picture(&picture, Subtype::Yv12, &mut out).unwrap(), 12);
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5, 6, 7, 200, 201, 100, 101]);
        assert!(matches!(
            pack_picture(&picture, Subtype::I420, &mut [0; 11]),
            Err(Error::PoolExhausted)
        ));
    }
}
