//! # Frames
//!
//! The frame container handed to downstream consumers. Which memory backs a
//! frame is an explicit variant: nothing, a shared DRM-PRIME handle produced
//! by the decoder or the RGA filter, or a software image in host memory.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::drm::DrmPrime;
use crate::error::{Result, RkError};
use crate::format::PixelFormat;

// ============================================================================
// Colour metadata
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorRange {
    #[default]
    Unspecified,
    /// Studio swing (16-235)
    Limited,
    /// Full swing (0-255)
    Full,
}

impl ColorRange {
    /// MPP and the pipeline share the same numbering
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Limited,
            2 => Self::Full,
            _ => Self::Unspecified,
        }
    }
}

// ITU-T H.273 code points
pub const PRIMARIES_BT709: u32 = 1;
pub const PRIMARIES_UNSPECIFIED: u32 = 2;
pub const PRIMARIES_BT2020: u32 = 9;
pub const TRC_BT709: u32 = 1;
pub const TRC_UNSPECIFIED: u32 = 2;
pub const TRC_SMPTE2084: u32 = 16;
pub const TRC_ARIB_STD_B67: u32 = 18;
pub const SPACE_BT709: u32 = 1;
pub const SPACE_UNSPECIFIED: u32 = 2;
pub const SPACE_SMPTE170M: u32 = 6;
pub const SPACE_BT2020_NCL: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorMetadata {
    pub range: ColorRange,
    pub primaries: u32,
    pub trc: u32,
    pub space: u32,
}

impl Default for ColorMetadata {
    fn default() -> Self {
        Self {
            range: ColorRange::Unspecified,
            primaries: PRIMARIES_UNSPECIFIED,
            trc: TRC_UNSPECIFIED,
            space: SPACE_UNSPECIFIED,
        }
    }
}

impl ColorMetadata {
    pub fn is_hdr(&self) -> bool {
        self.trc == TRC_SMPTE2084 || self.trc == TRC_ARIB_STD_B67
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const UNKNOWN: Rational = Rational { num: 0, den: 1 };

    pub fn new(num: i64, den: i64) -> Self {
        Self { num, den }.reduced()
    }

    pub fn mul(self, other: Rational) -> Rational {
        Rational::new(self.num * other.num, self.den * other.den)
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    fn reduced(self) -> Self {
        fn gcd(a: i64, b: i64) -> i64 {
            if b == 0 { a.abs() } else { gcd(b, a % b) }
        }
        let g = gcd(self.num, self.den);
        if g == 0 {
            return Rational::UNKNOWN;
        }
        let sign = if self.den < 0 { -1 } else { 1 };
        Self { num: sign * self.num / g, den: sign * self.den / g }
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

// ============================================================================
// Hardware frame pool descriptor
// ============================================================================

/// Geometry shared by every frame coming out of one hardware pool.
/// Rebuilt on each decoder info change; frames keep their own reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HwFramesContext {
    pub format: PixelFormat,
    pub sw_format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl HwFramesContext {
    pub fn new(sw_format: PixelFormat, width: u32, height: u32) -> Self {
        Self { format: PixelFormat::DrmPrime, sw_format, width, height }
    }
}

// ============================================================================
// Software images
// ============================================================================

#[derive(Debug, Clone)]
pub struct SoftwarePlane {
    pub data: Bytes,
    pub linesize: usize,
}

#[derive(Debug, Clone)]
pub struct SoftwareImage {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<SoftwarePlane>,
}

impl SoftwareImage {
    /// Build an image from per-plane data, checking each plane holds enough rows.
    pub fn new(format: PixelFormat, width: u32, height: u32, planes: Vec<SoftwarePlane>) -> Result<Self> {
        let image = Self { format, width, height, planes };
        image.validate()?;
        Ok(image)
    }

    /// Check the planes against the format geometry. Fields are public, so
    /// consumers re-run this before reading plane data.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RkError::BufferGeometry(format!("empty {}x{} image", self.width, self.height)));
        }
        let expected = self.format.plane_sizes(self.width, self.height);
        if expected.is_empty() || expected.len() != self.planes.len() {
            return Err(RkError::BufferGeometry(format!(
                "{} expects {} planes, got {}",
                self.format,
                expected.len(),
                self.planes.len()
            )));
        }
        for (i, (plane, (row_bytes, rows))) in self.planes.iter().zip(expected.iter()).enumerate() {
            if plane.linesize < *row_bytes {
                return Err(RkError::BufferGeometry(format!(
                    "plane {} linesize {} below row size {}",
                    i, plane.linesize, row_bytes
                )));
            }
            let needed = plane
                .linesize
                .checked_mul(rows.saturating_sub(1))
                .and_then(|n| n.checked_add(*row_bytes))
                .ok_or_else(|| RkError::BufferGeometry(format!("plane {} size overflows", i)))?;
            if plane.data.len() < needed {
                return Err(RkError::BufferGeometry(format!(
                    "plane {} holds {} bytes, needs {}",
                    i,
                    plane.data.len(),
                    needed
                )));
            }
        }
        Ok(())
    }

    /// Tightly packed image filled with one byte value, mostly for tests and self-test
    pub fn filled(format: PixelFormat, width: u32, height: u32, value: u8) -> Result<Self> {
        let planes = format
            .plane_sizes(width, height)
            .into_iter()
            .map(|(row_bytes, rows)| SoftwarePlane {
                data: Bytes::from(vec![value; row_bytes * rows]),
                linesize: row_bytes,
            })
            .collect();
        Self::new(format, width, height, planes)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// What memory backs a frame
#[derive(Debug, Clone, Default)]
pub enum FrameBuffer {
    #[default]
    Empty,
    Drm(DrmPrime),
    Software(SoftwareImage),
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub pts: Option<i64>,
    pub color: ColorMetadata,
    pub interlaced: bool,
    pub top_field_first: bool,
    pub sample_aspect_ratio: Rational,
    pub buffer: FrameBuffer,
    pub hw_frames: Option<Arc<HwFramesContext>>,
}

impl Frame {
    pub fn empty() -> Self {
        Self {
            format: PixelFormat::DrmPrime,
            width: 0,
            height: 0,
            pts: None,
            color: ColorMetadata::default(),
            interlaced: false,
            top_field_first: false,
            sample_aspect_ratio: Rational::UNKNOWN,
            buffer: FrameBuffer::Empty,
            hw_frames: None,
        }
    }

    pub fn from_software(image: SoftwareImage) -> Self {
        Self {
            format: image.format,
            width: image.width,
            height: image.height,
            buffer: FrameBuffer::Software(image),
            ..Self::empty()
        }
    }

    pub fn drm(&self) -> Option<&DrmPrime> {
        match &self.buffer {
            FrameBuffer::Drm(prime) => Some(prime),
            _ => None,
        }
    }

    pub fn software(&self) -> Option<&SoftwareImage> {
        match &self.buffer {
            FrameBuffer::Software(image) => Some(image),
            _ => None,
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self.buffer, FrameBuffer::Drm(_))
    }

    /// Copy timing and colour properties, leaving geometry and buffer alone
    pub fn copy_props_from(&mut self, other: &Frame) {
        self.pts = other.pts;
        self.color = other.color;
        self.interlaced = other.interlaced;
        self.top_field_first = other.top_field_first;
        self.sample_aspect_ratio = other.sample_aspect_ratio;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_reduce() {
        assert_eq!(Rational::new(4, 8), Rational { num: 1, den: 2 });
        assert_eq!(Rational::new(3, -9), Rational { num: -1, den: 3 });
        assert_eq!(Rational::new(0, 0), Rational::UNKNOWN);
        assert_eq!(Rational::new(2, 3).mul(Rational::new(3, 4)), Rational::new(1, 2));
    }

    #[test]
    fn test_software_image_validation() {
        let img = SoftwareImage::filled(PixelFormat::Yuv420p, 63, 33, 7).unwrap();
        assert_eq!(img.planes.len(), 3);
        assert_eq!(img.planes[1].linesize, 32);
        assert_eq!(img.planes[1].data.len(), 32 * 17);

        let short = SoftwarePlane { data: Bytes::from(vec![0u8; 10]), linesize: 16 };
        assert!(SoftwareImage::new(PixelFormat::Gray8, 16, 16, vec![short]).is_err());
        assert!(SoftwareImage::filled(PixelFormat::DrmPrime, 16, 16, 0).is_err());
    }

    #[test]
    fn test_zero_sized_image_rejected() {
        assert!(matches!(
            SoftwareImage::filled(PixelFormat::Nv12, 16, 0, 0),
            Err(RkError::BufferGeometry(_))
        ));
        assert!(matches!(
            SoftwareImage::filled(PixelFormat::Rgba, 0, 16, 0),
            Err(RkError::BufferGeometry(_))
        ));
    }

    #[test]
    fn test_copy_props_keeps_buffer() {
        let mut src = Frame::empty();
        src.pts = Some(90);
        src.interlaced = true;
        src.color.range = ColorRange::Full;

        let img = SoftwareImage::filled(PixelFormat::Nv12, 4, 4, 0).unwrap();
        let mut dst = Frame::from_software(img);
        dst.copy_props_from(&src);
        assert_eq!(dst.pts, Some(90));
        assert!(dst.interlaced);
        assert_eq!(dst.color.range, ColorRange::Full);
        assert!(dst.software().is_some());
        assert_eq!(dst.width, 4);
    }
}
