//! # RGA - Rockchip 2D raster engine boundary
//!
//! One operation: a synchronous blit from a source surface to a destination
//! surface, both addressed by DMA fd, with optional colour-space conversion.
//! `ffi` binds librga at runtime; `virtual_device` records requests in-process.

pub mod ffi;
pub mod virtual_device;

use std::os::raw::c_int;

use crate::error::Result;
use crate::format::RgaFormat;
use crate::frame::{ColorMetadata, ColorRange, PRIMARIES_BT709, SPACE_BT709, SPACE_SMPTE170M, TRC_BT709};

/// Surface geometry in pixels. Strides are the allocated row/column counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgaRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub wstride: u32,
    pub hstride: u32,
    pub format: RgaFormat,
}

impl RgaRect {
    pub fn new(width: u32, height: u32, wstride: u32, hstride: u32, format: RgaFormat) -> Self {
        Self { x: 0, y: 0, width, height, wstride, hstride, format }
    }

    /// Bytes the surface occupies at its strides
    pub fn size(&self) -> usize {
        self.format.surface_size(self.wstride, self.hstride)
    }

    pub fn info(&self) -> serde_json::Value {
        serde_json::json!({
            "width": self.width,
            "height": self.height,
            "wstride": self.wstride,
            "hstride": self.hstride,
            "format": format!("{:?}", self.format),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgaSurface {
    pub fd: c_int,
    pub rect: RgaRect,
}

// ============================================================================
// Colour-space conversion
// ============================================================================

/// Conversion applied during the blit. Values are librga's IM_*_COLOR_SPACE modes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpaceMode {
    #[default]
    None = 0,
    Rgb2Yuv709Full = 0x2 << 8,
    Yuv2Yuv709Full601Full = 0xa << 8,
}

impl ColorSpaceMode {
    pub fn raw(&self) -> u32 {
        *self as u32
    }

    /// Colour tags the output carries after this conversion, if it changes them
    pub fn output_color(&self) -> Option<ColorMetadata> {
        match self {
            Self::None => None,
            Self::Rgb2Yuv709Full => Some(ColorMetadata {
                range: ColorRange::Full,
                primaries: PRIMARIES_BT709,
                trc: TRC_BT709,
                space: SPACE_BT709,
            }),
            Self::Yuv2Yuv709Full601Full => Some(ColorMetadata {
                range: ColorRange::Full,
                primaries: PRIMARIES_BT709,
                trc: TRC_BT709,
                space: SPACE_SMPTE170M,
            }),
        }
    }
}

/// HDR→SDR compatibility table. Only YUV outputs qualify; RGB inputs get the
/// RGB→YUV BT.709 mode, 10-bit YUV inputs the BT.709→BT.601 mode. Every other
/// pair silently disables conversion.
pub fn hdr_to_sdr_mode(input: RgaFormat, output: RgaFormat) -> ColorSpaceMode {
    if !output.is_yuv() || output.is_10bit() {
        return ColorSpaceMode::None;
    }
    if input.is_rgb() {
        ColorSpaceMode::Rgb2Yuv709Full
    } else if input.is_10bit() {
        ColorSpaceMode::Yuv2Yuv709Full601Full
    } else {
        ColorSpaceMode::None
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitRequest {
    pub src: RgaSurface,
    pub dst: RgaSurface,
    pub color_mode: ColorSpaceMode,
}

/// Synchronous 2D engine. `blit` returns once the destination is written.
pub trait RgaEngine: Send + Sync {
    fn name(&self) -> &'static str;
    fn blit(&self, request: &BlitRequest) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hdr_table_hits() {
        assert_eq!(
            hdr_to_sdr_mode(RgaFormat::RGBA_8888, RgaFormat::YCbCr_420_SP),
            ColorSpaceMode::Rgb2Yuv709Full
        );
        assert_eq!(
            hdr_to_sdr_mode(RgaFormat::BGR_565, RgaFormat::UYVY_422),
            ColorSpaceMode::Rgb2Yuv709Full
        );
        assert_eq!(
            hdr_to_sdr_mode(RgaFormat::YCbCr_420_SP_10B, RgaFormat::YCbCr_420_SP),
            ColorSpaceMode::Yuv2Yuv709Full601Full
        );
        assert_eq!(
            hdr_to_sdr_mode(RgaFormat::YCrCb_422_10b_SP, RgaFormat::YCbCr_400),
            ColorSpaceMode::Yuv2Yuv709Full601Full
        );
    }

    #[test]
    fn test_hdr_table_misses() {
        // RGB output never converts
        assert_eq!(hdr_to_sdr_mode(RgaFormat::YCbCr_420_SP_10B, RgaFormat::RGBA_8888), ColorSpaceMode::None);
        // 8-bit YUV in, YUV out
        assert_eq!(hdr_to_sdr_mode(RgaFormat::YCbCr_420_SP, RgaFormat::YCbCr_420_P), ColorSpaceMode::None);
        assert_eq!(hdr_to_sdr_mode(RgaFormat::UNKNOWN, RgaFormat::YCbCr_420_SP), ColorSpaceMode::None);
    }

    #[test]
    fn test_mode_colour_tags() {
        assert_eq!(ColorSpaceMode::None.output_color(), None);
        assert_eq!(ColorSpaceMode::Rgb2Yuv709Full.raw(), 0x200);
        let tags = ColorSpaceMode::Yuv2Yuv709Full601Full.output_color().unwrap();
        assert_eq!(tags.range, ColorRange::Full);
        assert_eq!(tags.space, SPACE_SMPTE170M);
        assert_eq!(tags.primaries, PRIMARIES_BT709);
    }

    #[test]
    fn test_rect_size() {
        let rect = RgaRect::new(1280, 720, 1280, 720, RgaFormat::YCbCr_420_SP);
        assert_eq!(rect.size(), 1280 * 720 * 3 / 2);
        let rect = RgaRect::new(100, 50, 112, 50, RgaFormat::RGBA_8888);
        assert_eq!(rect.size(), 112 * 50 * 4);
    }
}
