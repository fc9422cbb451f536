//! # Format Registry
//!
//! Four independent format enumerations meet here:
//! - `PixelFormat`: what the media pipeline negotiates
//! - `MppFormat`: what the MPP decoder reports in frame info
//! - `DrmFourcc`: what goes into a DRM-PRIME layer descriptor
//! - `RgaFormat`: what the RGA engine accepts in a blit rectangle
//!
//! `FORMAT_TABLE` is the single source of truth. Lookups are linear scans,
//! first match wins. They run only at negotiation time.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Pixel formats (pipeline side)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Nv12,
    /// Rockchip 10-bit semi-planar 4:2:0 (packed, 40 bits per 4 pixels)
    Yuv420SpRk10,
    Nv16,
    Yuv420p,
    Yuv422p,
    Yuyv422,
    Uyvy422,
    Rgb565,
    Bgr565,
    Rgb24,
    Bgr24,
    Rgba,
    Rgb0,
    Bgra,
    Bgr0,
    Argb,
    Zrgb,
    Abgr,
    Zbgr,
    Gray8,
    /// Opaque hardware frame carrying a DRM-PRIME descriptor
    DrmPrime,
}

impl PixelFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nv12 => "nv12",
            Self::Yuv420SpRk10 => "yuv420sprk10",
            Self::Nv16 => "nv16",
            Self::Yuv420p => "yuv420p",
            Self::Yuv422p => "yuv422p",
            Self::Yuyv422 => "yuyv422",
            Self::Uyvy422 => "uyvy422",
            Self::Rgb565 => "rgb565",
            Self::Bgr565 => "bgr565",
            Self::Rgb24 => "rgb24",
            Self::Bgr24 => "bgr24",
            Self::Rgba => "rgba",
            Self::Rgb0 => "rgb0",
            Self::Bgra => "bgra",
            Self::Bgr0 => "bgr0",
            Self::Argb => "argb",
            Self::Zrgb => "0rgb",
            Self::Abgr => "abgr",
            Self::Zbgr => "0bgr",
            Self::Gray8 => "gray",
            Self::DrmPrime => "drm_prime",
        }
    }

    /// Parse from a format name (case-insensitive, a few common aliases)
    pub fn from_name(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        let fmt = match lower.as_str() {
            "nv12" => Self::Nv12,
            "yuv420sprk10" | "nv15" => Self::Yuv420SpRk10,
            "nv16" => Self::Nv16,
            "yuv420p" | "i420" => Self::Yuv420p,
            "yuv422p" => Self::Yuv422p,
            "yuyv422" | "yuyv" | "yuy2" => Self::Yuyv422,
            "uyvy422" | "uyvy" => Self::Uyvy422,
            "rgb565" | "rgb565le" => Self::Rgb565,
            "bgr565" | "bgr565le" => Self::Bgr565,
            "rgb24" => Self::Rgb24,
            "bgr24" => Self::Bgr24,
            "rgba" => Self::Rgba,
            "rgb0" => Self::Rgb0,
            "bgra" => Self::Bgra,
            "bgr0" => Self::Bgr0,
            "argb" => Self::Argb,
            "0rgb" => Self::Zrgb,
            "abgr" => Self::Abgr,
            "0bgr" => Self::Zbgr,
            "gray" | "gray8" => Self::Gray8,
            "drm_prime" => Self::DrmPrime,
            _ => return None,
        };
        Some(fmt)
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::DrmPrime)
    }

    /// log2 of the chroma subsampling factors (horizontal, vertical)
    pub fn chroma_shift(&self) -> (u32, u32) {
        match self {
            Self::Nv12 | Self::Yuv420SpRk10 | Self::Yuv420p => (1, 1),
            Self::Nv16 | Self::Yuv422p | Self::Yuyv422 | Self::Uyvy422 => (1, 0),
            _ => (0, 0),
        }
    }

    /// Plane layout of a tightly packed software image: (bytes per row, rows) per plane
    pub fn plane_sizes(&self, width: u32, height: u32) -> Vec<(usize, usize)> {
        let w = width as usize;
        let h = height as usize;
        let cw = (w + 1) / 2;
        let ch = (h + 1) / 2;
        match self {
            Self::Nv12 => vec![(w, h), (cw * 2, ch)],
            Self::Yuv420SpRk10 => vec![(w * 10 / 8, h), (cw * 2 * 10 / 8, ch)],
            Self::Nv16 => vec![(w, h), (cw * 2, h)],
            Self::Yuv420p => vec![(w, h), (cw, ch), (cw, ch)],
            Self::Yuv422p => vec![(w, h), (cw, h), (cw, h)],
            Self::Yuyv422 | Self::Uyvy422 | Self::Rgb565 | Self::Bgr565 => vec![(w * 2, h)],
            Self::Rgb24 | Self::Bgr24 => vec![(w * 3, h)],
            Self::Rgba | Self::Rgb0 | Self::Bgra | Self::Bgr0 => vec![(w * 4, h)],
            Self::Argb | Self::Zrgb | Self::Abgr | Self::Zbgr => vec![(w * 4, h)],
            Self::Gray8 => vec![(w, h)],
            Self::DrmPrime => Vec::new(),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// MPP frame formats (decoder side)
// ============================================================================

/// Mask applied to raw MPP frame format words before lookup.
/// Upper bits carry FBC/HDR/endianness flags.
pub const MPP_FRAME_FMT_MASK: u32 = 0x000f_ffff;

const MPP_FRAME_FMT_RGB: u32 = 0x0001_0000;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MppFormat {
    Yuv420Sp = 0,
    Yuv420Sp10Bit = 1,
    Yuv422Sp = 2,
    Yuv422Sp10Bit = 3,
    Yuv420P = 4,
    Yuv420SpVu = 5,
    Yuv422P = 6,
    Yuv422SpVu = 7,
    Yuv422Yuyv = 8,
    Yuv422Yvyu = 9,
    Yuv422Uyvy = 10,
    Yuv422Vyuy = 11,
    Yuv400 = 12,
    Rgb565 = MPP_FRAME_FMT_RGB,
    Bgr565 = MPP_FRAME_FMT_RGB + 1,
    Rgb888 = MPP_FRAME_FMT_RGB + 6,
    Bgr888 = MPP_FRAME_FMT_RGB + 7,
    Argb8888 = MPP_FRAME_FMT_RGB + 10,
    Abgr8888 = MPP_FRAME_FMT_RGB + 11,
    Bgra8888 = MPP_FRAME_FMT_RGB + 12,
    Rgba8888 = MPP_FRAME_FMT_RGB + 13,
}

impl MppFormat {
    const ALL: [MppFormat; 21] = [
        Self::Yuv420Sp,
        Self::Yuv420Sp10Bit,
        Self::Yuv422Sp,
        Self::Yuv422Sp10Bit,
        Self::Yuv420P,
        Self::Yuv420SpVu,
        Self::Yuv422P,
        Self::Yuv422SpVu,
        Self::Yuv422Yuyv,
        Self::Yuv422Yvyu,
        Self::Yuv422Uyvy,
        Self::Yuv422Vyuy,
        Self::Yuv400,
        Self::Rgb565,
        Self::Bgr565,
        Self::Rgb888,
        Self::Bgr888,
        Self::Argb8888,
        Self::Abgr8888,
        Self::Bgra8888,
        Self::Rgba8888,
    ];

    /// Decode a raw MPP format word, ignoring flag bits above the mask.
    pub fn from_raw(raw: u32) -> Option<Self> {
        let code = raw & MPP_FRAME_FMT_MASK;
        Self::ALL.iter().copied().find(|f| *f as u32 == code)
    }

    pub fn raw(&self) -> u32 {
        *self as u32
    }

    pub fn is_10bit(&self) -> bool {
        matches!(self, Self::Yuv420Sp10Bit | Self::Yuv422Sp10Bit)
    }
}

// ============================================================================
// DRM fourcc codes (display side)
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrmFourcc(pub u32);

const fn fourcc(code: &[u8; 4]) -> DrmFourcc {
    DrmFourcc(
        code[0] as u32 | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24,
    )
}

impl DrmFourcc {
    pub const INVALID: DrmFourcc = DrmFourcc(0);
    pub const NV12: DrmFourcc = fourcc(b"NV12");
    pub const NV15: DrmFourcc = fourcc(b"NV15");
    pub const NV16: DrmFourcc = fourcc(b"NV16");
    pub const YUV420: DrmFourcc = fourcc(b"YU12");
    pub const YUV422: DrmFourcc = fourcc(b"YU16");
    pub const YUYV: DrmFourcc = fourcc(b"YUYV");
    pub const UYVY: DrmFourcc = fourcc(b"UYVY");
    pub const RGB565: DrmFourcc = fourcc(b"RG16");
    pub const BGR565: DrmFourcc = fourcc(b"BG16");
    pub const RGB888: DrmFourcc = fourcc(b"RG24");
    pub const BGR888: DrmFourcc = fourcc(b"BG24");
    pub const RGBA8888: DrmFourcc = fourcc(b"RA24");
    pub const RGBX8888: DrmFourcc = fourcc(b"RX24");
    pub const BGRA8888: DrmFourcc = fourcc(b"BA24");
    pub const BGRX8888: DrmFourcc = fourcc(b"BX24");
    pub const ARGB8888: DrmFourcc = fourcc(b"AR24");
    pub const XRGB8888: DrmFourcc = fourcc(b"XR24");
    pub const ABGR8888: DrmFourcc = fourcc(b"AB24");
    pub const XBGR8888: DrmFourcc = fourcc(b"XB24");
    pub const YUV420_8BIT: DrmFourcc = fourcc(b"YU08");
}

impl fmt::Display for DrmFourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            write!(f, "{}", String::from_utf8_lossy(&bytes))
        } else {
            write!(f, "0x{:08x}", self.0)
        }
    }
}

impl fmt::Debug for DrmFourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DrmFourcc({})", self)
    }
}

// ============================================================================
// RGA surface formats (2D engine side)
// ============================================================================

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum RgaFormat {
    RGBA_8888 = 0x00 << 8,
    RGBX_8888 = 0x01 << 8,
    RGB_888 = 0x02 << 8,
    BGRA_8888 = 0x03 << 8,
    RGB_565 = 0x04 << 8,
    RGBA_5551 = 0x05 << 8,
    RGBA_4444 = 0x06 << 8,
    BGR_888 = 0x07 << 8,
    YCbCr_422_SP = 0x08 << 8,
    YCbCr_422_P = 0x09 << 8,
    YCbCr_420_SP = 0x0a << 8,
    YCbCr_420_P = 0x0b << 8,
    YCrCb_422_SP = 0x0c << 8,
    YCrCb_422_P = 0x0d << 8,
    YCrCb_420_SP = 0x0e << 8,
    YCrCb_420_P = 0x0f << 8,
    YCbCr_400 = 0x15 << 8,
    BGRX_8888 = 0x16 << 8,
    YVYU_422 = 0x18 << 8,
    YVYU_420 = 0x19 << 8,
    VYUY_422 = 0x1a << 8,
    VYUY_420 = 0x1b << 8,
    YUYV_422 = 0x1c << 8,
    YUYV_420 = 0x1d << 8,
    UYVY_422 = 0x1e << 8,
    UYVY_420 = 0x1f << 8,
    YCbCr_420_SP_10B = 0x20 << 8,
    YCrCb_420_SP_10B = 0x21 << 8,
    YCbCr_422_10b_SP = 0x22 << 8,
    YCrCb_422_10b_SP = 0x23 << 8,
    BGR_565 = 0x24 << 8,
    BGRA_5551 = 0x25 << 8,
    BGRA_4444 = 0x26 << 8,
    ARGB_8888 = 0x28 << 8,
    XRGB_8888 = 0x29 << 8,
    ARGB_5551 = 0x2a << 8,
    ARGB_4444 = 0x2b << 8,
    ABGR_8888 = 0x2c << 8,
    XBGR_8888 = 0x2d << 8,
    ABGR_5551 = 0x2e << 8,
    ABGR_4444 = 0x2f << 8,
    UNKNOWN = 0x100 << 8,
}

/// How the planes of a surface are arranged in one buffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneLayout {
    /// Luma plane followed by one interleaved chroma plane
    SemiPlanar,
    /// Three planes, chroma halved both ways
    Planar420,
    /// Three planes, chroma halved horizontally only
    Planar422,
    /// Single plane (RGB, packed YUV, grey)
    Packed,
}

impl RgaFormat {
    pub fn raw(&self) -> u32 {
        *self as u32
    }

    pub fn layout(&self) -> PlaneLayout {
        match self {
            Self::YCbCr_420_SP
            | Self::YCrCb_420_SP
            | Self::YCbCr_422_SP
            | Self::YCrCb_422_SP
            | Self::YCbCr_420_SP_10B
            | Self::YCrCb_420_SP_10B
            | Self::YCbCr_422_10b_SP
            | Self::YCrCb_422_10b_SP => PlaneLayout::SemiPlanar,
            Self::YCbCr_420_P | Self::YCrCb_420_P => PlaneLayout::Planar420,
            Self::YCbCr_422_P | Self::YCrCb_422_P => PlaneLayout::Planar422,
            _ => PlaneLayout::Packed,
        }
    }

    pub fn is_yuv(&self) -> bool {
        self.layout() != PlaneLayout::Packed
            || matches!(
                self,
                Self::YCbCr_400
                    | Self::YVYU_422
                    | Self::YVYU_420
                    | Self::VYUY_422
                    | Self::VYUY_420
                    | Self::YUYV_422
                    | Self::YUYV_420
                    | Self::UYVY_422
                    | Self::UYVY_420
            )
    }

    pub fn is_rgb(&self) -> bool {
        !self.is_yuv() && *self != Self::UNKNOWN
    }

    pub fn is_10bit(&self) -> bool {
        matches!(
            self,
            Self::YCbCr_420_SP_10B
                | Self::YCrCb_420_SP_10B
                | Self::YCbCr_422_10b_SP
                | Self::YCrCb_422_10b_SP
        )
    }

    /// Whole-surface bytes per pixel, doubled so 4:2:0 stays integral.
    pub fn bpp_halves(&self) -> u32 {
        match self {
            Self::YCbCr_400 => 2,
            Self::YCbCr_420_SP | Self::YCbCr_420_P | Self::YCrCb_420_P | Self::YCrCb_420_SP => 3,
            Self::RGB_565
            | Self::RGBA_5551
            | Self::RGBA_4444
            | Self::BGR_565
            | Self::BGRA_5551
            | Self::BGRA_4444
            | Self::ARGB_5551
            | Self::ARGB_4444
            | Self::ABGR_5551
            | Self::ABGR_4444
            | Self::YCbCr_422_SP
            | Self::YCbCr_422_P
            | Self::YCrCb_422_SP
            | Self::YCrCb_422_P
            | Self::YVYU_422
            | Self::VYUY_422
            | Self::YUYV_422
            | Self::UYVY_422
            | Self::YVYU_420
            | Self::VYUY_420
            | Self::YUYV_420
            | Self::UYVY_420
            | Self::YCbCr_420_SP_10B
            | Self::YCrCb_420_SP_10B => 4,
            Self::YCbCr_422_10b_SP | Self::YCrCb_422_10b_SP => 5,
            Self::BGR_888 | Self::RGB_888 => 6,
            Self::RGBA_8888
            | Self::RGBX_8888
            | Self::BGRA_8888
            | Self::BGRX_8888
            | Self::ARGB_8888
            | Self::XRGB_8888
            | Self::ABGR_8888
            | Self::XBGR_8888 => 8,
            Self::UNKNOWN => 4,
        }
    }

    /// Bits occupied by one pixel in the first plane.
    pub fn first_plane_bits(&self) -> u32 {
        if self.is_10bit() {
            return 10;
        }
        match self.layout() {
            PlaneLayout::SemiPlanar | PlaneLayout::Planar420 | PlaneLayout::Planar422 => 8,
            PlaneLayout::Packed if *self == Self::YCbCr_400 => 8,
            PlaneLayout::Packed if self.is_yuv() => 16,
            PlaneLayout::Packed => self.bpp_halves() * 4,
        }
    }

    /// Bytes per row of the first plane for a stride measured in pixels.
    pub fn pitch_for_stride(&self, stride: u32) -> u32 {
        (stride * self.first_plane_bits() + 7) / 8
    }

    /// Pixel stride implied by a first-plane byte pitch.
    pub fn stride_for_pitch(&self, pitch: u32) -> u32 {
        pitch * 8 / self.first_plane_bits()
    }

    /// Byte size of a surface with the given strides.
    pub fn surface_size(&self, wstride: u32, hstride: u32) -> usize {
        wstride as usize * hstride as usize * self.bpp_halves() as usize / 2
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatEntry {
    pub pixel: PixelFormat,
    pub mpp: MppFormat,
    pub drm: DrmFourcc,
    pub rga: RgaFormat,
}

const fn entry(pixel: PixelFormat, mpp: MppFormat, drm: DrmFourcc, rga: RgaFormat) -> FormatEntry {
    FormatEntry { pixel, mpp, drm, rga }
}

/// RGB naming differs between domains: MPP and RGA name bytes from the high
/// end, the pipeline and DRM from memory order. Rows that only differ in an
/// alpha/padding byte share the same MPP format, so MPP lookups return the
/// first such row.
pub static FORMAT_TABLE: [FormatEntry; 20] = [
    entry(PixelFormat::Nv12, MppFormat::Yuv420Sp, DrmFourcc::NV12, RgaFormat::YCbCr_420_SP),
    entry(PixelFormat::Yuv420SpRk10, MppFormat::Yuv420Sp10Bit, DrmFourcc::NV15, RgaFormat::YCbCr_420_SP_10B),
    entry(PixelFormat::Nv16, MppFormat::Yuv422Sp, DrmFourcc::NV16, RgaFormat::YCbCr_422_SP),
    entry(PixelFormat::Yuv420p, MppFormat::Yuv420P, DrmFourcc::YUV420, RgaFormat::YCbCr_420_P),
    entry(PixelFormat::Yuv422p, MppFormat::Yuv422P, DrmFourcc::YUV422, RgaFormat::YCbCr_422_P),
    entry(PixelFormat::Yuyv422, MppFormat::Yuv422Yuyv, DrmFourcc::YUYV, RgaFormat::YUYV_422),
    entry(PixelFormat::Uyvy422, MppFormat::Yuv422Uyvy, DrmFourcc::UYVY, RgaFormat::UYVY_422),
    entry(PixelFormat::Rgb565, MppFormat::Bgr565, DrmFourcc::RGB565, RgaFormat::BGR_565),
    entry(PixelFormat::Bgr565, MppFormat::Rgb565, DrmFourcc::BGR565, RgaFormat::RGB_565),
    entry(PixelFormat::Rgb24, MppFormat::Bgr888, DrmFourcc::RGB888, RgaFormat::BGR_888),
    entry(PixelFormat::Bgr24, MppFormat::Rgb888, DrmFourcc::BGR888, RgaFormat::RGB_888),
    entry(PixelFormat::Rgba, MppFormat::Abgr8888, DrmFourcc::RGBA8888, RgaFormat::ABGR_8888),
    entry(PixelFormat::Rgb0, MppFormat::Abgr8888, DrmFourcc::RGBX8888, RgaFormat::XBGR_8888),
    entry(PixelFormat::Bgra, MppFormat::Argb8888, DrmFourcc::BGRA8888, RgaFormat::ARGB_8888),
    entry(PixelFormat::Bgr0, MppFormat::Argb8888, DrmFourcc::BGRX8888, RgaFormat::XRGB_8888),
    entry(PixelFormat::Argb, MppFormat::Bgra8888, DrmFourcc::ARGB8888, RgaFormat::BGRA_8888),
    entry(PixelFormat::Zrgb, MppFormat::Bgra8888, DrmFourcc::XRGB8888, RgaFormat::BGRX_8888),
    entry(PixelFormat::Abgr, MppFormat::Rgba8888, DrmFourcc::ABGR8888, RgaFormat::RGBA_8888),
    entry(PixelFormat::Zbgr, MppFormat::Rgba8888, DrmFourcc::XBGR8888, RgaFormat::RGBX_8888),
    entry(PixelFormat::Gray8, MppFormat::Yuv400, DrmFourcc::YUV420_8BIT, RgaFormat::YCbCr_400),
];

pub fn by_pixel(pixel: PixelFormat) -> Option<&'static FormatEntry> {
    FORMAT_TABLE.iter().find(|e| e.pixel == pixel)
}

pub fn by_mpp(mpp: MppFormat) -> Option<&'static FormatEntry> {
    FORMAT_TABLE.iter().find(|e| e.mpp == mpp)
}

pub fn by_drm(drm: DrmFourcc) -> Option<&'static FormatEntry> {
    FORMAT_TABLE.iter().find(|e| e.drm == drm)
}

pub fn by_rga(rga: RgaFormat) -> Option<&'static FormatEntry> {
    FORMAT_TABLE.iter().find(|e| e.rga == rga)
}

/// Registry dump for diagnostics
pub fn table_info() -> serde_json::Value {
    serde_json::Value::Array(
        FORMAT_TABLE
            .iter()
            .map(|e| {
                serde_json::json!({
                    "pixel": e.pixel.name(),
                    "mpp": format!("{:?}", e.mpp),
                    "drm": e.drm.to_string(),
                    "rga": format!("{:?}", e.rga),
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_bijection() {
        for e in FORMAT_TABLE.iter() {
            assert_eq!(by_pixel(e.pixel), Some(e));
            assert_eq!(by_drm(e.drm), Some(e));
            assert_eq!(by_rga(e.rga), Some(e));

            // MPP collapses alpha/padding variants onto one code; the
            // returned row must be the first one carrying it.
            let first = by_mpp(e.mpp).unwrap();
            assert_eq!(first.mpp, e.mpp);
            let expected = FORMAT_TABLE.iter().position(|x| x.mpp == e.mpp).unwrap();
            assert!(std::ptr::eq(first, &FORMAT_TABLE[expected]));
        }
    }

    #[test]
    fn test_lookup_misses() {
        assert!(by_pixel(PixelFormat::DrmPrime).is_none());
        assert!(by_mpp(MppFormat::Yuv422Vyuy).is_none());
        assert!(by_drm(DrmFourcc::INVALID).is_none());
        assert!(by_rga(RgaFormat::UNKNOWN).is_none());
    }

    #[test]
    fn test_unique_keys() {
        for (i, a) in FORMAT_TABLE.iter().enumerate() {
            for b in FORMAT_TABLE.iter().skip(i + 1) {
                assert_ne!(a.pixel, b.pixel);
                assert_ne!(a.drm, b.drm);
                assert_ne!(a.rga, b.rga);
            }
        }
    }

    #[test]
    fn test_mpp_raw_masks_flags() {
        let raw = MppFormat::Yuv420Sp10Bit.raw() | 0x0010_0000;
        assert_eq!(MppFormat::from_raw(raw), Some(MppFormat::Yuv420Sp10Bit));
        assert_eq!(MppFormat::from_raw(0xdead), None);
    }

    #[test]
    fn test_fourcc_display() {
        assert_eq!(DrmFourcc::NV12.0, 0x3231_564e);
        assert_eq!(DrmFourcc::NV12.to_string(), "NV12");
        assert_eq!(DrmFourcc::INVALID.to_string(), "0x00000000");
    }

    #[test]
    fn test_rga_geometry_helpers() {
        assert_eq!(RgaFormat::YCbCr_420_SP.surface_size(1920, 1080), 1920 * 1080 * 3 / 2);
        assert_eq!(RgaFormat::RGB_888.pitch_for_stride(16), 48);
        assert_eq!(RgaFormat::ABGR_8888.stride_for_pitch(256), 64);
        assert_eq!(RgaFormat::YCbCr_420_SP_10B.pitch_for_stride(64), 80);
        assert_eq!(RgaFormat::YUYV_422.pitch_for_stride(32), 64);
        assert_eq!(RgaFormat::YCbCr_400.bpp_halves(), 2);
        assert_eq!(RgaFormat::YCbCr_422_P.layout(), PlaneLayout::Planar422);
        assert!(RgaFormat::XBGR_8888.is_rgb());
        assert!(!RgaFormat::UYVY_422.is_rgb());
    }

    #[test]
    fn test_pixel_names_round_trip() {
        for e in FORMAT_TABLE.iter() {
            assert_eq!(PixelFormat::from_name(e.pixel.name()), Some(e.pixel));
        }
        assert_eq!(PixelFormat::from_name("NV12"), Some(PixelFormat::Nv12));
        assert_eq!(PixelFormat::from_name("p010"), None);
    }
}
