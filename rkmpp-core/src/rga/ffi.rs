// RGA FFI - librga via dynamic library loading
//
// Uses the legacy C entry points (c_RkRgaInit / c_RkRgaBlit), present in every
// librga release shipped on RK3399 through RK3588.

use libc::{c_int, c_uint, c_void};
use std::sync::OnceLock;

use super::{BlitRequest, RgaEngine, RgaSurface};
use crate::error::{Result, RkError};

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct RgaRectRaw {
    xoffset: c_int,
    yoffset: c_int,
    width: c_int,
    height: c_int,
    wstride: c_int,
    hstride: c_int,
    format: c_int,
    size: c_int,
}

/// Leading fields of `rga_info_t`. The tail is zeroed padding, oversized so
/// newer librga builds never read past the end of our allocation.
#[repr(C)]
struct RgaInfo {
    fd: c_int,
    vir_addr: *mut c_void,
    phy_addr: *mut c_void,
    hnd: c_uint,
    format: c_int,
    rect: RgaRectRaw,
    blend: c_uint,
    buffer_size: c_int,
    rotation: c_int,
    color: c_int,
    test_log: c_int,
    mmu_flag: c_int,
    colorkey_en: c_int,
    colorkey_mode: c_int,
    colorkey_max: c_int,
    colorkey_min: c_int,
    scale_mode: c_int,
    color_space_mode: c_int,
    sync_mode: c_int,
    reserve: [u8; 512],
}

impl RgaInfo {
    fn from_surface(surface: &RgaSurface) -> Self {
        let rect = &surface.rect;
        let format = rect.format.raw() as c_int;
        Self {
            fd: surface.fd,
            vir_addr: std::ptr::null_mut(),
            phy_addr: std::ptr::null_mut(),
            hnd: 0,
            format,
            rect: RgaRectRaw {
                xoffset: rect.x as c_int,
                yoffset: rect.y as c_int,
                width: rect.width as c_int,
                height: rect.height as c_int,
                wstride: rect.wstride as c_int,
                hstride: rect.hstride as c_int,
                format,
                size: rect.size() as c_int,
            },
            blend: 0,
            buffer_size: 0,
            rotation: 0,
            color: 0,
            test_log: 0,
            mmu_flag: 1,
            colorkey_en: 0,
            colorkey_mode: 0,
            colorkey_max: 0,
            colorkey_min: 0,
            scale_mode: 0,
            color_space_mode: 0,
            sync_mode: 0,
            reserve: [0; 512],
        }
    }
}

type RgaInitFn = unsafe extern "C" fn() -> c_int;
type RgaBlitFn = unsafe extern "C" fn(*mut RgaInfo, *mut RgaInfo, *mut RgaInfo) -> c_int;

struct RgaLibrary {
    _lib: libloading::Library,
    blit: RgaBlitFn,
}

unsafe impl Send for RgaLibrary {}
unsafe impl Sync for RgaLibrary {}

static RGA_LIB: OnceLock<Option<RgaLibrary>> = OnceLock::new();

fn get_rga_path() -> &'static str {
    for path in &["/usr/lib/aarch64-linux-gnu/librga.so.2", "/usr/lib/librga.so.2", "/usr/lib64/librga.so.2"] {
        if std::path::Path::new(path).exists() {
            return path;
        }
    }
    "librga.so"
}

fn load_rga_library() -> Option<&'static RgaLibrary> {
    RGA_LIB
        .get_or_init(|| unsafe {
            let lib = match libloading::Library::new(get_rga_path()) {
                Ok(lib) => lib,
                Err(e) => {
                    tracing::warn!("Failed to load librga: {}", e);
                    return None;
                }
            };
            let init: RgaInitFn = *lib.get(b"c_RkRgaInit\0").ok()?;
            let blit: RgaBlitFn = *lib.get(b"c_RkRgaBlit\0").ok()?;

            let ret = init();
            if ret != 0 {
                tracing::warn!("c_RkRgaInit failed: {}", ret);
                return None;
            }

            tracing::info!("librga loaded successfully");
            Some(RgaLibrary { _lib: lib, blit })
        })
        .as_ref()
}

pub fn is_available() -> bool {
    load_rga_library().is_some()
}

pub struct FfiRga {
    lib: &'static RgaLibrary,
}

impl FfiRga {
    pub fn load() -> Result<Self> {
        load_rga_library()
            .map(|lib| Self { lib })
            .ok_or_else(|| RkError::Library { name: "librga", reason: "not found or init failed".into() })
    }
}

impl RgaEngine for FfiRga {
    fn name(&self) -> &'static str {
        "librga"
    }

    fn blit(&self, request: &BlitRequest) -> Result<()> {
        let mut src = RgaInfo::from_surface(&request.src);
        let mut dst = RgaInfo::from_surface(&request.dst);
        // librga reads the conversion mode from the source descriptor
        src.color_space_mode = request.color_mode.raw() as c_int;

        let ret = unsafe { (self.lib.blit)(&mut src, &mut dst, std::ptr::null_mut()) };
        if ret != 0 {
            tracing::error!("c_RkRgaBlit failed: {}", ret);
            return Err(RkError::Blit(ret));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::RgaFormat;
    use crate::rga::RgaRect;

    #[test]
    fn test_info_from_surface() {
        let surface = RgaSurface { fd: 17, rect: RgaRect::new(640, 360, 640, 368, RgaFormat::YCbCr_420_SP) };
        let info = RgaInfo::from_surface(&surface);
        assert_eq!(info.fd, 17);
        assert_eq!(info.mmu_flag, 1);
        assert_eq!(info.rect.hstride, 368);
        assert_eq!(info.rect.format, RgaFormat::YCbCr_420_SP.raw() as c_int);
        assert_eq!(info.rect.size, (640 * 368 * 3 / 2) as c_int);
    }
}
