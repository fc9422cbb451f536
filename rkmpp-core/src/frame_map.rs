// FRAME_MAP - Zero-copy wrapping of hardware buffers as DRM-PRIME frames
//
// A hardware buffer (fd + size) plus the first plane's pitch and height fully
// determine the plane table. Chroma placement follows the RGA format:
// • semi-planar: one interleaved chroma plane right after luma
// • planar 4:2:0: two chroma planes, half pitch, half height (rounded up)
// • planar 4:2:2: two chroma planes, half pitch, full height
// • everything else: a single plane

use std::os::raw::c_int;

use crate::drm::{DrmFrameDescriptor, DrmPrime, ReleaseFn, DRM_FORMAT_MOD_LINEAR};
use crate::error::{Result, RkError};
use crate::format::{FormatEntry, PixelFormat, PlaneLayout};
use crate::frame::{Frame, FrameBuffer};

/// Plane table for one buffer object. Fails if the geometry does not fit in `size`.
pub fn build_descriptor(
    entry: &FormatEntry,
    fd: c_int,
    size: usize,
    pitch: u32,
    plane_height: u32,
) -> Result<DrmFrameDescriptor> {
    if fd < 0 {
        return Err(RkError::BufferGeometry(format!("invalid fd {}", fd)));
    }
    if pitch == 0 || plane_height == 0 {
        return Err(RkError::BufferGeometry(format!(
            "zero pitch or height ({}x{})",
            pitch, plane_height
        )));
    }

    let mut desc = DrmFrameDescriptor::default();
    desc.nb_objects = 1;
    desc.objects[0].fd = fd;
    desc.objects[0].size = size;
    desc.objects[0].format_modifier = DRM_FORMAT_MOD_LINEAR;
    desc.nb_layers = 1;

    let pitch0 = pitch as isize;
    let luma_bytes = pitch0 * plane_height as isize;

    let layer = &mut desc.layers[0];
    layer.format = entry.drm.0;
    layer.planes[0].object_index = 0;
    layer.planes[0].offset = 0;
    layer.planes[0].pitch = pitch0;

    let end = match entry.rga.layout() {
        PlaneLayout::SemiPlanar => {
            layer.nb_planes = 2;
            layer.planes[1].object_index = 0;
            layer.planes[1].offset = luma_bytes;
            layer.planes[1].pitch = pitch0;
            // 4:2:0 chroma is half height, 4:2:2 full height
            let chroma_rows = if entry.pixel.chroma_shift().1 == 1 {
                (plane_height as isize + 1) >> 1
            } else {
                plane_height as isize
            };
            luma_bytes + pitch0 * chroma_rows
        }
        layout @ (PlaneLayout::Planar420 | PlaneLayout::Planar422) => {
            let chroma_rows = match layout {
                PlaneLayout::Planar420 => (plane_height as isize + 1) >> 1,
                _ => plane_height as isize,
            };
            let chroma_pitch = (pitch0 + 1) >> 1;
            layer.nb_planes = 3;
            layer.planes[1].object_index = 0;
            layer.planes[1].offset = luma_bytes;
            layer.planes[1].pitch = chroma_pitch;
            layer.planes[2].object_index = 0;
            layer.planes[2].offset = luma_bytes + chroma_pitch * chroma_rows;
            layer.planes[2].pitch = chroma_pitch;
            layer.planes[2].offset + chroma_pitch * chroma_rows
        }
        PlaneLayout::Packed => {
            layer.nb_planes = 1;
            luma_bytes
        }
    };

    if end as usize > size {
        return Err(RkError::BufferGeometry(format!(
            "{} planes need {} bytes, buffer has {}",
            entry.pixel, end, size
        )));
    }

    Ok(desc)
}

/// Attach a hardware buffer to `frame` as a shared DRM-PRIME handle.
///
/// `release` runs exactly once, when the last clone of the handle drops.
/// On error the frame is left untouched and `release` is dropped without
/// being called; anything it captured is dropped with it.
pub fn map_buffer(
    frame: &mut Frame,
    entry: &FormatEntry,
    fd: c_int,
    size: usize,
    pitch: u32,
    plane_height: u32,
    release: ReleaseFn,
) -> Result<()> {
    let desc = build_descriptor(entry, fd, size, pitch, plane_height)?;
    frame.format = PixelFormat::DrmPrime;
    frame.buffer = FrameBuffer::Drm(DrmPrime::new(desc, release));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{by_pixel, PixelFormat};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn entry(pf: PixelFormat) -> &'static FormatEntry {
        by_pixel(pf).unwrap()
    }

    #[test]
    fn test_nv12_two_planes() {
        let desc = build_descriptor(entry(PixelFormat::Nv12), 5, 1920 * 1088 * 3 / 2, 1920, 1088).unwrap();
        let layer = desc.primary_layer();
        assert_eq!(layer.nb_planes, 2);
        assert_eq!(layer.planes[1].offset, 1920 * 1088);
        assert_eq!(layer.planes[1].pitch, 1920);
        assert_eq!(layer.fourcc(), crate::format::DrmFourcc::NV12);
    }

    #[test]
    fn test_yuv420p_three_planes_rounds_up() {
        let (p, h) = (101u32, 51u32);
        let size = (p * h + 2 * 51 * 26) as usize;
        let desc = build_descriptor(entry(PixelFormat::Yuv420p), 3, size, p, h).unwrap();
        let planes = desc.primary_layer().planes();
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[1].offset, (p * h) as isize);
        assert_eq!(planes[1].pitch, 51);
        assert_eq!(planes[2].pitch, 51);
        assert_eq!(planes[2].offset, (p * h) as isize + 51 * 26);
    }

    #[test]
    fn test_yuv422p_keeps_chroma_height() {
        let (p, h) = (64u32, 32u32);
        let size = (p * h * 2) as usize;
        let desc = build_descriptor(entry(PixelFormat::Yuv422p), 3, size, p, h).unwrap();
        let planes = desc.primary_layer().planes();
        assert_eq!(planes[1].pitch, 32);
        assert_eq!(planes[2].offset, (64 * 32 + 32 * 32) as isize);
    }

    #[test]
    fn test_packed_single_plane() {
        let desc = build_descriptor(entry(PixelFormat::Rgba), 3, 256 * 64, 256, 64).unwrap();
        assert_eq!(desc.primary_layer().planes().len(), 1);
        let desc = build_descriptor(entry(PixelFormat::Nv16), 3, 64 * 16 * 2, 64, 16).unwrap();
        assert_eq!(desc.primary_layer().planes().len(), 2);
    }

    #[test]
    fn test_geometry_errors() {
        let nv12 = entry(PixelFormat::Nv12);
        assert!(build_descriptor(nv12, -1, 1024, 16, 16).is_err());
        assert!(build_descriptor(nv12, 3, 1024, 0, 16).is_err());
        assert!(build_descriptor(nv12, 3, 100, 16, 16).is_err());
    }

    #[test]
    fn test_map_failure_never_calls_release() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut frame = Frame::empty();
        let res = map_buffer(
            &mut frame,
            entry(PixelFormat::Nv12),
            3,
            10,
            16,
            16,
            Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(res.is_err());
        assert!(frame.drm().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_map_release_on_last_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut frame = Frame::empty();
        map_buffer(
            &mut frame,
            entry(PixelFormat::Nv12),
            9,
            16 * 16 * 3 / 2,
            16,
            16,
            Box::new(move |desc| {
                assert_eq!(desc.primary_fd(), 9);
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        assert_eq!(frame.format, PixelFormat::DrmPrime);

        let copy = frame.clone();
        drop(frame);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(copy);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
