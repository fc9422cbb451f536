//! # Scale/convert filter
//!
//! Resizes and converts frames with the RGA 2D engine. Output is always a
//! DRM-PRIME frame backed by a buffer from the filter's own group.
//!
//! Per frame, one of three paths:
//! • passthrough: negotiated input and output are identical, the input is
//!   returned untouched
//! • hardware input: the blit reads straight from the input's DMA buffer
//! • software input: the image is first staged into a DMA buffer, then blitted
//!
//! Negotiation runs once per stream format: `configure_input` then
//! `configure_output`.

use std::sync::Arc;

use crate::config::{ResolvedScale, ScaleConfig};
use crate::error::{Result, RkError};
use crate::format::{by_pixel, FormatEntry, PixelFormat};
use crate::frame::{Frame, FrameBuffer, HwFramesContext, Rational, SoftwareImage};
use crate::frame_map::{build_descriptor, map_buffer};
use crate::mpp::{BufferGroup, MppBuffer};
use crate::rga::{hdr_to_sdr_mode, BlitRequest, ColorSpaceMode, RgaEngine, RgaRect, RgaSurface};
use crate::scale_eval::{adjust_dimensions, eval_dimensions, ScaleVars};

/// Pixel formats accepted on the input link
pub const INPUT_FORMATS: [PixelFormat; 19] = [
    PixelFormat::DrmPrime,
    PixelFormat::Yuv420p,
    PixelFormat::Nv12,
    PixelFormat::Nv16,
    PixelFormat::Yuyv422,
    PixelFormat::Uyvy422,
    PixelFormat::Rgba,
    PixelFormat::Rgb0,
    PixelFormat::Bgra,
    PixelFormat::Bgr0,
    PixelFormat::Argb,
    PixelFormat::Zrgb,
    PixelFormat::Abgr,
    PixelFormat::Zbgr,
    PixelFormat::Rgb24,
    PixelFormat::Bgr24,
    PixelFormat::Rgb565,
    PixelFormat::Bgr565,
    PixelFormat::Gray8,
];

pub fn supported_input_formats() -> &'static [PixelFormat] {
    &INPUT_FORMATS
}

fn align(v: u32, a: u32) -> u32 {
    (v + a - 1) / a * a
}

/// Format and geometry of one side of the filter
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: Rational,
    pub hw_frames: Option<Arc<HwFramesContext>>,
}

impl LinkInfo {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            format: frame.format,
            width: frame.width,
            height: frame.height,
            sample_aspect_ratio: frame.sample_aspect_ratio,
            hw_frames: frame.hw_frames.clone(),
        }
    }
}

struct InputState {
    link: LinkInfo,
    entry: &'static FormatEntry,
    out_w: u32,
    out_h: u32,
}

/// DMA buffer software input is copied into before each blit.
/// Allocated once per negotiation and reused for every frame.
struct StagingSurface {
    buffer: MppBuffer,
    format: PixelFormat,
    width: u32,
    height: u32,
    surface: RgaSurface,
    /// (offset, pitch) of each plane inside `buffer`
    planes: Vec<(usize, usize)>,
}

impl StagingSurface {
    fn allocate(group: &dyn BufferGroup, entry: &'static FormatEntry, width: u32, height: u32) -> Result<Self> {
        let rect = RgaRect::new(width & !1, height & !1, align(width, 16), align(height, 2), entry.rga);
        let pitch = entry.rga.pitch_for_stride(rect.wstride);
        let buffer = group.get(rect.size())?;
        let desc = build_descriptor(entry, buffer.fd(), buffer.size(), pitch, rect.hstride)?;
        let planes = desc
            .primary_layer()
            .planes()
            .iter()
            .map(|p| (p.offset as usize, p.pitch as usize))
            .collect();
        let fd = buffer.fd();
        Ok(Self { buffer, format: entry.pixel, width, height, surface: RgaSurface { fd, rect }, planes })
    }

    /// Copy `image` row by row into the staging buffer
    fn upload(&self, image: &SoftwareImage) -> Result<RgaSurface> {
        image.validate()?;
        if image.format != self.format || image.width != self.width || image.height != self.height {
            return Err(RkError::BufferGeometry(format!(
                "{}x{} {} frame on a link negotiated for {}x{} {}",
                image.width, image.height, image.format, self.width, self.height, self.format
            )));
        }
        let sizes = image.format.plane_sizes(image.width, image.height);
        for (i, ((plane, &(offset, pitch)), (row_bytes, rows))) in
            image.planes.iter().zip(&self.planes).zip(sizes).enumerate()
        {
            for row in 0..rows {
                let src_off = row * plane.linesize;
                let src = plane
                    .data
                    .get(src_off..src_off + row_bytes)
                    .ok_or_else(|| RkError::BufferGeometry(format!("plane {} ends before row {}", i, row)))?;
                self.buffer.write(offset + row * pitch, src)?;
            }
        }
        Ok(self.surface)
    }
}

struct OutputState {
    rect: RgaRect,
    entry: &'static FormatEntry,
    passthrough: bool,
    color_mode: ColorSpaceMode,
    sample_aspect_ratio: Rational,
    hw_frames: Arc<HwFramesContext>,
    staging: Option<StagingSurface>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    frames_in: u64,
    frames_out: u64,
    passthrough: u64,
    staged: u64,
    failures: u64,
}

pub struct ScaleSession {
    engine: Arc<dyn RgaEngine>,
    group: Arc<dyn BufferGroup>,
    settings: ResolvedScale,
    input: Option<InputState>,
    output: Option<OutputState>,
    counters: Counters,
}

impl ScaleSession {
    pub fn new(engine: Arc<dyn RgaEngine>, group: Arc<dyn BufferGroup>, config: &ScaleConfig) -> Result<Self> {
        let settings = config.resolve()?;
        Ok(Self { engine, group, settings, input: None, output: None, counters: Counters::default() })
    }

    pub fn is_passthrough(&self) -> bool {
        self.output.as_ref().map(|o| o.passthrough).unwrap_or(false)
    }

    pub fn color_mode(&self) -> ColorSpaceMode {
        self.output.as_ref().map(|o| o.color_mode).unwrap_or_default()
    }

    /// Output rectangle, once negotiated
    pub fn output_rect(&self) -> Option<RgaRect> {
        self.output.as_ref().map(|o| o.rect)
    }

    // ------------------------------------------------------------------------
    // Negotiation
    // ------------------------------------------------------------------------

    pub fn configure_input(&mut self, link: LinkInfo) -> Result<()> {
        if !INPUT_FORMATS.contains(&link.format) {
            return Err(RkError::UnsupportedFormat(format!("{} on filter input", link.format)));
        }
        let sw_format = if link.format.is_hardware() {
            link.hw_frames
                .as_ref()
                .map(|ctx| ctx.sw_format)
                .ok_or_else(|| RkError::Config("hardware input without a frames context".into()))?
        } else {
            link.format
        };
        let entry = by_pixel(sw_format).ok_or_else(|| RkError::UnsupportedFormat(sw_format.to_string()))?;

        let vars = ScaleVars::new(link.width, link.height, link.sample_aspect_ratio, sw_format, self.settings.format);
        let (w, h) = eval_dimensions(&self.settings.w_expr, &self.settings.h_expr, &vars)?;
        let (mut out_w, mut out_h) = adjust_dimensions(
            link.width,
            link.height,
            w,
            h,
            self.settings.policy,
            self.settings.divisible_by,
        )?;

        if self.settings.down_scale_only && (out_w > link.width || out_h > link.height) {
            tracing::debug!("Refusing to upscale to {}x{}, keeping input size", out_w, out_h);
            out_w = link.width;
            out_h = link.height;
        }

        tracing::info!(
            "Scale input {}x{} {} ({}) -> {}x{}",
            link.width,
            link.height,
            link.format,
            sw_format,
            out_w,
            out_h
        );
        self.input = Some(InputState { link, entry, out_w, out_h });
        self.output = None;
        Ok(())
    }

    pub fn configure_output(&mut self) -> Result<LinkInfo> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| RkError::Config("configure_input must run before configure_output".into()))?;
        let entry = by_pixel(self.settings.format)
            .ok_or_else(|| RkError::UnsupportedFormat(self.settings.format.to_string()))?;

        let width = input.out_w & !1;
        let height = input.out_h & !1;
        if width == 0 || height == 0 {
            return Err(RkError::Config(format!("output size {}x{} too small", input.out_w, input.out_h)));
        }
        let rect = RgaRect::new(width, height, align(width, 16), height, entry.rga);

        let color_mode = if self.settings.hdr2sdr {
            let mode = hdr_to_sdr_mode(input.entry.rga, entry.rga);
            if mode == ColorSpaceMode::None {
                tracing::info!(
                    "HDR to SDR not available for {:?} -> {:?}, conversion disabled",
                    input.entry.rga,
                    entry.rga
                );
            }
            mode
        } else {
            ColorSpaceMode::None
        };

        let passthrough = input.link.format.is_hardware()
            && width == input.link.width
            && height == input.link.height
            && input.entry.rga == entry.rga
            && color_mode == ColorSpaceMode::None;

        let in_sar = input.link.sample_aspect_ratio;
        let sample_aspect_ratio = if in_sar.num != 0 {
            Rational::new(
                height as i64 * input.link.width as i64,
                width as i64 * input.link.height as i64,
            )
            .mul(in_sar)
        } else {
            in_sar
        };

        let hw_frames = Arc::new(HwFramesContext::new(entry.pixel, width, height));

        let link = if passthrough {
            tracing::info!("Scale passthrough at {}x{} {}", width, height, entry.pixel);
            LinkInfo { sample_aspect_ratio, ..input.link.clone() }
        } else {
            tracing::info!(
                "Scale output {}x{} (stride {}) {} size {} color mode {:#x}",
                width,
                height,
                rect.wstride,
                entry.pixel,
                rect.size(),
                color_mode.raw()
            );
            LinkInfo {
                format: PixelFormat::DrmPrime,
                width,
                height,
                sample_aspect_ratio,
                hw_frames: Some(hw_frames.clone()),
            }
        };

        let staging = if input.link.format.is_hardware() {
            None
        } else {
            Some(StagingSurface::allocate(self.group.as_ref(), input.entry, input.link.width, input.link.height)?)
        };

        self.output = Some(OutputState {
            rect,
            entry,
            passthrough,
            color_mode,
            sample_aspect_ratio,
            hw_frames,
            staging,
        });
        Ok(link)
    }

    // ------------------------------------------------------------------------
    // Per frame
    // ------------------------------------------------------------------------

    /// Scale/convert one frame. The input is consumed whether or not this succeeds.
    pub fn filter_frame(&mut self, input: Frame) -> Result<Frame> {
        self.counters.frames_in += 1;
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| RkError::Config("filter used before output negotiation".into()))?;

        if output.passthrough {
            self.counters.passthrough += 1;
            self.counters.frames_out += 1;
            return Ok(input);
        }

        let result = self.blit_frame(&input);
        match &result {
            Ok(_) => self.counters.frames_out += 1,
            Err(e) => {
                self.counters.failures += 1;
                tracing::warn!("Scale of frame (pts {:?}) failed: {}", input.pts, e);
            }
        }
        result
    }

    fn blit_frame(&mut self, input: &Frame) -> Result<Frame> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| RkError::Config("filter used before output negotiation".into()))?;

        let src = match &input.buffer {
            FrameBuffer::Drm(_) => self.hw_source(input)?,
            FrameBuffer::Software(image) => {
                let staging = output
                    .staging
                    .as_ref()
                    .ok_or_else(|| RkError::Config("software frame on a hardware input link".into()))?;
                let surface = staging.upload(image)?;
                self.counters.staged += 1;
                surface
            }
            FrameBuffer::Empty => return Err(RkError::Config("input frame has no buffer".into())),
        };
        let rect = output.rect;
        let dst_buffer = self.group.get(rect.size())?;
        let request = BlitRequest {
            src,
            dst: RgaSurface { fd: dst_buffer.fd(), rect },
            color_mode: output.color_mode,
        };
        self.engine.blit(&request)?;

        let mut frame = Frame::empty();
        frame.copy_props_from(input);
        frame.width = rect.width;
        frame.height = rect.height;
        frame.sample_aspect_ratio = output.sample_aspect_ratio;
        if let Some(color) = output.color_mode.output_color() {
            frame.color = color;
        }

        let (fd, size) = (dst_buffer.fd(), dst_buffer.size());
        let group = self.group.clone();
        map_buffer(
            &mut frame,
            output.entry,
            fd,
            size,
            rect.format.pitch_for_stride(rect.wstride),
            rect.hstride,
            Box::new(move |_| {
                drop(dst_buffer);
                drop(group);
            }),
        )?;
        frame.hw_frames = Some(output.hw_frames.clone());
        Ok(frame)
    }

    /// Source surface read directly from a DRM-PRIME input
    fn hw_source(&self, input: &Frame) -> Result<RgaSurface> {
        let prime = input
            .drm()
            .ok_or_else(|| RkError::Config("hardware input without a DRM-PRIME buffer".into()))?;
        let desc = prime.descriptor();
        let layer = desc.primary_layer();
        let planes = layer.planes();
        let pitch = planes.first().map(|p| p.pitch).unwrap_or(0);
        if pitch <= 0 {
            return Err(RkError::BufferGeometry("input plane 0 has no pitch".into()));
        }
        let hstride = if planes.len() > 1 { (planes[1].offset / pitch) as u32 } else { input.height };

        let entry = match &input.hw_frames {
            Some(ctx) => by_pixel(ctx.sw_format).ok_or_else(|| RkError::UnsupportedFormat(ctx.sw_format.to_string()))?,
            None => {
                self.input
                    .as_ref()
                    .ok_or_else(|| RkError::Config("filter input not configured".into()))?
                    .entry
            }
        };
        let wstride = entry.rga.stride_for_pitch(pitch as u32);
        Ok(RgaSurface {
            fd: desc.primary_fd(),
            rect: RgaRect::new(input.width & !1, input.height & !1, wstride, hstride, entry.rga),
        })
    }

    pub fn info(&self) -> serde_json::Value {
        let output = self.output.as_ref();
        serde_json::json!({
            "engine": self.engine.name(),
            "format": self.settings.format.name(),
            "passthrough": self.is_passthrough(),
            "color_mode": self.color_mode().raw(),
            "output": output.map(|o| o.rect.info()),
            "frames_in": self.counters.frames_in,
            "frames_out": self.counters.frames_out,
            "passthrough_frames": self.counters.passthrough,
            "staged_uploads": self.counters.staged,
            "failures": self.counters.failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AspectRatioPolicy;
    use crate::format::RgaFormat;
    use crate::frame::{ColorMetadata, ColorRange, SPACE_BT2020_NCL, SPACE_SMPTE170M, TRC_SMPTE2084};
    use crate::mpp::virtual_device::{VirtualMpp, VirtualMppStats};
    use crate::mpp::MppBackend;
    use crate::rga::virtual_device::VirtualRga;
    use std::sync::atomic::Ordering;

    struct Rig {
        _backend: VirtualMpp,
        stats: Arc<VirtualMppStats>,
        group: Arc<dyn BufferGroup>,
        rga: Arc<VirtualRga>,
    }

    fn rig() -> Rig {
        let backend = VirtualMpp::default();
        let stats = backend.stats();
        let group = backend.buffer_group(0).unwrap();
        Rig { _backend: backend, stats, group, rga: Arc::new(VirtualRga::new()) }
    }

    fn live(rig: &Rig) -> usize {
        rig.stats.live_buffers.load(Ordering::SeqCst)
    }

    fn session(rig: &Rig, config: ScaleConfig) -> ScaleSession {
        ScaleSession::new(rig.rga.clone(), rig.group.clone(), &config).unwrap()
    }

    /// DRM-PRIME frame as the decoder would produce it (16-aligned strides)
    fn hw_frame(rig: &Rig, sw: PixelFormat, width: u32, height: u32) -> Frame {
        let entry = by_pixel(sw).unwrap();
        let (wstride, hstride) = (align(width, 16), align(height, 16));
        let pitch = entry.rga.pitch_for_stride(wstride);
        let size = entry.rga.surface_size(wstride, hstride).max((pitch * hstride * 2) as usize);
        let buffer = rig.group.get(size).unwrap();
        let mut frame = Frame::empty();
        frame.width = width;
        frame.height = height;
        frame.pts = Some(42);
        frame.sample_aspect_ratio = Rational::new(1, 1);
        frame.color = ColorMetadata { range: ColorRange::Limited, primaries: 9, trc: TRC_SMPTE2084, space: SPACE_BT2020_NCL };
        let (fd, bytes) = (buffer.fd(), buffer.size());
        map_buffer(&mut frame, entry, fd, bytes, pitch, hstride, Box::new(move |_| drop(buffer))).unwrap();
        frame.hw_frames = Some(Arc::new(HwFramesContext::new(sw, wstride, hstride)));
        frame
    }

    #[test]
    fn test_passthrough_returns_same_buffer() {
        let rig = rig();
        let mut scale = session(&rig, ScaleConfig::default());
        let input = hw_frame(&rig, PixelFormat::Nv12, 1280, 720);
        let keep = input.drm().unwrap().clone();

        let link = LinkInfo::from_frame(&input);
        scale.configure_input(link).unwrap();
        let out_link = scale.configure_output().unwrap();
        assert!(scale.is_passthrough());
        assert_eq!(out_link.format, PixelFormat::DrmPrime);

        let before = live(&rig);
        let output = scale.filter_frame(input).unwrap();
        assert!(output.drm().unwrap().same_buffer(&keep));
        assert_eq!(rig.rga.blit_count(), 0);
        assert_eq!(live(&rig), before);
    }

    #[test]
    fn test_format_change_blits_with_aligned_stride() {
        let rig = rig();
        let config = ScaleConfig { format: Some("rgba".into()), ..ScaleConfig::default() };
        let mut scale = session(&rig, config);
        let image = SoftwareImage::filled(PixelFormat::Yuv420p, 100, 50, 0x80).unwrap();
        let input = Frame::from_software(image);

        scale.configure_input(LinkInfo::from_frame(&input)).unwrap();
        scale.configure_output().unwrap();
        assert!(!scale.is_passthrough());
        let rect = scale.output_rect().unwrap();
        assert!(rect.wstride >= 100);
        assert_eq!(rect.wstride % 16, 0);
        assert_eq!((rect.width, rect.height), (100, 50));

        let output = scale.filter_frame(input).unwrap();
        assert_eq!(output.format, PixelFormat::DrmPrime);
        let layer = *output.drm().unwrap().descriptor().primary_layer();
        assert_eq!(layer.nb_planes, 1);
        assert_eq!(layer.planes[0].pitch, (rect.wstride * 4) as isize);
        assert_eq!(output.pts, None);
    }

    #[test]
    fn test_hardware_format_change_is_not_passthrough() {
        let rig = rig();
        let config = ScaleConfig { format: Some("bgra".into()), ..ScaleConfig::default() };
        let mut scale = session(&rig, config);
        let input = hw_frame(&rig, PixelFormat::Nv12, 640, 360);
        scale.configure_input(LinkInfo::from_frame(&input)).unwrap();
        scale.configure_output().unwrap();
        assert!(!scale.is_passthrough());

        scale.filter_frame(input).unwrap();
        let req = rig.rga.last().unwrap();
        assert_eq!(req.src.rect.format, RgaFormat::YCbCr_420_SP);
        assert_eq!(req.src.rect.wstride, 640);
        assert_eq!(req.src.rect.hstride, 368);
        assert_eq!(req.dst.rect.format, RgaFormat::ARGB_8888);
    }

    #[test]
    fn test_hdr_table_miss_keeps_tags() {
        let rig = rig();
        let config = ScaleConfig { hdr2sdr: true, ..ScaleConfig::with_size("640", "360") };
        let mut scale = session(&rig, config);
        let input = hw_frame(&rig, PixelFormat::Nv12, 1280, 720);
        let tags = input.color;

        scale.configure_input(LinkInfo::from_frame(&input)).unwrap();
        scale.configure_output().unwrap();
        assert_eq!(scale.color_mode(), ColorSpaceMode::None);
        assert_eq!(scale.color_mode().raw(), 0);

        let output = scale.filter_frame(input).unwrap();
        assert_eq!(output.color, tags);
        assert_eq!(rig.rga.last().unwrap().color_mode, ColorSpaceMode::None);
        assert_eq!((output.width, output.height), (640, 360));
    }

    #[test]
    fn test_hdr_ten_bit_converts() {
        let rig = rig();
        let config = ScaleConfig { hdr2sdr: true, ..ScaleConfig::default() };
        let mut scale = session(&rig, config);
        let input = hw_frame(&rig, PixelFormat::Yuv420SpRk10, 1920, 1080);

        scale.configure_input(LinkInfo::from_frame(&input)).unwrap();
        scale.configure_output().unwrap();
        assert_eq!(scale.color_mode(), ColorSpaceMode::Yuv2Yuv709Full601Full);
        assert!(!scale.is_passthrough());

        let output = scale.filter_frame(input).unwrap();
        assert_eq!(output.color.range, ColorRange::Full);
        assert_eq!(output.color.space, SPACE_SMPTE170M);
        let req = rig.rga.last().unwrap();
        assert_eq!(req.color_mode, ColorSpaceMode::Yuv2Yuv709Full601Full);
        assert_eq!(req.src.rect.wstride, 1920);
        assert_eq!(output.pts, Some(42));
    }

    #[test]
    fn test_software_input_is_staged() {
        let rig = rig();
        let mut scale = session(&rig, ScaleConfig::default());
        let image = SoftwareImage::filled(PixelFormat::Rgba, 64, 32, 0xff).unwrap();
        let input = Frame::from_software(image.clone());

        scale.configure_input(LinkInfo::from_frame(&input)).unwrap();
        scale.configure_output().unwrap();
        // staging surface exists from negotiation on
        assert_eq!(live(&rig), 1);

        let first = scale.filter_frame(input).unwrap();
        let req = rig.rga.last().unwrap();
        assert_eq!(req.src.rect.format, RgaFormat::ABGR_8888);
        assert_eq!(req.src.rect.wstride, 64);
        assert_ne!(req.src.fd, req.dst.fd);

        let staging = &scale.output.as_ref().unwrap().staging.as_ref().unwrap().buffer;
        let mut px = [0u8; 4];
        staging.read(63 * 4, &mut px).unwrap();
        assert_eq!(px, [0xff; 4]);

        let second = scale.filter_frame(Frame::from_software(image)).unwrap();
        assert_eq!(rig.rga.history()[1].src.fd, req.src.fd);
        assert_eq!(scale.info()["staged_uploads"], 2);
        // one staging buffer plus the two outputs
        assert_eq!(live(&rig), 3);
        drop(first);
        drop(second);
        assert_eq!(live(&rig), 1);
        drop(scale);
        assert_eq!(live(&rig), 0);
    }

    #[test]
    fn test_malformed_software_frame_is_rejected() {
        let rig = rig();
        let mut scale = session(&rig, ScaleConfig::default());
        let mut image = SoftwareImage::filled(PixelFormat::Rgba, 64, 32, 0).unwrap();
        scale.configure_input(LinkInfo::from_frame(&Frame::from_software(image.clone()))).unwrap();
        scale.configure_output().unwrap();

        image.planes[0].data = image.planes[0].data.slice(..100);
        let err = scale.filter_frame(Frame::from_software(image)).unwrap_err();
        assert!(matches!(err, RkError::BufferGeometry(_)));

        // size differs from the negotiated link
        let other = SoftwareImage::filled(PixelFormat::Rgba, 32, 32, 0).unwrap();
        assert!(matches!(scale.filter_frame(Frame::from_software(other)), Err(RkError::BufferGeometry(_))));
        assert_eq!(rig.rga.blit_count(), 0);
        assert_eq!(scale.info()["failures"], 2);
    }

    #[test]
    fn test_odd_source_rect_rounds_down() {
        let rig = rig();
        let mut scale = session(&rig, ScaleConfig::with_size("320", "180"));
        let input = hw_frame(&rig, PixelFormat::Nv12, 641, 361);
        scale.configure_input(LinkInfo::from_frame(&input)).unwrap();
        scale.configure_output().unwrap();
        scale.filter_frame(input).unwrap();

        let src = rig.rga.last().unwrap().src.rect;
        assert_eq!((src.width, src.height), (640, 360));
        assert_eq!(src.wstride, 656);
    }

    #[test]
    fn test_blit_failure_rolls_back() {
        let rig = rig();
        let mut scale = session(&rig, ScaleConfig::with_size("320", "180"));
        let input = hw_frame(&rig, PixelFormat::Nv12, 640, 360);
        scale.configure_input(LinkInfo::from_frame(&input)).unwrap();
        scale.configure_output().unwrap();

        rig.rga.fail_with(-5);
        let err = scale.filter_frame(input).unwrap_err();
        assert!(matches!(err, RkError::Blit(-5)));
        // input consumed, destination released
        assert_eq!(live(&rig), 0);
        assert_eq!(scale.info()["failures"], 1);
    }

    #[test]
    fn test_down_scale_only() {
        let rig = rig();
        let link = LinkInfo {
            format: PixelFormat::Nv12,
            width: 1280,
            height: 720,
            sample_aspect_ratio: Rational::new(1, 1),
            hw_frames: None,
        };

        let mut scale = session(&rig, ScaleConfig::with_size("3840", "2160"));
        scale.configure_input(link.clone()).unwrap();
        scale.configure_output().unwrap();
        let rect = scale.output_rect().unwrap();
        assert_eq!((rect.width, rect.height), (1280, 720));

        let config = ScaleConfig { down_scale_only: false, ..ScaleConfig::with_size("3840", "2160") };
        let mut scale = session(&rig, config);
        scale.configure_input(link).unwrap();
        scale.configure_output().unwrap();
        let rect = scale.output_rect().unwrap();
        assert_eq!((rect.width, rect.height), (3840, 2160));
    }

    #[test]
    fn test_output_sar_and_even_rect() {
        let rig = rig();
        let config = ScaleConfig {
            force_original_aspect_ratio: AspectRatioPolicy::Disable,
            ..ScaleConfig::with_size("961", "1080")
        };
        let mut scale = session(&rig, config);
        let link = LinkInfo {
            format: PixelFormat::Nv12,
            width: 1920,
            height: 1080,
            sample_aspect_ratio: Rational::new(1, 1),
            hw_frames: None,
        };
        scale.configure_input(link.clone()).unwrap();
        let out = scale.configure_output().unwrap();
        assert_eq!((out.width, out.height), (960, 1080));
        assert_eq!(out.sample_aspect_ratio, Rational::new(2, 1));
        assert_eq!(scale.output_rect().unwrap().wstride, 960);

        let mut scale = session(&rig, ScaleConfig::with_size("960", "1080"));
        scale
            .configure_input(LinkInfo { sample_aspect_ratio: Rational::UNKNOWN, ..link })
            .unwrap();
        let out = scale.configure_output().unwrap();
        assert_eq!(out.sample_aspect_ratio, Rational::UNKNOWN);
    }

    #[test]
    fn test_input_allow_list() {
        let rig = rig();
        let mut scale = session(&rig, ScaleConfig::default());
        let link = LinkInfo {
            format: PixelFormat::Yuv420SpRk10,
            width: 64,
            height: 64,
            sample_aspect_ratio: Rational::UNKNOWN,
            hw_frames: None,
        };
        assert!(matches!(scale.configure_input(link), Err(RkError::UnsupportedFormat(_))));
        assert_eq!(supported_input_formats().len(), 19);
        assert!(supported_input_formats().contains(&PixelFormat::Gray8));

        let hw_without_ctx = LinkInfo {
            format: PixelFormat::DrmPrime,
            width: 64,
            height: 64,
            sample_aspect_ratio: Rational::UNKNOWN,
            hw_frames: None,
        };
        assert!(scale.configure_input(hw_without_ctx).is_err());
    }

    #[test]
    fn test_filter_requires_negotiation() {
        let rig = rig();
        let mut scale = session(&rig, ScaleConfig::default());
        let input = hw_frame(&rig, PixelFormat::Nv12, 64, 64);
        assert!(matches!(scale.filter_frame(input), Err(RkError::Config(_))));
        assert_eq!(live(&rig), 0);
    }
}
