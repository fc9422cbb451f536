//! # Decoder session
//!
//! Pull-model decode loop over one MPP context:
//!
//! ```text
//! Idle ──open──► Running ──source Eof──► Draining ──eos frame──► Eos
//!                  ▲  │                                          │
//!                  └──┴────────────── flush ◄────────────────────┘
//! ```
//!
//! The context, its buffer group and the MJPEG EOS packet live in a shared
//! block. The session holds one reference and every emitted frame holds
//! another through its DRM-PRIME release closure, so `close()` never frees
//! hardware memory that a display or encoder is still reading.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::codecs::CodecId;
use crate::config::{DecoderConfig, DiagnosticToggles};
use crate::error::{Result, RkError};
use crate::format::{by_mpp, MppFormat};
use crate::frame::{Frame, HwFramesContext};
use crate::frame_map::map_buffer;
use crate::mpp::{
    buffer_with_data, BufferGroup, CodingType, CtxType, FrameInfo, MppBackend, MppBuffer, MppContext,
    MppFrame, MppPacket, MppTask, Port, Submit, Timeout, MPP_BUFFER_FLAGS_DMA32, MPP_BUFFER_TYPE_DRM,
    MPP_ERR_TIMEOUT,
};

const FPS_INTERVAL: u64 = 120;

// ============================================================================
// Upstream packets
// ============================================================================

#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    pub pts: Option<i64>,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>, pts: Option<i64>) -> Self {
        Self { data: data.into(), pts }
    }
}

#[derive(Debug)]
pub enum SourceStatus {
    Packet(Packet),
    /// Nothing available yet; ask again later
    Again,
    Eof,
}

/// Where the session pulls bitstream packets from
pub trait PacketSource {
    fn next_packet(&mut self) -> Result<SourceStatus>;
}

/// A finite, fully buffered stream. Empty means end of stream.
impl PacketSource for VecDeque<Packet> {
    fn next_packet(&mut self) -> Result<SourceStatus> {
        Ok(match self.pop_front() {
            Some(packet) => SourceStatus::Packet(packet),
            None => SourceStatus::Eof,
        })
    }
}

#[derive(Debug)]
pub enum DecodeStatus {
    Frame(Frame),
    /// No frame this time; call again
    Again,
    /// End of stream. Returned until `flush()`.
    Eof,
}

// ============================================================================
// Shared hardware state
// ============================================================================

struct DecoderShared {
    ctx: Mutex<MppContext>,
    group: Arc<dyn BufferGroup>,
    eos_packet: Option<MppBuffer>,
}

impl Drop for DecoderShared {
    fn drop(&mut self) {
        tracing::info!("Releasing MPP decoder context");
        self.eos_packet.take();
        self.ctx.get_mut().shutdown();
        // group handle goes last, after the context stopped using it
    }
}

struct FpsMeter {
    enabled: bool,
    frames: u64,
    start: Option<Instant>,
    last: Option<Instant>,
}

impl FpsMeter {
    fn new(enabled: bool) -> Self {
        Self { enabled, frames: 0, start: None, last: None }
    }

    fn reset(&mut self) {
        self.frames = 0;
        self.start = None;
        self.last = None;
    }

    fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        let start = *self.start.get_or_insert(now);
        let last = *self.last.get_or_insert(now);
        self.frames += 1;
        if self.frames % FPS_INTERVAL != 0 {
            return;
        }
        let interval = now.duration_since(last).as_secs_f64();
        let total = now.duration_since(start).as_secs_f64();
        let fps = if interval > 0.0 { FPS_INTERVAL as f64 / interval } else { 0.0 };
        let avg = if total > 0.0 { self.frames as f64 / total } else { 0.0 };
        tracing::info!("[FPS] frames {} | {:.1} fps | {:.1} avg", self.frames, fps, avg);
        self.last = Some(now);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    packets_in: u64,
    frames_out: u64,
    discards: u64,
    errors: u64,
    info_changes: u64,
}

// ============================================================================
// Session
// ============================================================================

pub struct DecoderSession {
    shared: Arc<DecoderShared>,
    backend: &'static str,
    codec: CodecId,
    config: DecoderConfig,
    toggles: DiagnosticToggles,
    hw_frames: Option<Arc<HwFramesContext>>,
    coded_size: (u32, u32),
    pending: Option<Packet>,
    eos_reached: bool,
    draining: bool,
    output_timeout: Option<Timeout>,
    jpeg_buf_size: usize,
    fps: FpsMeter,
    counters: Counters,
}

fn align(v: u32, a: u32) -> u32 {
    (v + a - 1) / a * a
}

impl DecoderSession {
    /// Open with diagnostic toggles taken from the environment
    pub fn open(backend: &dyn MppBackend, config: DecoderConfig) -> Result<Self> {
        Self::open_with(backend, config, DiagnosticToggles::from_env())
    }

    pub fn open_with(backend: &dyn MppBackend, config: DecoderConfig, toggles: DiagnosticToggles) -> Result<Self> {
        let codec = config.codec;
        let coding = codec.coding();

        if !backend.check_support(CtxType::Dec, coding) {
            return Err(RkError::UnsupportedCodec(codec.decoder_name()));
        }

        let jpeg_buf_size = if codec.uses_task_queue() {
            match (config.width, config.height) {
                (Some(w), Some(h)) if w > 0 && h > 0 => align(w, 16) as usize * align(h, 16) as usize * 2,
                _ => return Err(RkError::Config("MJPEG decoding needs the frame size up front".into())),
            }
        } else {
            0
        };

        // Everything below is owned by locals until the shared block exists,
        // so an early return drops (and tears down) whatever was created.
        let device = backend.create().map_err(|e| e.at_stage("create"))?;
        let mut ctx = MppContext::new(device);
        ctx.enable_fast_parse().map_err(|e| e.at_stage("fast parse"))?;
        ctx.init_decoder(coding).map_err(|e| e.at_stage("init"))?;

        let group = backend
            .buffer_group(MPP_BUFFER_TYPE_DRM | MPP_BUFFER_FLAGS_DMA32)
            .map_err(|e| e.at_stage("buffer group"))?;
        // MJPEG output buffers are handed over per task instead
        if !codec.uses_task_queue() {
            ctx.attach_buffer_group(&group).map_err(|e| e.at_stage("buffer group"))?;
        }
        ctx.suppress_errors().map_err(|e| e.at_stage("disable error"))?;
        if toggles.sync {
            ctx.enable_immediate_output().map_err(|e| e.at_stage("immediate out"))?;
        }

        let eos_packet = if codec.uses_task_queue() {
            Some(group.get(1).map_err(|e| e.at_stage("eos packet"))?)
        } else {
            None
        };

        let shared = Arc::new(DecoderShared { ctx: Mutex::new(ctx), group, eos_packet });

        let mut session = Self {
            shared,
            backend: backend.name(),
            codec,
            config,
            toggles,
            hw_frames: None,
            coded_size: (0, 0),
            pending: None,
            eos_reached: false,
            draining: false,
            output_timeout: None,
            jpeg_buf_size,
            fps: FpsMeter::new(toggles.log_fps),
            counters: Counters::default(),
        };
        session.feed_extra_data().map_err(|e| e.at_stage("extradata"))?;

        tracing::info!(
            "Opened {} on {} (fps log: {}, sync: {})",
            codec.decoder_name(),
            session.backend,
            toggles.log_fps,
            toggles.sync
        );
        Ok(session)
    }

    pub fn codec(&self) -> CodecId {
        self.codec
    }

    pub fn coding(&self) -> CodingType {
        self.codec.coding()
    }

    /// Pool descriptor of the current stream geometry, once known
    pub fn hw_frames(&self) -> Option<&Arc<HwFramesContext>> {
        self.hw_frames.as_ref()
    }

    fn feed_extra_data(&mut self) -> Result<()> {
        if self.codec.skips_extradata() || self.codec.uses_task_queue() {
            return Ok(());
        }
        let data = match &self.config.extra_data {
            Some(data) if !data.is_empty() => Bytes::from(data.clone()),
            _ => return Ok(()),
        };
        let packet = MppPacket::new(data, 0);
        let mut ctx = self.shared.ctx.lock();
        for _ in 0..self.config.max_attempts.max(1) {
            if ctx.put_packet(&packet) == Submit::Accepted {
                tracing::debug!("Fed {} bytes of extradata", packet.len());
                return Ok(());
            }
        }
        Err(RkError::device("decode_put_packet(extradata)", MPP_ERR_TIMEOUT))
    }

    // ------------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------------

    fn send_packet(&mut self, packet: &Packet) -> Result<Submit> {
        let pts = match packet.pts {
            Some(pts) if pts != 0 => pts,
            _ => self.counters.packets_in as i64,
        };

        let submit = if self.codec.uses_task_queue() {
            self.send_task(Some((packet.data.clone(), pts)))?
        } else {
            self.shared.ctx.lock().put_packet(&MppPacket::new(packet.data.clone(), pts))
        };

        if submit == Submit::Accepted {
            self.counters.packets_in += 1;
            tracing::debug!("Sent packet of {} bytes (pts {})", packet.data.len(), pts);
        }
        Ok(submit)
    }

    /// MJPEG: one packet per task, decoded into a buffer we allocate.
    /// `None` submits the EOS packet.
    fn send_task(&mut self, packet: Option<(Bytes, i64)>) -> Result<Submit> {
        let wait = if packet.is_none() { Timeout::Block } else { Timeout::Millis(self.config.backpressure_timeout_ms) };
        let mut ctx = self.shared.ctx.lock();

        if !ctx.poll(Port::Input, wait)? {
            return Ok(Submit::Full);
        }
        let mut task = match ctx.dequeue(Port::Input)? {
            Some(task) => task,
            None => return Ok(Submit::Full),
        };

        match packet {
            Some((data, pts)) => {
                let prepared = buffer_with_data(self.shared.group.as_ref(), &data)
                    .and_then(|input| Ok((input, self.shared.group.get(self.jpeg_buf_size)?)));
                let (input, output) = match prepared {
                    Ok(buffers) => buffers,
                    Err(e) => {
                        // hand the slot back before reporting
                        let id = task.id;
                        ctx.enqueue(Port::Input, MppTask::new(id))?;
                        return Err(e);
                    }
                };
                task.packet = Some(MppPacket { data, pts, eos: false, buffer: Some(input) });
                task.frame = Some(MppFrame::output_slot(output));
            }
            None => {
                task.packet = Some(MppPacket { buffer: self.shared.eos_packet.clone(), ..MppPacket::eos() });
            }
        }

        ctx.enqueue(Port::Input, task)?;
        Ok(Submit::Accepted)
    }

    /// True once the hardware has taken the EOS marker
    fn send_eos(&mut self) -> Result<bool> {
        for _ in 0..self.config.max_attempts.max(1) {
            let submit = if self.codec.uses_task_queue() {
                self.send_task(None)?
            } else {
                self.shared.ctx.lock().put_packet(&MppPacket::eos())
            };
            if submit == Submit::Accepted {
                tracing::debug!("EOS sent, draining");
                self.draining = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    fn next_hw_frame(&mut self, timeout: Timeout) -> Result<Option<MppFrame>> {
        let mut ctx = self.shared.ctx.lock();

        if self.codec.uses_task_queue() {
            let wait = match timeout {
                Timeout::Block => Timeout::Millis(self.config.mjpeg_timeout_ms),
                other => other,
            };
            if !ctx.poll(Port::Output, wait)? {
                return Ok(None);
            }
            let mut task = match ctx.dequeue(Port::Output)? {
                Some(task) => task,
                None => return Ok(None),
            };
            let frame = task.frame.take();
            task.packet = None;
            ctx.enqueue(Port::Output, task)?;
            return Ok(frame);
        }

        if self.output_timeout != Some(timeout) {
            ctx.set_output_timeout(timeout)?;
            self.output_timeout = Some(timeout);
        }
        ctx.get_frame()
    }

    fn fetch_frame(&mut self, timeout: Timeout) -> Result<DecodeStatus> {
        let mpp_frame = match self.next_hw_frame(timeout)? {
            Some(frame) => frame,
            None => return Ok(DecodeStatus::Again),
        };
        let info = &mpp_frame.info;
        let task_mode = self.codec.uses_task_queue();

        if info.eos {
            tracing::info!("Decoder reached end of stream after {} frames", self.counters.frames_out);
            self.eos_reached = true;
            return Ok(DecodeStatus::Eof);
        }
        if info.discard {
            tracing::warn!("Decoder discarded a frame (pts {})", info.pts);
            self.counters.discards += 1;
            return Ok(DecodeStatus::Again);
        }
        if info.errinfo {
            tracing::error!("Decoder flagged frame with pts {} as corrupt", info.pts);
            self.counters.errors += 1;
            return Err(RkError::CorruptFrame);
        }

        // MJPEG has no info-change event; its first picture defines the pool
        if info.info_change || (task_mode && self.hw_frames.is_none()) {
            self.apply_info_change(info)?;
            if !task_mode {
                return Ok(DecodeStatus::Again);
            }
        }

        let buffer = match &mpp_frame.buffer {
            Some(buffer) => buffer.clone(),
            None => return Ok(DecodeStatus::Again),
        };
        let frame = self.wrap_frame(info, buffer)?;
        self.counters.frames_out += 1;
        self.fps.tick();
        Ok(DecodeStatus::Frame(frame))
    }

    fn apply_info_change(&mut self, info: &FrameInfo) -> Result<()> {
        self.counters.info_changes += 1;
        self.coded_size = (align(info.width, 64), align(info.height, 64));

        if !self.codec.uses_task_queue() {
            self.shared.ctx.lock().acknowledge_info_change()?;
        }

        let mpp_format = MppFormat::from_raw(info.format)
            .ok_or_else(|| RkError::UnsupportedFormat(format!("MPP format {:#x}", info.format)))?;
        let entry = by_mpp(mpp_format).ok_or_else(|| RkError::UnsupportedFormat(format!("{:?}", mpp_format)))?;

        let width = if mpp_format == MppFormat::Yuv420Sp10Bit { info.hor_stride } else { info.width };
        self.hw_frames = Some(Arc::new(HwFramesContext::new(entry.pixel, width, info.ver_stride)));

        tracing::info!(
            "Stream geometry {}x{} (stride {}x{}, coded {}x{}) format {}",
            info.width,
            info.height,
            info.hor_stride,
            info.ver_stride,
            self.coded_size.0,
            self.coded_size.1,
            entry.pixel
        );
        Ok(())
    }

    fn wrap_frame(&self, info: &FrameInfo, buffer: MppBuffer) -> Result<Frame> {
        let mpp_format = MppFormat::from_raw(info.format)
            .ok_or_else(|| RkError::UnsupportedFormat(format!("MPP format {:#x}", info.format)))?;
        let entry = by_mpp(mpp_format).ok_or_else(|| RkError::UnsupportedFormat(format!("{:?}", mpp_format)))?;

        let mut frame = Frame::empty();
        frame.width = info.width;
        frame.height = info.height;
        frame.pts = Some(info.pts);
        frame.color = info.color;
        frame.interlaced = info.interlaced();
        frame.top_field_first = info.top_field_first();

        let (fd, size) = (buffer.fd(), buffer.size());
        let shared = self.shared.clone();
        map_buffer(
            &mut frame,
            entry,
            fd,
            size,
            info.hor_stride,
            info.ver_stride,
            Box::new(move |_| {
                drop(buffer);
                drop(shared);
            }),
        )?;
        frame.hw_frames = self.hw_frames.clone();
        Ok(frame)
    }

    // ------------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------------

    /// Drive the decoder until a frame, a retry or end of stream comes out.
    pub fn receive_frame(&mut self, source: &mut dyn PacketSource) -> Result<DecodeStatus> {
        if self.eos_reached {
            return Ok(DecodeStatus::Eof);
        }
        if self.draining {
            return self.fetch_frame(Timeout::Block);
        }

        let short_wait = Timeout::Millis(self.config.backpressure_timeout_ms);
        for _ in 0..self.config.max_attempts.max(1) {
            let packet = match self.pending.take() {
                Some(packet) => packet,
                None => match source.next_packet()? {
                    SourceStatus::Packet(packet) => packet,
                    SourceStatus::Again => return self.fetch_frame(Timeout::NonBlock),
                    SourceStatus::Eof => {
                        if self.send_eos()? {
                            return self.fetch_frame(Timeout::Block);
                        }
                        // input still full, keep output moving
                        return self.fetch_frame(short_wait);
                    }
                },
            };

            match self.send_packet(&packet) {
                Ok(Submit::Accepted) => {
                    if self.toggles.sync {
                        return self.fetch_frame(Timeout::Block);
                    }
                }
                Ok(Submit::Full) => {
                    self.pending = Some(packet);
                    match self.fetch_frame(short_wait)? {
                        DecodeStatus::Again => continue,
                        status => return Ok(status),
                    }
                }
                Err(e) => {
                    self.pending = Some(packet);
                    return Err(e);
                }
            }
        }
        Ok(DecodeStatus::Again)
    }

    /// Reset hardware state and start over, e.g. after a seek.
    pub fn flush(&mut self) -> Result<()> {
        tracing::info!("Flushing {}", self.codec.decoder_name());
        self.shared.ctx.lock().reset()?;
        self.pending = None;
        self.eos_reached = false;
        self.draining = false;
        self.fps.reset();
        self.counters.packets_in = 0;
        self.feed_extra_data()
    }

    /// Drop the session's reference. Hardware teardown waits for outstanding frames.
    pub fn close(self) {
        let outstanding = Arc::strong_count(&self.shared) - 1;
        tracing::info!(
            "Closing {} ({} frames decoded, {} still referenced)",
            self.codec.decoder_name(),
            self.counters.frames_out,
            outstanding
        );
    }

    pub fn info(&self) -> serde_json::Value {
        serde_json::json!({
            "decoder": self.codec.decoder_name(),
            "backend": self.backend,
            "packets_in": self.counters.packets_in,
            "frames_out": self.counters.frames_out,
            "discards": self.counters.discards,
            "errors": self.counters.errors,
            "info_changes": self.counters.info_changes,
            "coded_width": self.coded_size.0,
            "coded_height": self.coded_size.1,
            "pool": self.hw_frames.as_deref(),
            "draining": self.draining,
            "eos": self.eos_reached,
            "outstanding_frames": Arc::strong_count(&self.shared) - 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::format::PixelFormat;
    use crate::frame::{ColorMetadata, ColorRange, TRC_SMPTE2084};
    use crate::mpp::virtual_device::{VirtualMpp, VirtualMppConfig, MARK_DISCARD, MARK_ERROR};
    use crate::mpp::{MpiCmd, MPP_FRAME_FLAG_DEINTERLACED};
    use std::sync::atomic::Ordering;

    fn packets(n: usize) -> VecDeque<Packet> {
        (0..n).map(|i| Packet::new(format!("pic{}", i).into_bytes(), Some(1000 + i as i64))).collect()
    }

    fn open(backend: &VirtualMpp, config: DecoderConfig) -> DecoderSession {
        DecoderSession::open_with(backend, config, DiagnosticToggles::default()).unwrap()
    }

    /// Run until Eof, collecting frames and counting corrupt-frame errors
    fn drain(session: &mut DecoderSession, source: &mut dyn PacketSource) -> (Vec<Frame>, usize) {
        let (mut frames, mut errors) = (Vec::new(), 0);
        for _ in 0..1000 {
            match session.receive_frame(source) {
                Ok(DecodeStatus::Frame(f)) => frames.push(f),
                Ok(DecodeStatus::Again) => {}
                Ok(DecodeStatus::Eof) => return (frames, errors),
                Err(RkError::CorruptFrame) => errors += 1,
                Err(e) => panic!("unexpected error {}", e),
            }
        }
        panic!("decoder never reached Eof");
    }

    #[test]
    fn test_decode_to_eof() {
        let backend = VirtualMpp::default();
        let mut session = open(&backend, DecoderConfig::default());
        let mut source = packets(5);

        let (frames, _) = drain(&mut session, &mut source);
        assert_eq!(frames.len(), 5);
        let pts: Vec<_> = frames.iter().map(|f| f.pts).collect();
        assert_eq!(pts, (1000..1005).map(Some).collect::<Vec<_>>());

        // Eof is sticky until flush
        assert!(matches!(session.receive_frame(&mut source), Ok(DecodeStatus::Eof)));

        let pool = session.hw_frames().unwrap();
        assert_eq!(pool.sw_format, PixelFormat::Nv12);
        assert_eq!((pool.width, pool.height), (1920, 1088));
        assert_eq!(session.info()["coded_width"], 1920);
        assert_eq!(session.info()["coded_height"], 1088);
    }

    #[test]
    fn test_frames_carry_geometry() {
        let backend = VirtualMpp::default();
        let mut session = open(&backend, DecoderConfig::default());
        let (frames, _) = drain(&mut session, &mut packets(1));
        let frame = &frames[0];
        assert_eq!(frame.format, PixelFormat::DrmPrime);
        assert_eq!((frame.width, frame.height), (1920, 1080));
        let desc = frame.drm().unwrap().descriptor();
        assert_eq!(desc.primary_layer().planes()[1].offset, 1920 * 1088);
        assert!(frame.hw_frames.is_some());
    }

    #[test]
    fn test_flush_clears_eos() {
        let backend = VirtualMpp::default();
        let stats = backend.stats();
        let mut session = open(&backend, DecoderConfig::default());
        drain(&mut session, &mut packets(2));

        session.flush().unwrap();
        assert_eq!(stats.resets.load(Ordering::SeqCst), 1);

        let mut more = packets(1);
        let mut got_frame = false;
        for _ in 0..10 {
            match session.receive_frame(&mut more).unwrap() {
                DecodeStatus::Frame(_) => {
                    got_frame = true;
                    break;
                }
                DecodeStatus::Again => {}
                DecodeStatus::Eof => break,
            }
        }
        assert!(got_frame);
    }

    #[test]
    fn test_teardown_waits_for_last_frame() {
        let backend = VirtualMpp::default();
        let stats = backend.stats();
        let mut session = open(&backend, DecoderConfig::default());
        let (mut frames, _) = drain(&mut session, &mut packets(3));
        assert_eq!(frames.len(), 3);

        session.close();
        while frames.len() > 1 {
            frames.pop();
            assert_eq!(stats.contexts_destroyed.load(Ordering::SeqCst), 0);
            assert_eq!(stats.live_groups.load(Ordering::SeqCst), 1);
        }
        frames.pop();
        assert_eq!(stats.contexts_destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.live_groups.load(Ordering::SeqCst), 0);
        assert_eq!(stats.live_buffers.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_close_without_frames_destroys_once() {
        let backend = VirtualMpp::default();
        let stats = backend.stats();
        let session = open(&backend, DecoderConfig::default());
        session.close();
        assert_eq!(stats.contexts_destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backpressure_absorbed() {
        let backend = VirtualMpp::new(VirtualMppConfig { queue_capacity: 1, ..Default::default() });
        let stats = backend.stats();
        let mut session = open(&backend, DecoderConfig::default());
        let (frames, _) = drain(&mut session, &mut packets(4));
        assert_eq!(frames.len(), 4);
        assert!(stats.packets_rejected.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_discard_and_error_frames() {
        let backend = VirtualMpp::default();
        let mut session = open(&backend, DecoderConfig::default());
        let mut source: VecDeque<Packet> = vec![
            Packet::new(&b"pic0"[..], Some(1)),
            Packet::new(MARK_DISCARD, Some(2)),
            Packet::new(MARK_ERROR, Some(3)),
            Packet::new(&b"pic3"[..], Some(4)),
        ]
        .into();
        let (frames, errors) = drain(&mut session, &mut source);
        assert_eq!(frames.len(), 2);
        assert_eq!(errors, 1);
        assert_eq!(session.info()["discards"], 1);
        assert_eq!(session.info()["errors"], 1);
    }

    #[test]
    fn test_control_ordering() {
        let backend = VirtualMpp::default();
        let stats = backend.stats();
        let toggles = DiagnosticToggles { log_fps: false, sync: true };
        let _session = DecoderSession::open_with(&backend, DecoderConfig::default(), toggles).unwrap();
        assert_eq!(
            stats.commands(),
            vec![
                MpiCmd::DecSetParserFastMode,
                MpiCmd::DecSetExtBufGroup,
                MpiCmd::DecSetDisableError,
                MpiCmd::DecSetImmediateOut,
            ]
        );
    }

    #[test]
    fn test_sync_mode_returns_per_packet() {
        let backend = VirtualMpp::default();
        let toggles = DiagnosticToggles { log_fps: true, sync: true };
        let mut session = DecoderSession::open_with(&backend, DecoderConfig::default(), toggles).unwrap();
        let (frames, _) = drain(&mut session, &mut packets(3));
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn test_unsupported_codec() {
        let backend = VirtualMpp::new(VirtualMppConfig { unsupported: vec![CodingType::Vp8], ..Default::default() });
        let err = DecoderSession::open_with(&backend, DecoderConfig::new(CodecId::Vp8), DiagnosticToggles::default())
            .err()
            .unwrap();
        assert!(matches!(err, RkError::UnsupportedCodec(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(backend.stats().contexts_created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_init_failure_rolls_back() {
        let backend = VirtualMpp::new(VirtualMppConfig { fail_buffer_group: true, ..Default::default() });
        let stats = backend.stats();
        let err = DecoderSession::open_with(&backend, DecoderConfig::default(), DiagnosticToggles::default())
            .err()
            .unwrap();
        match err {
            RkError::Init { stage, .. } => assert_eq!(stage, "buffer group"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(stats.contexts_created.load(Ordering::SeqCst), 1);
        assert_eq!(stats.contexts_destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mjpeg_needs_size() {
        let backend = VirtualMpp::default();
        let res = DecoderSession::open_with(&backend, DecoderConfig::new(CodecId::Mjpeg), DiagnosticToggles::default());
        assert!(matches!(res, Err(RkError::Config(_))));
    }

    #[test]
    fn test_mjpeg_task_queue() {
        let backend = VirtualMpp::new(VirtualMppConfig { width: 640, height: 480, ..Default::default() });
        let stats = backend.stats();
        let config = DecoderConfig::new(CodecId::Mjpeg).with_size(640, 480);
        let mut session = open(&backend, config);
        // more packets than task slots
        let (frames, _) = drain(&mut session, &mut packets(6));
        assert_eq!(frames.len(), 6);
        assert_eq!(stats.info_change_acks.load(Ordering::SeqCst), 0);
        assert!(!stats.commands().contains(&MpiCmd::DecSetExtBufGroup));

        let fd = frames[2].drm().unwrap().fd();
        assert!(fd >= 0);
        assert_eq!(frames[2].pts, Some(1002));
        assert_eq!(session.hw_frames().unwrap().width, 640);
        drop(frames);
        session.close();
        assert_eq!(stats.live_buffers.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_mjpeg_empty_stream() {
        let backend = VirtualMpp::new(VirtualMppConfig { width: 640, height: 480, ..Default::default() });
        let config = DecoderConfig::new(CodecId::Mjpeg).with_size(640, 480);
        let mut session = open(&backend, config);
        let (frames, errors) = drain(&mut session, &mut VecDeque::<Packet>::new());
        assert!(frames.is_empty());
        assert_eq!(errors, 0);
        // the end-of-stream marker never defines a pool
        assert!(session.hw_frames().is_none());
        assert_eq!(session.info()["info_changes"], 0);
    }

    #[test]
    fn test_mjpeg_discard_and_error() {
        let backend = VirtualMpp::new(VirtualMppConfig { width: 640, height: 480, ..Default::default() });
        let stats = backend.stats();
        let config = DecoderConfig::new(CodecId::Mjpeg).with_size(640, 480);
        let mut session = open(&backend, config);
        let mut source: VecDeque<Packet> = vec![
            Packet::new(MARK_ERROR, Some(1)),
            Packet::new(&b"pic1"[..], Some(2)),
            Packet::new(MARK_DISCARD, Some(3)),
            Packet::new(&b"pic3"[..], Some(4)),
        ]
        .into();
        let (frames, errors) = drain(&mut session, &mut source);
        let pts: Vec<_> = frames.iter().map(|f| f.pts).collect();
        assert_eq!(pts, vec![Some(2), Some(4)]);
        assert_eq!(errors, 1);
        assert_eq!(session.info()["discards"], 1);
        assert_eq!(session.info()["errors"], 1);

        drop(frames);
        session.close();
        assert_eq!(stats.live_buffers.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pts_fallback_to_counter() {
        let backend = VirtualMpp::default();
        let mut session = open(&backend, DecoderConfig::default());
        let mut source: VecDeque<Packet> = vec![
            Packet::new(&b"a"[..], Some(500)),
            Packet::new(&b"b"[..], None),
            Packet::new(&b"c"[..], Some(0)),
        ]
        .into();
        let (frames, _) = drain(&mut session, &mut source);
        let pts: Vec<_> = frames.iter().map(|f| f.pts).collect();
        assert_eq!(pts, vec![Some(500), Some(1), Some(2)]);
    }

    #[test]
    fn test_frame_metadata() {
        let color = ColorMetadata { range: ColorRange::Limited, primaries: 9, trc: TRC_SMPTE2084, space: 9 };
        let backend = VirtualMpp::new(VirtualMppConfig { mode: MPP_FRAME_FLAG_DEINTERLACED, color, ..Default::default() });
        let mut session = open(&backend, DecoderConfig::default());
        let (frames, _) = drain(&mut session, &mut packets(1));
        assert!(frames[0].interlaced);
        assert!(!frames[0].top_field_first);
        assert_eq!(frames[0].color, color);
        assert!(frames[0].color.is_hdr());
    }

    #[test]
    fn test_ten_bit_pool_uses_stride() {
        let backend = VirtualMpp::new(VirtualMppConfig { format: MppFormat::Yuv420Sp10Bit, ..Default::default() });
        let mut session = open(&backend, DecoderConfig::new(CodecId::Hevc));
        let (frames, _) = drain(&mut session, &mut packets(1));
        assert_eq!(frames.len(), 1);
        let pool = session.hw_frames().unwrap();
        assert_eq!(pool.sw_format, PixelFormat::Yuv420SpRk10);
        assert_eq!(pool.width, 2400);
    }

    #[test]
    fn test_extradata_prefeed() {
        let backend = VirtualMpp::default();
        let stats = backend.stats();
        let extra = b"config:sps-pps".to_vec();

        let _h264 = open(&backend, DecoderConfig::new(CodecId::H264).with_extra_data(extra.clone()));
        assert_eq!(stats.packets_accepted.load(Ordering::SeqCst), 1);

        let _av1 = open(&backend, DecoderConfig::new(CodecId::Av1).with_extra_data(extra));
        assert_eq!(stats.packets_accepted.load(Ordering::SeqCst), 1);
    }

    struct Trickle {
        queue: VecDeque<Packet>,
        stalls: usize,
    }

    impl PacketSource for Trickle {
        fn next_packet(&mut self) -> Result<SourceStatus> {
            if self.stalls > 0 {
                self.stalls -= 1;
                return Ok(SourceStatus::Again);
            }
            self.queue.next_packet()
        }
    }

    #[test]
    fn test_source_again_is_retry() {
        let backend = VirtualMpp::default();
        let mut session = open(&backend, DecoderConfig::default());
        let mut source = Trickle { queue: packets(2), stalls: 3 };
        for _ in 0..3 {
            assert!(matches!(session.receive_frame(&mut source), Ok(DecodeStatus::Again)));
        }
        let (frames, _) = drain(&mut session, &mut source);
        assert_eq!(frames.len(), 2);
    }
}
