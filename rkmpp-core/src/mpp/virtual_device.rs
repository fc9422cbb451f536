// VIRTUAL MPP - Deterministic in-process decoder
//
// Behaves like the MPP decoder as seen from the session, without hardware:
// • the first picture packet is preceded by an info-change frame, and output
//   stalls until the change is acknowledged
// • one output frame per picture packet, in submission order
// • a bounded input queue that reports Full when output is not drained
// • an EOS packet queues an EOS frame behind everything pending
// • MJPEG runs through the task queue (dequeue/enqueue on input and output)
//
// Payload prefixes steer the outcome of a packet: MARK_CONFIG is consumed
// silently, MARK_DISCARD yields a discard frame, MARK_ERROR an errinfo frame.
// The first bytes of every picture payload are copied into its frame buffer.

use bytes::Bytes;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{
    BufferGroup, CodingType, ControlParam, CtxType, DmaBuffer, FrameInfo, MpiCmd, MppBackend,
    MppBuffer, MppDevice, MppFrame, MppPacket, MppTask, Port, Submit, Timeout, MPP_ERR_NULL_PTR,
    MPP_ERR_VALUE, MPP_NOK,
};
use crate::error::{Result, RkError};
use crate::format::{by_mpp, MppFormat, PlaneLayout};
use crate::frame::ColorMetadata;

pub const MARK_CONFIG: &[u8] = b"config";
pub const MARK_DISCARD: &[u8] = b"discard";
pub const MARK_ERROR: &[u8] = b"errinfo";

/// Bytes of each picture payload copied into its output buffer
const STAMP_LEN: usize = 16;

static NEXT_FD: AtomicI32 = AtomicI32::new(100);

// ============================================================================
// Configuration and statistics
// ============================================================================

#[derive(Debug, Clone)]
pub struct VirtualMppConfig {
    pub width: u32,
    pub height: u32,
    pub format: MppFormat,
    pub color: ColorMetadata,
    /// Raw frame mode word (field order bits)
    pub mode: u32,
    /// Picture packets accepted before output must be drained
    pub queue_capacity: usize,
    pub unsupported: Vec<CodingType>,
    /// Cap on live buffers per group; further `get` calls fail
    pub max_buffers: Option<usize>,
    pub fail_buffer_group: bool,
}

impl Default for VirtualMppConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            format: MppFormat::Yuv420Sp,
            color: ColorMetadata::default(),
            mode: 0,
            queue_capacity: 4,
            unsupported: Vec::new(),
            max_buffers: None,
            fail_buffer_group: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct VirtualMppStats {
    pub contexts_created: AtomicUsize,
    pub contexts_destroyed: AtomicUsize,
    pub resets: AtomicUsize,
    pub packets_accepted: AtomicUsize,
    pub packets_rejected: AtomicUsize,
    pub info_change_acks: AtomicUsize,
    pub live_buffers: AtomicUsize,
    pub live_groups: AtomicUsize,
    commands: Mutex<Vec<MpiCmd>>,
}

impl VirtualMppStats {
    pub fn commands(&self) -> Vec<MpiCmd> {
        self.commands.lock().clone()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "contexts_created": self.contexts_created.load(Ordering::SeqCst),
            "contexts_destroyed": self.contexts_destroyed.load(Ordering::SeqCst),
            "resets": self.resets.load(Ordering::SeqCst),
            "packets_accepted": self.packets_accepted.load(Ordering::SeqCst),
            "packets_rejected": self.packets_rejected.load(Ordering::SeqCst),
            "info_change_acks": self.info_change_acks.load(Ordering::SeqCst),
            "live_buffers": self.live_buffers.load(Ordering::SeqCst),
            "live_groups": self.live_groups.load(Ordering::SeqCst),
        })
    }
}

// ============================================================================
// Buffers and groups
// ============================================================================

struct VirtualBuffer {
    fd: c_int,
    data: Mutex<Vec<u8>>,
    stats: Arc<VirtualMppStats>,
    group_live: Arc<AtomicUsize>,
}

impl DmaBuffer for VirtualBuffer {
    fn fd(&self) -> c_int {
        self.fd
    }

    fn size(&self) -> usize {
        self.data.lock().len()
    }

    fn write(&self, offset: usize, src: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        let end = offset
            .checked_add(src.len())
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                RkError::BufferGeometry(format!("write of {} at {} overflows {}", src.len(), offset, data.len()))
            })?;
        data[offset..end].copy_from_slice(src);
        Ok(())
    }

    fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        let data = self.data.lock();
        let end = offset
            .checked_add(out.len())
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                RkError::BufferGeometry(format!("read of {} at {} overflows {}", out.len(), offset, data.len()))
            })?;
        out.copy_from_slice(&data[offset..end]);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VirtualBuffer {
    fn drop(&mut self) {
        self.stats.live_buffers.fetch_sub(1, Ordering::SeqCst);
        self.group_live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct VirtualGroup {
    stats: Arc<VirtualMppStats>,
    live: Arc<AtomicUsize>,
    max_buffers: Option<usize>,
}

impl VirtualGroup {
    fn new(stats: Arc<VirtualMppStats>, max_buffers: Option<usize>) -> Self {
        stats.live_groups.fetch_add(1, Ordering::SeqCst);
        Self { stats, live: Arc::new(AtomicUsize::new(0)), max_buffers }
    }

    pub fn live_buffers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl BufferGroup for VirtualGroup {
    fn get(&self, size: usize) -> Result<MppBuffer> {
        if let Some(max) = self.max_buffers {
            if self.live.load(Ordering::SeqCst) >= max {
                return Err(RkError::Allocation(format!("virtual group exhausted ({} buffers)", max)));
            }
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        self.stats.live_buffers.fetch_add(1, Ordering::SeqCst);
        Ok(MppBuffer::new(Arc::new(VirtualBuffer {
            fd: NEXT_FD.fetch_add(1, Ordering::SeqCst),
            data: Mutex::new(vec![0u8; size]),
            stats: self.stats.clone(),
            group_live: self.live.clone(),
        })))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VirtualGroup {
    fn drop(&mut self) {
        self.stats.live_groups.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Backend
// ============================================================================

pub struct VirtualMpp {
    config: VirtualMppConfig,
    stats: Arc<VirtualMppStats>,
}

impl VirtualMpp {
    pub fn new(config: VirtualMppConfig) -> Self {
        Self { config, stats: Arc::new(VirtualMppStats::default()) }
    }

    pub fn stats(&self) -> Arc<VirtualMppStats> {
        self.stats.clone()
    }
}

impl Default for VirtualMpp {
    fn default() -> Self {
        Self::new(VirtualMppConfig::default())
    }
}

impl MppBackend for VirtualMpp {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn check_support(&self, ctx: CtxType, coding: CodingType) -> bool {
        ctx == CtxType::Dec && !self.config.unsupported.contains(&coding)
    }

    fn create(&self) -> Result<Box<dyn MppDevice>> {
        self.stats.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(VirtualDevice::new(self.config.clone(), self.stats.clone())))
    }

    fn buffer_group(&self, _flags: u32) -> Result<Arc<dyn BufferGroup>> {
        if self.config.fail_buffer_group {
            return Err(RkError::device("mpp_buffer_group_get", MPP_NOK));
        }
        Ok(Arc::new(VirtualGroup::new(self.stats.clone(), self.config.max_buffers)))
    }
}

// ============================================================================
// Device
// ============================================================================

enum Pending {
    InfoChange,
    Picture { pts: i64, payload: Bytes },
    Discard { pts: i64 },
    Error { pts: i64 },
    Eos,
}

fn align(v: u32, a: u32) -> u32 {
    (v + a - 1) / a * a
}

/// (hor_stride in bytes, ver_stride in rows, buffer bytes) for one picture
pub fn picture_geometry(format: MppFormat, width: u32, height: u32) -> (u32, u32, usize) {
    let ver = align(height, 16);
    let entry = match by_mpp(format) {
        Some(entry) => entry,
        None => {
            let hor = align(width, 16) * 2;
            return (hor, ver, hor as usize * ver as usize);
        }
    };
    let hor = entry.rga.pitch_for_stride(align(width, 16));
    let (h, v) = (hor as usize, ver as usize);
    let size = match entry.rga.layout() {
        PlaneLayout::SemiPlanar if entry.pixel.chroma_shift().1 == 1 => h * v + h * ((v + 1) / 2),
        PlaneLayout::SemiPlanar => h * v * 2,
        PlaneLayout::Planar420 => h * v + 2 * ((h + 1) / 2) * ((v + 1) / 2),
        PlaneLayout::Planar422 => h * v + 2 * ((h + 1) / 2) * v,
        PlaneLayout::Packed => h * v,
    };
    (hor, ver, size)
}

struct VirtualDevice {
    config: VirtualMppConfig,
    stats: Arc<VirtualMppStats>,
    coding: Option<CodingType>,
    group: Option<Arc<dyn BufferGroup>>,
    pending: VecDeque<Pending>,
    info_sent: bool,
    awaiting_ack: bool,
    timeout: Timeout,
    immediate_out: bool,
    free_slots: usize,
    next_task: usize,
    done: VecDeque<MppTask>,
    destroyed: bool,
}

impl VirtualDevice {
    fn new(config: VirtualMppConfig, stats: Arc<VirtualMppStats>) -> Self {
        let free_slots = config.queue_capacity;
        Self {
            config,
            stats,
            coding: None,
            group: None,
            pending: VecDeque::new(),
            info_sent: false,
            awaiting_ack: false,
            timeout: Timeout::NonBlock,
            immediate_out: false,
            free_slots,
            next_task: 0,
            done: VecDeque::new(),
            destroyed: false,
        }
    }

    fn in_flight(&self) -> usize {
        self.pending
            .iter()
            .filter(|p| matches!(p, Pending::Picture { .. } | Pending::Discard { .. } | Pending::Error { .. }))
            .count()
    }

    fn base_info(&self) -> FrameInfo {
        let (hor, ver, _) = picture_geometry(self.config.format, self.config.width, self.config.height);
        FrameInfo {
            width: self.config.width,
            height: self.config.height,
            hor_stride: hor,
            ver_stride: ver,
            format: self.config.format.raw(),
            mode: self.config.mode,
            color: self.config.color,
            ..FrameInfo::default()
        }
    }

    fn decode_into(&self, buffer: &MppBuffer, payload: &[u8]) -> Result<()> {
        let n = payload.len().min(STAMP_LEN).min(buffer.size());
        buffer.write(0, &payload[..n])
    }

    fn picture(&self, pts: i64, payload: &[u8]) -> Result<MppFrame> {
        let group = self
            .group
            .as_ref()
            .ok_or_else(|| RkError::device("decode_get_frame", MPP_ERR_NULL_PTR))?;
        let (_, _, size) = picture_geometry(self.config.format, self.config.width, self.config.height);
        let buffer = group.get(size)?;
        self.decode_into(&buffer, payload)?;
        let info = FrameInfo { pts, ..self.base_info() };
        Ok(MppFrame::new(info, Some(buffer)))
    }
}

impl MppDevice for VirtualDevice {
    fn init(&mut self, ctx: CtxType, coding: CodingType) -> Result<()> {
        if ctx != CtxType::Dec || self.config.unsupported.contains(&coding) {
            return Err(RkError::device("mpp_init", MPP_NOK));
        }
        self.coding = Some(coding);
        Ok(())
    }

    fn control(&mut self, cmd: MpiCmd, param: ControlParam) -> Result<()> {
        self.stats.commands.lock().push(cmd);
        match (cmd, param) {
            (MpiCmd::SetOutputTimeout, ControlParam::Timeout(t)) => self.timeout = t,
            (MpiCmd::DecSetExtBufGroup, ControlParam::Group(group)) => self.group = Some(group),
            (MpiCmd::DecSetExtBufGroup, _) => {
                return Err(RkError::device("control(EXT_BUF_GROUP)", MPP_ERR_VALUE));
            }
            (MpiCmd::DecSetInfoChangeReady, _) => {
                self.awaiting_ack = false;
                self.stats.info_change_acks.fetch_add(1, Ordering::SeqCst);
            }
            (MpiCmd::DecSetImmediateOut, _) => self.immediate_out = true,
            _ => {}
        }
        Ok(())
    }

    fn put_packet(&mut self, packet: &MppPacket) -> Submit {
        if self.destroyed || self.coding.is_none() {
            return Submit::Full;
        }
        if packet.eos {
            self.pending.push_back(Pending::Eos);
            return Submit::Accepted;
        }
        if packet.data.starts_with(MARK_CONFIG) {
            self.stats.packets_accepted.fetch_add(1, Ordering::SeqCst);
            return Submit::Accepted;
        }
        if self.in_flight() >= self.config.queue_capacity {
            self.stats.packets_rejected.fetch_add(1, Ordering::SeqCst);
            return Submit::Full;
        }
        if !self.info_sent {
            self.pending.push_back(Pending::InfoChange);
            self.info_sent = true;
        }
        let pts = packet.pts;
        let unit = if packet.data.starts_with(MARK_DISCARD) {
            Pending::Discard { pts }
        } else if packet.data.starts_with(MARK_ERROR) {
            Pending::Error { pts }
        } else {
            Pending::Picture { pts, payload: packet.data.clone() }
        };
        self.pending.push_back(unit);
        self.stats.packets_accepted.fetch_add(1, Ordering::SeqCst);
        Submit::Accepted
    }

    fn get_frame(&mut self) -> Result<Option<MppFrame>> {
        if self.awaiting_ack || self.pending.is_empty() {
            return Ok(None);
        }
        let frame = match self.pending.pop_front() {
            Some(Pending::InfoChange) => {
                self.awaiting_ack = true;
                MppFrame::new(FrameInfo { info_change: true, ..self.base_info() }, None)
            }
            Some(Pending::Picture { pts, payload }) => self.picture(pts, &payload)?,
            Some(Pending::Discard { pts }) => {
                MppFrame::new(FrameInfo { pts, discard: true, ..self.base_info() }, None)
            }
            Some(Pending::Error { pts }) => {
                MppFrame::new(FrameInfo { pts, errinfo: true, ..self.base_info() }, None)
            }
            Some(Pending::Eos) => MppFrame::new(FrameInfo { eos: true, ..self.base_info() }, None),
            None => return Ok(None),
        };
        Ok(Some(frame))
    }

    fn poll(&mut self, port: Port, _timeout: Timeout) -> Result<bool> {
        Ok(match port {
            Port::Input => self.free_slots > 0,
            Port::Output => !self.done.is_empty(),
        })
    }

    fn dequeue(&mut self, port: Port) -> Result<Option<MppTask>> {
        match port {
            Port::Input => {
                if self.free_slots == 0 {
                    return Ok(None);
                }
                self.free_slots -= 1;
                self.next_task += 1;
                Ok(Some(MppTask::new(self.next_task)))
            }
            Port::Output => Ok(self.done.pop_front()),
        }
    }

    fn enqueue(&mut self, port: Port, mut task: MppTask) -> Result<()> {
        if port == Port::Output {
            self.free_slots += 1;
            return Ok(());
        }
        match (task.packet.take(), task.frame.take()) {
            (None, None) => {
                // Slot handed back unused
                self.free_slots += 1;
                Ok(())
            }
            (Some(packet), _) if packet.eos => {
                let info = FrameInfo { eos: true, ..self.base_info() };
                task.frame = Some(MppFrame::new(info, None));
                self.done.push_back(task);
                Ok(())
            }
            (Some(packet), Some(slot)) => {
                let buffer = slot
                    .buffer
                    .ok_or_else(|| RkError::device("enqueue", MPP_ERR_NULL_PTR))?;
                let payload = match &packet.buffer {
                    Some(src) => {
                        let mut bytes = vec![0u8; packet.len().min(src.size())];
                        src.read(0, &mut bytes)?;
                        Bytes::from(bytes)
                    }
                    None => packet.data.clone(),
                };
                // marker payloads come back flagged, the slot buffer still attached
                let discard = payload.starts_with(MARK_DISCARD);
                let errinfo = payload.starts_with(MARK_ERROR);
                if !discard && !errinfo {
                    self.decode_into(&buffer, &payload)?;
                }
                self.stats.packets_accepted.fetch_add(1, Ordering::SeqCst);
                let (hor, ver) = (align(self.config.width, 16), align(self.config.height, 16));
                let info = FrameInfo {
                    pts: packet.pts,
                    discard,
                    errinfo,
                    hor_stride: hor,
                    ver_stride: ver,
                    format: MppFormat::Yuv420Sp.raw(),
                    ..self.base_info()
                };
                task.frame = Some(MppFrame::new(info, Some(buffer)));
                self.done.push_back(task);
                Ok(())
            }
            _ => {
                self.free_slots += 1;
                Err(RkError::device("enqueue", MPP_ERR_VALUE))
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.pending.clear();
        self.awaiting_ack = false;
        self.done.clear();
        self.free_slots = self.config.queue_capacity;
        self.stats.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.pending.clear();
        self.done.clear();
        self.group = None;
        self.stats.contexts_destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(config: VirtualMppConfig) -> (VirtualMpp, Box<dyn MppDevice>, Arc<dyn BufferGroup>) {
        let backend = VirtualMpp::new(config);
        let mut dev = backend.create().unwrap();
        dev.init(CtxType::Dec, CodingType::Avc).unwrap();
        let group = backend.buffer_group(0).unwrap();
        dev.control(MpiCmd::DecSetExtBufGroup, ControlParam::Group(group.clone())).unwrap();
        (backend, dev, group)
    }

    #[test]
    fn test_info_change_gates_output() {
        let (_backend, mut dev, _group) = device(VirtualMppConfig::default());
        assert_eq!(dev.put_packet(&MppPacket::new(Bytes::from_static(b"pic0"), 1)), Submit::Accepted);

        let first = dev.get_frame().unwrap().unwrap();
        assert!(first.info.info_change);
        assert!(dev.get_frame().unwrap().is_none());

        dev.control(MpiCmd::DecSetInfoChangeReady, ControlParam::None).unwrap();
        let pic = dev.get_frame().unwrap().unwrap();
        assert_eq!(pic.info.pts, 1);
        let mut stamp = [0u8; 4];
        pic.buffer.as_ref().unwrap().read(0, &mut stamp).unwrap();
        assert_eq!(&stamp, b"pic0");
    }

    #[test]
    fn test_backpressure_and_eos() {
        let config = VirtualMppConfig { queue_capacity: 2, ..Default::default() };
        let (_backend, mut dev, _group) = device(config);
        let pkt = MppPacket::new(Bytes::from_static(b"x"), 0);
        assert_eq!(dev.put_packet(&pkt), Submit::Accepted);
        assert_eq!(dev.put_packet(&pkt), Submit::Accepted);
        assert_eq!(dev.put_packet(&pkt), Submit::Full);
        assert_eq!(dev.put_packet(&MppPacket::eos()), Submit::Accepted);

        let (mut pictures, mut eos_seen) = (0, false);
        while let Some(f) = dev.get_frame().unwrap() {
            if f.info.info_change {
                dev.control(MpiCmd::DecSetInfoChangeReady, ControlParam::None).unwrap();
            } else if f.info.eos {
                eos_seen = true;
            } else {
                pictures += 1;
            }
        }
        assert_eq!(pictures, 2);
        assert!(eos_seen);
    }

    #[test]
    fn test_group_cap_and_live_counts() {
        let backend = VirtualMpp::new(VirtualMppConfig { max_buffers: Some(1), ..Default::default() });
        let stats = backend.stats();
        let group = backend.buffer_group(0).unwrap();
        let a = group.get(64).unwrap();
        assert!(group.get(64).is_err());
        assert_eq!(stats.live_buffers.load(Ordering::SeqCst), 1);
        drop(group);
        // buffer outlives its group
        assert_eq!(stats.live_groups.load(Ordering::SeqCst), 0);
        a.write(0, &[1, 2, 3]).unwrap();
        drop(a);
        assert_eq!(stats.live_buffers.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_picture_geometry() {
        let (hor, ver, size) = picture_geometry(MppFormat::Yuv420Sp, 1920, 1080);
        assert_eq!((hor, ver), (1920, 1088));
        assert_eq!(size, 1920 * 1088 * 3 / 2);
        let (hor, _, _) = picture_geometry(MppFormat::Yuv420Sp10Bit, 1920, 1080);
        assert_eq!(hor, 2400);
    }
}
