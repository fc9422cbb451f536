//! # MPP - Rockchip Media Process Platform boundary
//!
//! The decoder session talks to MPP only through the traits in this module:
//!
//! ```text
//! ┌────────────┐ create   ┌───────────┐ put_packet / get_frame ┌──────────┐
//! │ MppBackend │────────► │ MppDevice │◄──────────────────────►│ session  │
//! └────────────┘          └───────────┘ poll/dequeue/enqueue   └──────────┘
//!       │ buffer_group          ▲ control(EXT_BUF_GROUP)
//!       ▼                       │
//! ┌─────────────┐  get   ┌───────────┐
//! │ BufferGroup │──────► │ MppBuffer │ (DMA fd, refcounted)
//! └─────────────┘        └───────────┘
//! ```
//!
//! `ffi` binds librockchip_mpp at runtime; `virtual_device` is a deterministic
//! in-process stand-in used by tests and the self-test tool.

pub mod context;
pub mod ffi;
pub mod virtual_device;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::os::raw::c_int;
use std::sync::Arc;

use crate::error::{Result, RkError};
use crate::frame::ColorMetadata;

pub use context::MppContext;

// ============================================================================
// Return codes
// ============================================================================

pub const MPP_OK: i32 = 0;
pub const MPP_NOK: i32 = -1;
pub const MPP_ERR_UNKNOW: i32 = -2;
pub const MPP_ERR_NULL_PTR: i32 = -3;
pub const MPP_ERR_MALLOC: i32 = -4;
pub const MPP_ERR_VALUE: i32 = -6;
pub const MPP_ERR_TIMEOUT: i32 = -8;
pub const MPP_ERR_PERM: i32 = -9;

// Buffer group allocation type
pub const MPP_BUFFER_TYPE_DRM: u32 = 3;
pub const MPP_BUFFER_FLAGS_DMA32: u32 = 0x0080_0000;

// Field order bits in the frame mode word
pub const MPP_FRAME_FLAG_FIELD_ORDER_MASK: u32 = 0x0000_000C;
pub const MPP_FRAME_FLAG_TOP_FIRST: u32 = 0x0000_0004;
pub const MPP_FRAME_FLAG_BOT_FIRST: u32 = 0x0000_0008;
pub const MPP_FRAME_FLAG_DEINTERLACED: u32 = 0x0000_000C;

// ============================================================================
// Enumerations
// ============================================================================

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodingType {
    Mpeg2 = 2,
    H263 = 3,
    Mpeg4 = 4,
    Avc = 7,
    Mjpeg = 8,
    Vp8 = 9,
    Vp9 = 10,
    Hevc = 0x0100_0004,
    Av1 = 0x0100_0008,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtxType {
    Dec = 0,
    Enc = 1,
}

/// Control commands the session uses. Each has a named wrapper on `MppContext`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MpiCmd {
    SetOutputTimeout = 0x0020_0006,
    DecSetExtBufGroup = 0x0031_0002,
    DecSetInfoChangeReady = 0x0031_0003,
    DecSetParserFastMode = 0x0031_0006,
    DecSetDisableError = 0x0031_000b,
    DecSetImmediateOut = 0x0031_000c,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Input = 0,
    Output = 1,
}

/// Poll / output timeout. Maps onto MPP's -1 / 0 / milliseconds convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeout {
    Block,
    NonBlock,
    Millis(u32),
}

impl Timeout {
    pub fn raw(&self) -> i64 {
        match self {
            Self::Block => -1,
            Self::NonBlock => 0,
            Self::Millis(ms) => *ms as i64,
        }
    }
}

// ============================================================================
// Buffers
// ============================================================================

/// One DMA-capable allocation. Dropping the last `MppBuffer` returns it to its group.
pub trait DmaBuffer: Send + Sync {
    fn fd(&self) -> c_int;
    fn size(&self) -> usize;
    fn write(&self, offset: usize, data: &[u8]) -> Result<()>;
    fn read(&self, offset: usize, out: &mut [u8]) -> Result<()>;
    fn as_any(&self) -> &dyn Any;
}

#[derive(Clone)]
pub struct MppBuffer(Arc<dyn DmaBuffer>);

impl MppBuffer {
    pub fn new(inner: Arc<dyn DmaBuffer>) -> Self {
        Self(inner)
    }

    pub fn fd(&self) -> c_int {
        self.0.fd()
    }

    pub fn size(&self) -> usize {
        self.0.size()
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.0.write(offset, data)
    }

    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.0.read(offset, out)
    }

    pub fn inner(&self) -> &dyn DmaBuffer {
        self.0.as_ref()
    }

    pub fn same(&self, other: &MppBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for MppBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MppBuffer")
            .field("fd", &self.fd())
            .field("size", &self.size())
            .finish()
    }
}

/// Driver-managed pool of DMA buffers. Dropping the last handle releases the
/// group; buffers already handed out keep their memory until they drop too.
pub trait BufferGroup: Send + Sync {
    fn get(&self, size: usize) -> Result<MppBuffer>;
    fn as_any(&self) -> &dyn Any;
}

/// Copy `data` into a fresh buffer from `group`.
pub fn buffer_with_data(group: &dyn BufferGroup, data: &[u8]) -> Result<MppBuffer> {
    let buffer = group.get(data.len().max(1))?;
    buffer.write(0, data)?;
    Ok(buffer)
}

// ============================================================================
// Packets, frames, tasks
// ============================================================================

#[derive(Debug, Clone)]
pub struct MppPacket {
    pub data: Bytes,
    pub pts: i64,
    pub eos: bool,
    /// Set when the payload already lives in a DMA buffer (task mode)
    pub buffer: Option<MppBuffer>,
}

impl MppPacket {
    pub fn new(data: Bytes, pts: i64) -> Self {
        Self { data, pts, eos: false, buffer: None }
    }

    pub fn eos() -> Self {
        Self { data: Bytes::new(), pts: 0, eos: true, buffer: None }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Everything the session reads from a decoded MPP frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub hor_stride: u32,
    pub ver_stride: u32,
    /// Raw format word, flag bits included
    pub format: u32,
    pub pts: i64,
    pub mode: u32,
    pub eos: bool,
    pub discard: bool,
    pub errinfo: bool,
    pub info_change: bool,
    pub color: ColorMetadata,
}

impl FrameInfo {
    pub fn interlaced(&self) -> bool {
        self.mode & MPP_FRAME_FLAG_FIELD_ORDER_MASK == MPP_FRAME_FLAG_DEINTERLACED
    }

    pub fn top_field_first(&self) -> bool {
        self.mode & MPP_FRAME_FLAG_FIELD_ORDER_MASK == MPP_FRAME_FLAG_TOP_FIRST
    }
}

/// Decoded frame. `handle` keeps the driver-side frame object alive until drop.
pub struct MppFrame {
    pub info: FrameInfo,
    pub buffer: Option<MppBuffer>,
    _handle: Option<Box<dyn Any + Send>>,
}

impl MppFrame {
    pub fn new(info: FrameInfo, buffer: Option<MppBuffer>) -> Self {
        Self { info, buffer, _handle: None }
    }

    pub(crate) fn with_handle(info: FrameInfo, buffer: Option<MppBuffer>, handle: Box<dyn Any + Send>) -> Self {
        Self { info, buffer, _handle: Some(handle) }
    }

    /// Empty output frame for task mode, decoded into `buffer`
    pub fn output_slot(buffer: MppBuffer) -> Self {
        Self::new(FrameInfo::default(), Some(buffer))
    }
}

impl std::fmt::Debug for MppFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MppFrame")
            .field("info", &self.info)
            .field("buffer", &self.buffer)
            .finish()
    }
}

/// Task-queue slot (MJPEG). `id` is opaque to everyone but the device.
#[derive(Debug)]
pub struct MppTask {
    pub(crate) id: usize,
    pub packet: Option<MppPacket>,
    pub frame: Option<MppFrame>,
}

impl MppTask {
    pub(crate) fn new(id: usize) -> Self {
        Self { id, packet: None, frame: None }
    }
}

// ============================================================================
// Device and backend
// ============================================================================

pub enum ControlParam {
    None,
    Int(i32),
    Timeout(Timeout),
    Group(Arc<dyn BufferGroup>),
}

impl std::fmt::Debug for ControlParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Int(v) => write!(f, "Int({})", v),
            Self::Timeout(t) => write!(f, "Timeout({:?})", t),
            Self::Group(_) => f.write_str("Group"),
        }
    }
}

/// Outcome of submitting one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    Accepted,
    /// Input queue full; try again after draining output
    Full,
}

/// One MPP context plus its API vtable. Not reentrant; the session serialises access.
pub trait MppDevice: Send {
    fn init(&mut self, ctx: CtxType, coding: CodingType) -> Result<()>;
    fn control(&mut self, cmd: MpiCmd, param: ControlParam) -> Result<()>;
    fn put_packet(&mut self, packet: &MppPacket) -> Submit;
    /// Ok(None) on timeout
    fn get_frame(&mut self) -> Result<Option<MppFrame>>;
    /// Ok(false) when nothing became ready within `timeout`
    fn poll(&mut self, port: Port, timeout: Timeout) -> Result<bool>;
    fn dequeue(&mut self, port: Port) -> Result<Option<MppTask>>;
    fn enqueue(&mut self, port: Port, task: MppTask) -> Result<()>;
    fn reset(&mut self) -> Result<()>;
    /// Release the context. Must be idempotent.
    fn destroy(&mut self);
}

pub trait MppBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn check_support(&self, ctx: CtxType, coding: CodingType) -> bool;
    fn create(&self) -> Result<Box<dyn MppDevice>>;
    fn buffer_group(&self, flags: u32) -> Result<Arc<dyn BufferGroup>>;
}

pub(crate) fn check(call: &'static str, code: i32) -> Result<()> {
    if code == MPP_OK {
        Ok(())
    } else {
        Err(RkError::device(call, code))
    }
}
