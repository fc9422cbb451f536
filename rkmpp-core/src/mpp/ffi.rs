// MPP FFI - librockchip_mpp via dynamic library loading
//
// Loads librockchip_mpp.so at runtime - no compile-time dependency.
// Only the decoder half of the API is bound.
//
// Ownership rules mirrored from the C API:
// • every MppBuffer we hold has its own reference (get or inc_ref), put on drop
// • every MppFrame we hold is deinit'ed on drop
// • packets are created per call and deinit'ed before returning, except in
//   task mode where MPP takes the input packet and hands it back via frame meta

use libc::{c_char, c_int, c_void, size_t};
use std::any::Any;
use std::ptr;
use std::sync::{Arc, OnceLock};

use super::{
    check, BufferGroup, CodingType, ControlParam, CtxType, DmaBuffer, FrameInfo, MpiCmd,
    MppBackend, MppBuffer, MppDevice, MppFrame, MppPacket, MppTask, Port, Submit, Timeout,
    MPP_ERR_TIMEOUT, MPP_OK,
};
use crate::error::{Result, RkError};
use crate::frame::{ColorMetadata, ColorRange};

// ============================================================================
// MPP Types (from rk_mpi.h / mpp_buffer.h / mpp_meta.h)
// ============================================================================

type MppRet = c_int;
type MppCtx = *mut c_void;
type MppParam = *mut c_void;
type MppPacketRaw = *mut c_void;
type MppFrameRaw = *mut c_void;
type MppBufferRaw = *mut c_void;
type MppBufferGroupRaw = *mut c_void;
type MppTaskRaw = *mut c_void;
type MppMetaRaw = *mut c_void;

const MPP_BUFFER_INTERNAL: c_int = 0;

const fn fourcc_meta(code: &[u8; 4]) -> u32 {
    (code[0] as u32) << 24 | (code[1] as u32) << 16 | (code[2] as u32) << 8 | code[3] as u32
}

const KEY_INPUT_PACKET: u32 = fourcc_meta(b"ipkt");
const KEY_OUTPUT_FRAME: u32 = fourcc_meta(b"ofrm");

const MODULE_TAG: &[u8] = b"rkmpp\0";
const CALLER: &[u8] = b"rkmpp_core\0";

#[repr(C)]
struct MppApi {
    size: u32,
    version: u32,
    decode: unsafe extern "C" fn(MppCtx, MppPacketRaw, *mut MppFrameRaw) -> MppRet,
    decode_put_packet: unsafe extern "C" fn(MppCtx, MppPacketRaw) -> MppRet,
    decode_get_frame: unsafe extern "C" fn(MppCtx, *mut MppFrameRaw) -> MppRet,
    encode: unsafe extern "C" fn(MppCtx, MppFrameRaw, *mut MppPacketRaw) -> MppRet,
    encode_put_frame: unsafe extern "C" fn(MppCtx, MppFrameRaw) -> MppRet,
    encode_get_packet: unsafe extern "C" fn(MppCtx, *mut MppPacketRaw) -> MppRet,
    isp: unsafe extern "C" fn(MppCtx, MppFrameRaw, MppFrameRaw) -> MppRet,
    isp_put_frame: unsafe extern "C" fn(MppCtx, MppFrameRaw) -> MppRet,
    isp_get_frame: unsafe extern "C" fn(MppCtx, *mut MppFrameRaw) -> MppRet,
    poll: unsafe extern "C" fn(MppCtx, c_int, c_int) -> MppRet,
    dequeue: unsafe extern "C" fn(MppCtx, c_int, *mut MppTaskRaw) -> MppRet,
    enqueue: unsafe extern "C" fn(MppCtx, c_int, MppTaskRaw) -> MppRet,
    reset: unsafe extern "C" fn(MppCtx) -> MppRet,
    control: unsafe extern "C" fn(MppCtx, u32, MppParam) -> MppRet,
    reserv: [u32; 16],
}

// ============================================================================
// Library Path Detection
// ============================================================================

fn get_mpp_path() -> &'static str {
    for path in &[
        "librockchip_mpp.so.1",
        "/usr/lib/aarch64-linux-gnu/librockchip_mpp.so.1",
        "/usr/lib/librockchip_mpp.so.1",
        "/usr/lib64/librockchip_mpp.so.1",
        "librockchip_mpp.so.0",
    ] {
        if std::path::Path::new(path).exists() || !path.contains('/') {
            return path;
        }
    }
    "librockchip_mpp.so"
}

// ============================================================================
// Function Types
// ============================================================================

type MppCreateFn = unsafe extern "C" fn(*mut MppCtx, *mut *mut MppApi) -> MppRet;
type MppInitFn = unsafe extern "C" fn(MppCtx, c_int, u32) -> MppRet;
type MppDestroyFn = unsafe extern "C" fn(MppCtx) -> MppRet;
type MppCheckSupportFn = unsafe extern "C" fn(c_int, u32) -> MppRet;

type GroupGetFn =
    unsafe extern "C" fn(*mut MppBufferGroupRaw, u32, c_int, *const c_char, *const c_char) -> MppRet;
type GroupPutFn = unsafe extern "C" fn(MppBufferGroupRaw) -> MppRet;
type BufferGetFn = unsafe extern "C" fn(
    MppBufferGroupRaw,
    *mut MppBufferRaw,
    size_t,
    *const c_char,
    *const c_char,
) -> MppRet;
type BufferRefFn = unsafe extern "C" fn(MppBufferRaw, *const c_char) -> MppRet;
type BufferFdFn = unsafe extern "C" fn(MppBufferRaw, *const c_char) -> c_int;
type BufferSizeFn = unsafe extern "C" fn(MppBufferRaw, *const c_char) -> size_t;
type BufferPtrFn = unsafe extern "C" fn(MppBufferRaw, *const c_char) -> *mut c_void;

type PacketInitFn = unsafe extern "C" fn(*mut MppPacketRaw, *mut c_void, size_t) -> MppRet;
type PacketInitWithBufferFn = unsafe extern "C" fn(*mut MppPacketRaw, MppBufferRaw) -> MppRet;
type PacketDeinitFn = unsafe extern "C" fn(*mut MppPacketRaw) -> MppRet;
type PacketSetI64Fn = unsafe extern "C" fn(MppPacketRaw, i64);
type PacketSetSizeFn = unsafe extern "C" fn(MppPacketRaw, size_t);
type PacketSetEosFn = unsafe extern "C" fn(MppPacketRaw) -> MppRet;

type FrameInitFn = unsafe extern "C" fn(*mut MppFrameRaw) -> MppRet;
type FrameDeinitFn = unsafe extern "C" fn(*mut MppFrameRaw) -> MppRet;
type FrameGetU32Fn = unsafe extern "C" fn(MppFrameRaw) -> u32;
type FrameGetI64Fn = unsafe extern "C" fn(MppFrameRaw) -> i64;
type FrameGetBufferFn = unsafe extern "C" fn(MppFrameRaw) -> MppBufferRaw;
type FrameSetBufferFn = unsafe extern "C" fn(MppFrameRaw, MppBufferRaw);
type FrameGetMetaFn = unsafe extern "C" fn(MppFrameRaw) -> MppMetaRaw;

type MetaSetPacketFn = unsafe extern "C" fn(MppMetaRaw, u32, MppPacketRaw) -> MppRet;
type MetaGetPacketFn = unsafe extern "C" fn(MppMetaRaw, u32, *mut MppPacketRaw) -> MppRet;
type TaskSetPacketFn = unsafe extern "C" fn(MppTaskRaw, u32, MppPacketRaw) -> MppRet;
type TaskSetFrameFn = unsafe extern "C" fn(MppTaskRaw, u32, MppFrameRaw) -> MppRet;
type TaskGetFrameFn = unsafe extern "C" fn(MppTaskRaw, u32, *mut MppFrameRaw) -> MppRet;

// ============================================================================
// Loaded Functions Container
// ============================================================================

struct MppLibrary {
    _lib: libloading::Library,

    mpp_create: MppCreateFn,
    mpp_init: MppInitFn,
    mpp_destroy: MppDestroyFn,
    mpp_check_support_format: MppCheckSupportFn,

    group_get: GroupGetFn,
    group_put: GroupPutFn,
    buffer_get: BufferGetFn,
    buffer_put: BufferRefFn,
    buffer_inc_ref: BufferRefFn,
    buffer_fd: BufferFdFn,
    buffer_size: BufferSizeFn,
    buffer_ptr: BufferPtrFn,

    packet_init: PacketInitFn,
    packet_init_with_buffer: PacketInitWithBufferFn,
    packet_deinit: PacketDeinitFn,
    packet_set_pts: PacketSetI64Fn,
    packet_set_size: PacketSetSizeFn,
    packet_set_length: PacketSetSizeFn,
    packet_set_eos: PacketSetEosFn,

    frame_init: FrameInitFn,
    frame_deinit: FrameDeinitFn,
    frame_width: FrameGetU32Fn,
    frame_height: FrameGetU32Fn,
    frame_hor_stride: FrameGetU32Fn,
    frame_ver_stride: FrameGetU32Fn,
    frame_fmt: FrameGetU32Fn,
    frame_mode: FrameGetU32Fn,
    frame_eos: FrameGetU32Fn,
    frame_discard: FrameGetU32Fn,
    frame_errinfo: FrameGetU32Fn,
    frame_info_change: FrameGetU32Fn,
    frame_color_range: FrameGetU32Fn,
    frame_color_primaries: FrameGetU32Fn,
    frame_color_trc: FrameGetU32Fn,
    frame_colorspace: FrameGetU32Fn,
    frame_pts: FrameGetI64Fn,
    frame_buffer: FrameGetBufferFn,
    frame_set_buffer: FrameSetBufferFn,
    frame_meta: FrameGetMetaFn,

    meta_set_packet: MetaSetPacketFn,
    meta_get_packet: MetaGetPacketFn,
    task_set_packet: TaskSetPacketFn,
    task_set_frame: TaskSetFrameFn,
    task_get_frame: TaskGetFrameFn,
}

unsafe impl Send for MppLibrary {}
unsafe impl Sync for MppLibrary {}

static MPP_LIB: OnceLock<Option<MppLibrary>> = OnceLock::new();

fn load_mpp_library() -> Option<&'static MppLibrary> {
    MPP_LIB
        .get_or_init(|| unsafe {
            let lib = match libloading::Library::new(get_mpp_path()) {
                Ok(lib) => lib,
                Err(e) => {
                    tracing::warn!("Failed to load librockchip_mpp: {}", e);
                    return None;
                }
            };

            let loaded = MppLibrary {
                mpp_create: *lib.get(b"mpp_create\0").ok()?,
                mpp_init: *lib.get(b"mpp_init\0").ok()?,
                mpp_destroy: *lib.get(b"mpp_destroy\0").ok()?,
                mpp_check_support_format: *lib.get(b"mpp_check_support_format\0").ok()?,

                group_get: *lib.get(b"mpp_buffer_group_get\0").ok()?,
                group_put: *lib.get(b"mpp_buffer_group_put\0").ok()?,
                buffer_get: *lib.get(b"mpp_buffer_get_with_tag\0").ok()?,
                buffer_put: *lib.get(b"mpp_buffer_put_with_caller\0").ok()?,
                buffer_inc_ref: *lib.get(b"mpp_buffer_inc_ref_with_caller\0").ok()?,
                buffer_fd: *lib.get(b"mpp_buffer_get_fd_with_caller\0").ok()?,
                buffer_size: *lib.get(b"mpp_buffer_get_size_with_caller\0").ok()?,
                buffer_ptr: *lib.get(b"mpp_buffer_get_ptr_with_caller\0").ok()?,

                packet_init: *lib.get(b"mpp_packet_init\0").ok()?,
                packet_init_with_buffer: *lib.get(b"mpp_packet_init_with_buffer\0").ok()?,
                packet_deinit: *lib.get(b"mpp_packet_deinit\0").ok()?,
                packet_set_pts: *lib.get(b"mpp_packet_set_pts\0").ok()?,
                packet_set_size: *lib.get(b"mpp_packet_set_size\0").ok()?,
                packet_set_length: *lib.get(b"mpp_packet_set_length\0").ok()?,
                packet_set_eos: *lib.get(b"mpp_packet_set_eos\0").ok()?,

                frame_init: *lib.get(b"mpp_frame_init\0").ok()?,
                frame_deinit: *lib.get(b"mpp_frame_deinit\0").ok()?,
                frame_width: *lib.get(b"mpp_frame_get_width\0").ok()?,
                frame_height: *lib.get(b"mpp_frame_get_height\0").ok()?,
                frame_hor_stride: *lib.get(b"mpp_frame_get_hor_stride\0").ok()?,
                frame_ver_stride: *lib.get(b"mpp_frame_get_ver_stride\0").ok()?,
                frame_fmt: *lib.get(b"mpp_frame_get_fmt\0").ok()?,
                frame_mode: *lib.get(b"mpp_frame_get_mode\0").ok()?,
                frame_eos: *lib.get(b"mpp_frame_get_eos\0").ok()?,
                frame_discard: *lib.get(b"mpp_frame_get_discard\0").ok()?,
                frame_errinfo: *lib.get(b"mpp_frame_get_errinfo\0").ok()?,
                frame_info_change: *lib.get(b"mpp_frame_get_info_change\0").ok()?,
                frame_color_range: *lib.get(b"mpp_frame_get_color_range\0").ok()?,
                frame_color_primaries: *lib.get(b"mpp_frame_get_color_primaries\0").ok()?,
                frame_color_trc: *lib.get(b"mpp_frame_get_color_trc\0").ok()?,
                frame_colorspace: *lib.get(b"mpp_frame_get_colorspace\0").ok()?,
                frame_pts: *lib.get(b"mpp_frame_get_pts\0").ok()?,
                frame_buffer: *lib.get(b"mpp_frame_get_buffer\0").ok()?,
                frame_set_buffer: *lib.get(b"mpp_frame_set_buffer\0").ok()?,
                frame_meta: *lib.get(b"mpp_frame_get_meta\0").ok()?,

                meta_set_packet: *lib.get(b"mpp_meta_set_packet\0").ok()?,
                meta_get_packet: *lib.get(b"mpp_meta_get_packet\0").ok()?,
                task_set_packet: *lib.get(b"mpp_task_meta_set_packet\0").ok()?,
                task_set_frame: *lib.get(b"mpp_task_meta_set_frame\0").ok()?,
                task_get_frame: *lib.get(b"mpp_task_meta_get_frame\0").ok()?,

                _lib: lib,
            };

            tracing::info!("librockchip_mpp loaded successfully");
            Some(loaded)
        })
        .as_ref()
}

pub fn is_available() -> bool {
    load_mpp_library().is_some()
}

fn caller() -> *const c_char {
    CALLER.as_ptr() as *const c_char
}

// ============================================================================
// Buffers and groups
// ============================================================================

struct FfiBuffer {
    lib: &'static MppLibrary,
    raw: MppBufferRaw,
}

unsafe impl Send for FfiBuffer {}
unsafe impl Sync for FfiBuffer {}

impl FfiBuffer {
    /// Take an extra reference on a buffer owned by someone else
    unsafe fn retain(lib: &'static MppLibrary, raw: MppBufferRaw) -> Option<MppBuffer> {
        if raw.is_null() || (lib.buffer_inc_ref)(raw, caller()) != MPP_OK {
            return None;
        }
        Some(MppBuffer::new(Arc::new(FfiBuffer { lib, raw })))
    }

    fn mapped(&self, offset: usize, len: usize) -> Result<*mut u8> {
        let size = self.size();
        if offset.checked_add(len).map_or(true, |end| end > size) {
            return Err(RkError::BufferGeometry(format!("access of {} at {} overflows {}", len, offset, size)));
        }
        let ptr = unsafe { (self.lib.buffer_ptr)(self.raw, caller()) } as *mut u8;
        if ptr.is_null() {
            return Err(RkError::Allocation("mpp_buffer_get_ptr returned null".into()));
        }
        Ok(unsafe { ptr.add(offset) })
    }
}

impl DmaBuffer for FfiBuffer {
    fn fd(&self) -> c_int {
        unsafe { (self.lib.buffer_fd)(self.raw, caller()) }
    }

    fn size(&self) -> usize {
        unsafe { (self.lib.buffer_size)(self.raw, caller()) }
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let dst = self.mapped(offset, data.len())?;
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
        Ok(())
    }

    fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        let src = self.mapped(offset, out.len())?;
        unsafe { ptr::copy_nonoverlapping(src, out.as_mut_ptr(), out.len()) };
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for FfiBuffer {
    fn drop(&mut self) {
        unsafe {
            (self.lib.buffer_put)(self.raw, caller());
        }
    }
}

pub struct FfiGroup {
    lib: &'static MppLibrary,
    raw: MppBufferGroupRaw,
}

unsafe impl Send for FfiGroup {}
unsafe impl Sync for FfiGroup {}

impl BufferGroup for FfiGroup {
    fn get(&self, size: usize) -> Result<MppBuffer> {
        let mut raw: MppBufferRaw = ptr::null_mut();
        let ret = unsafe {
            (self.lib.buffer_get)(self.raw, &mut raw, size, MODULE_TAG.as_ptr() as *const c_char, caller())
        };
        if ret != MPP_OK || raw.is_null() {
            return Err(RkError::Allocation(format!("mpp_buffer_get({}) failed with code {}", size, ret)));
        }
        Ok(MppBuffer::new(Arc::new(FfiBuffer { lib: self.lib, raw })))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for FfiGroup {
    fn drop(&mut self) {
        unsafe {
            (self.lib.group_put)(self.raw);
        }
    }
}

fn raw_buffer(buffer: &MppBuffer) -> Option<MppBufferRaw> {
    buffer.inner().as_any().downcast_ref::<FfiBuffer>().map(|b| b.raw)
}

// ============================================================================
// Frames
// ============================================================================

/// Keeps the C frame object alive while the session holds its MppFrame
struct FfiFrameHandle {
    lib: &'static MppLibrary,
    raw: MppFrameRaw,
}

unsafe impl Send for FfiFrameHandle {}

impl Drop for FfiFrameHandle {
    fn drop(&mut self) {
        unsafe {
            (self.lib.frame_deinit)(&mut self.raw);
        }
    }
}

unsafe fn wrap_frame(lib: &'static MppLibrary, raw: MppFrameRaw) -> MppFrame {
    let info = FrameInfo {
        width: (lib.frame_width)(raw),
        height: (lib.frame_height)(raw),
        hor_stride: (lib.frame_hor_stride)(raw),
        ver_stride: (lib.frame_ver_stride)(raw),
        format: (lib.frame_fmt)(raw),
        pts: (lib.frame_pts)(raw),
        mode: (lib.frame_mode)(raw),
        eos: (lib.frame_eos)(raw) != 0,
        discard: (lib.frame_discard)(raw) != 0,
        errinfo: (lib.frame_errinfo)(raw) != 0,
        info_change: (lib.frame_info_change)(raw) != 0,
        color: ColorMetadata {
            range: ColorRange::from_raw((lib.frame_color_range)(raw)),
            primaries: (lib.frame_color_primaries)(raw),
            trc: (lib.frame_color_trc)(raw),
            space: (lib.frame_colorspace)(raw),
        },
    };
    let buffer = FfiBuffer::retain(lib, (lib.frame_buffer)(raw));
    MppFrame::with_handle(info, buffer, Box::new(FfiFrameHandle { lib, raw }))
}

// ============================================================================
// Device
// ============================================================================

pub struct FfiDevice {
    lib: &'static MppLibrary,
    ctx: MppCtx,
    mpi: *mut MppApi,
}

unsafe impl Send for FfiDevice {}

impl FfiDevice {
    fn api(&self) -> Result<&MppApi> {
        if self.ctx.is_null() || self.mpi.is_null() {
            return Err(RkError::device("mpi", super::MPP_ERR_NULL_PTR));
        }
        Ok(unsafe { &*self.mpi })
    }

    /// New C packet for `packet`; caller owns the result
    unsafe fn make_packet(&self, packet: &MppPacket) -> Result<MppPacketRaw> {
        let mut raw: MppPacketRaw = ptr::null_mut();
        let ret = match packet.buffer.as_ref().and_then(raw_buffer) {
            Some(buf) => (self.lib.packet_init_with_buffer)(&mut raw, buf),
            None => (self.lib.packet_init)(&mut raw, packet.data.as_ptr() as *mut c_void, packet.len()),
        };
        check("mpp_packet_init", ret)?;
        (self.lib.packet_set_pts)(raw, packet.pts);
        if packet.eos {
            (self.lib.packet_set_size)(raw, 0);
            (self.lib.packet_set_length)(raw, 0);
            (self.lib.packet_set_eos)(raw);
        }
        Ok(raw)
    }
}

impl MppDevice for FfiDevice {
    fn init(&mut self, ctx: CtxType, coding: CodingType) -> Result<()> {
        let ret = unsafe { (self.lib.mpp_init)(self.ctx, ctx as c_int, coding as u32) };
        check("mpp_init", ret)
    }

    fn control(&mut self, cmd: MpiCmd, param: ControlParam) -> Result<()> {
        let api = self.api()?;
        let mut int_value: c_int = 0;
        let mut timeout_value: i64 = 0;
        let raw_param: MppParam = match &param {
            ControlParam::None => ptr::null_mut(),
            ControlParam::Int(v) => {
                int_value = *v;
                &mut int_value as *mut c_int as MppParam
            }
            ControlParam::Timeout(t) => {
                timeout_value = t.raw();
                &mut timeout_value as *mut i64 as MppParam
            }
            ControlParam::Group(group) => match group.as_any().downcast_ref::<FfiGroup>() {
                Some(g) => g.raw,
                None => return Err(RkError::Config("buffer group was not created by librockchip_mpp".into())),
            },
        };
        let ret = unsafe { (api.control)(self.ctx, cmd as u32, raw_param) };
        check("mpi->control", ret)
    }

    fn put_packet(&mut self, packet: &MppPacket) -> Submit {
        let api = match self.api() {
            Ok(api) => api,
            Err(_) => return Submit::Full,
        };
        unsafe {
            let mut raw = match self.make_packet(packet) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("Failed to build MPP packet: {}", e);
                    return Submit::Full;
                }
            };
            let ret = (api.decode_put_packet)(self.ctx, raw);
            (self.lib.packet_deinit)(&mut raw);
            if ret == MPP_OK {
                Submit::Accepted
            } else {
                tracing::debug!("decode_put_packet returned {}", ret);
                Submit::Full
            }
        }
    }

    fn get_frame(&mut self) -> Result<Option<MppFrame>> {
        let api = self.api()?;
        let mut raw: MppFrameRaw = ptr::null_mut();
        let ret = unsafe { (api.decode_get_frame)(self.ctx, &mut raw) };
        if ret != MPP_OK && ret != MPP_ERR_TIMEOUT {
            return Err(RkError::device("decode_get_frame", ret));
        }
        if raw.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { wrap_frame(self.lib, raw) }))
    }

    fn poll(&mut self, port: Port, timeout: Timeout) -> Result<bool> {
        let api = self.api()?;
        let ret = unsafe { (api.poll)(self.ctx, port as c_int, timeout.raw() as c_int) };
        Ok(ret == MPP_OK)
    }

    fn dequeue(&mut self, port: Port) -> Result<Option<MppTask>> {
        let api = self.api()?;
        let mut task: MppTaskRaw = ptr::null_mut();
        unsafe {
            (api.dequeue)(self.ctx, port as c_int, &mut task);
            if task.is_null() {
                return Ok(None);
            }
            let mut out = MppTask::new(task as usize);
            if port == Port::Output {
                let mut frame: MppFrameRaw = ptr::null_mut();
                (self.lib.task_get_frame)(task, KEY_OUTPUT_FRAME, &mut frame);
                if !frame.is_null() {
                    // MPP hands the input packet back through the frame meta
                    let meta = (self.lib.frame_meta)(frame);
                    let mut pkt: MppPacketRaw = ptr::null_mut();
                    (self.lib.meta_get_packet)(meta, KEY_INPUT_PACKET, &mut pkt);
                    if !pkt.is_null() {
                        (self.lib.packet_deinit)(&mut pkt);
                    }
                    out.frame = Some(wrap_frame(self.lib, frame));
                }
            }
            Ok(Some(out))
        }
    }

    fn enqueue(&mut self, port: Port, task: MppTask) -> Result<()> {
        let api = self.api()?;
        let raw_task = task.id as MppTaskRaw;
        unsafe {
            if port == Port::Input {
                let mut pkt: MppPacketRaw = ptr::null_mut();
                let mut frame: MppFrameRaw = ptr::null_mut();
                if let Some(packet) = &task.packet {
                    pkt = self.make_packet(packet)?;
                    if !packet.eos {
                        check("mpp_frame_init", (self.lib.frame_init)(&mut frame))?;
                        if let Some(buf) = task.frame.as_ref().and_then(|f| f.buffer.as_ref()).and_then(raw_buffer) {
                            (self.lib.frame_set_buffer)(frame, buf);
                        }
                        let meta = (self.lib.frame_meta)(frame);
                        (self.lib.meta_set_packet)(meta, KEY_INPUT_PACKET, pkt);
                    }
                }
                (self.lib.task_set_packet)(raw_task, KEY_INPUT_PACKET, pkt);
                (self.lib.task_set_frame)(raw_task, KEY_OUTPUT_FRAME, frame);
            }
            let ret = (api.enqueue)(self.ctx, port as c_int, raw_task);
            check("mpi->enqueue", ret)
        }
    }

    fn reset(&mut self) -> Result<()> {
        let api = self.api()?;
        check("mpi->reset", unsafe { (api.reset)(self.ctx) })
    }

    fn destroy(&mut self) {
        if self.ctx.is_null() {
            return;
        }
        unsafe {
            (self.lib.mpp_destroy)(self.ctx);
        }
        self.ctx = ptr::null_mut();
        self.mpi = ptr::null_mut();
    }
}

impl Drop for FfiDevice {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ============================================================================
// Backend
// ============================================================================

pub struct FfiMpp {
    lib: &'static MppLibrary,
}

impl FfiMpp {
    pub fn load() -> Result<Self> {
        load_mpp_library()
            .map(|lib| Self { lib })
            .ok_or_else(|| RkError::Library { name: "librockchip_mpp", reason: "not found or incomplete".into() })
    }
}

impl MppBackend for FfiMpp {
    fn name(&self) -> &'static str {
        "librockchip_mpp"
    }

    fn check_support(&self, ctx: CtxType, coding: CodingType) -> bool {
        unsafe { (self.lib.mpp_check_support_format)(ctx as c_int, coding as u32) == MPP_OK }
    }

    fn create(&self) -> Result<Box<dyn MppDevice>> {
        let mut ctx: MppCtx = ptr::null_mut();
        let mut mpi: *mut MppApi = ptr::null_mut();
        let ret = unsafe { (self.lib.mpp_create)(&mut ctx, &mut mpi) };
        check("mpp_create", ret)?;
        Ok(Box::new(FfiDevice { lib: self.lib, ctx, mpi }))
    }

    fn buffer_group(&self, flags: u32) -> Result<Arc<dyn BufferGroup>> {
        let mut raw: MppBufferGroupRaw = ptr::null_mut();
        let ret = unsafe {
            (self.lib.group_get)(
                &mut raw,
                flags,
                MPP_BUFFER_INTERNAL,
                MODULE_TAG.as_ptr() as *const c_char,
                caller(),
            )
        };
        check("mpp_buffer_group_get", ret)?;
        Ok(Arc::new(FfiGroup { lib: self.lib, raw }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_keys() {
        assert_eq!(KEY_INPUT_PACKET, 0x69706b74);
        assert_eq!(KEY_OUTPUT_FRAME, 0x6f66726d);
    }

    #[test]
    fn test_api_layout() {
        let ptr = std::mem::size_of::<usize>();
        assert_eq!(std::mem::size_of::<MppApi>(), 8 + 14 * ptr + 16 * 4);
    }
}
