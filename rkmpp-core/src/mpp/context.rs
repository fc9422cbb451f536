// MPP CONTEXT - Named capabilities over the raw control interface
//
// The decoder never issues a raw MpiCmd. Each knob it needs is a method here
// with its precondition spelled out, so the state machine reads as intent.

use std::sync::Arc;

use super::{
    BufferGroup, CodingType, ControlParam, CtxType, MpiCmd, MppDevice, MppFrame, MppPacket,
    MppTask, Port, Submit, Timeout,
};
use crate::error::Result;

pub struct MppContext {
    device: Box<dyn MppDevice>,
    coding: Option<CodingType>,
    destroyed: bool,
}

impl MppContext {
    pub fn new(device: Box<dyn MppDevice>) -> Self {
        Self { device, coding: None, destroyed: false }
    }

    pub fn coding(&self) -> Option<CodingType> {
        self.coding
    }

    /// Before `init_decoder`: let the parser skip full frame assembly.
    pub fn enable_fast_parse(&mut self) -> Result<()> {
        self.device.control(MpiCmd::DecSetParserFastMode, ControlParam::Int(1))
    }

    pub fn init_decoder(&mut self, coding: CodingType) -> Result<()> {
        self.device.init(CtxType::Dec, coding)?;
        self.coding = Some(coding);
        Ok(())
    }

    /// After init: decoded pictures are allocated from `group` instead of MPP's own pool.
    pub fn attach_buffer_group(&mut self, group: &Arc<dyn BufferGroup>) -> Result<()> {
        self.device.control(MpiCmd::DecSetExtBufGroup, ControlParam::Group(group.clone()))
    }

    /// Keep outputting frames with errors concealed rather than stalling.
    pub fn suppress_errors(&mut self) -> Result<()> {
        self.device.control(MpiCmd::DecSetDisableError, ControlParam::None)
    }

    /// Emit each frame as soon as it decodes, ignoring display reordering delay.
    pub fn enable_immediate_output(&mut self) -> Result<()> {
        self.device.control(MpiCmd::DecSetImmediateOut, ControlParam::Int(1))
    }

    /// After an info-change frame: the new buffer geometry is ready, resume decoding.
    pub fn acknowledge_info_change(&mut self) -> Result<()> {
        self.device.control(MpiCmd::DecSetInfoChangeReady, ControlParam::None)
    }

    /// Timeout for the next `get_frame` calls.
    pub fn set_output_timeout(&mut self, timeout: Timeout) -> Result<()> {
        self.device.control(MpiCmd::SetOutputTimeout, ControlParam::Timeout(timeout))
    }

    pub fn put_packet(&mut self, packet: &MppPacket) -> Submit {
        self.device.put_packet(packet)
    }

    pub fn get_frame(&mut self) -> Result<Option<MppFrame>> {
        self.device.get_frame()
    }

    pub fn poll(&mut self, port: Port, timeout: Timeout) -> Result<bool> {
        self.device.poll(port, timeout)
    }

    pub fn dequeue(&mut self, port: Port) -> Result<Option<MppTask>> {
        self.device.dequeue(port)
    }

    pub fn enqueue(&mut self, port: Port, task: MppTask) -> Result<()> {
        self.device.enqueue(port, task)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.device.reset()
    }

    /// Reset then destroy. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.destroyed {
            return;
        }
        if let Err(e) = self.device.reset() {
            tracing::warn!("MPP reset during shutdown failed: {}", e);
        }
        self.device.destroy();
        self.destroyed = true;
    }
}

impl Drop for MppContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
