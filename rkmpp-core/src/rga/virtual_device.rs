// VIRTUAL RGA - In-process 2D engine
//
// Validates each request the way the driver does (fds, rect inside strides)
// and records it. A failure code can be armed to exercise error paths.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use super::{BlitRequest, RgaEngine, RgaRect};
use crate::error::{Result, RkError};
use crate::format::RgaFormat;

#[derive(Default)]
pub struct VirtualRga {
    blits: AtomicUsize,
    fail_code: AtomicI32,
    history: Mutex<Vec<BlitRequest>>,
}

impl VirtualRga {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every following blit fails with `code` until `disarm`
    pub fn fail_with(&self, code: i32) {
        self.fail_code.store(code, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.fail_code.store(0, Ordering::SeqCst);
    }

    pub fn blit_count(&self) -> usize {
        self.blits.load(Ordering::SeqCst)
    }

    pub fn history(&self) -> Vec<BlitRequest> {
        self.history.lock().clone()
    }

    pub fn last(&self) -> Option<BlitRequest> {
        self.history.lock().last().copied()
    }
}

fn validate(rect: &RgaRect) -> Result<()> {
    if rect.format == RgaFormat::UNKNOWN {
        return Err(RkError::Blit(-22));
    }
    if rect.width == 0
        || rect.height == 0
        || rect.x + rect.width > rect.wstride
        || rect.y + rect.height > rect.hstride
    {
        return Err(RkError::Blit(-22));
    }
    Ok(())
}

impl RgaEngine for VirtualRga {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn blit(&self, request: &BlitRequest) -> Result<()> {
        let code = self.fail_code.load(Ordering::SeqCst);
        if code != 0 {
            return Err(RkError::Blit(code));
        }
        if request.src.fd < 0 || request.dst.fd < 0 {
            return Err(RkError::Blit(-9));
        }
        validate(&request.src.rect)?;
        validate(&request.dst.rect)?;

        self.blits.fetch_add(1, Ordering::SeqCst);
        self.history.lock().push(*request);
        Ok(())
    }
}
