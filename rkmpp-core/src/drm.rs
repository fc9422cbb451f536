// DRM - DRM-PRIME frame descriptors and their reference-counted handle
//
// The descriptor layout matches the multi-object / multi-layer / multi-plane
// descriptor that display and compositor clients expect, so it can be handed
// across an FFI boundary unchanged.
//
// DrmPrime is the only way a descriptor leaves this crate. Cloning it shares
// the descriptor; the release callback fires once, when the last clone drops.

use parking_lot::Mutex;
use std::os::raw::c_int;
use std::sync::Arc;

use crate::format::DrmFourcc;

pub const DRM_MAX_OBJECTS: usize = 4;
pub const DRM_MAX_LAYERS: usize = 4;
pub const DRM_MAX_PLANES: usize = 4;

pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;

// ============================================================================
// C-compatible descriptor
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrmObject {
    pub fd: c_int,
    pub size: usize,
    pub format_modifier: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrmPlane {
    pub object_index: c_int,
    pub offset: isize,
    pub pitch: isize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrmLayer {
    pub format: u32,
    pub nb_planes: c_int,
    pub planes: [DrmPlane; DRM_MAX_PLANES],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrmFrameDescriptor {
    pub nb_objects: c_int,
    pub objects: [DrmObject; DRM_MAX_OBJECTS],
    pub nb_layers: c_int,
    pub layers: [DrmLayer; DRM_MAX_LAYERS],
}

impl DrmLayer {
    pub fn fourcc(&self) -> DrmFourcc {
        DrmFourcc(self.format)
    }

    pub fn planes(&self) -> &[DrmPlane] {
        let n = (self.nb_planes.max(0) as usize).min(DRM_MAX_PLANES);
        &self.planes[..n]
    }
}

impl DrmFrameDescriptor {
    pub fn objects(&self) -> &[DrmObject] {
        let n = (self.nb_objects.max(0) as usize).min(DRM_MAX_OBJECTS);
        &self.objects[..n]
    }

    pub fn layers(&self) -> &[DrmLayer] {
        let n = (self.nb_layers.max(0) as usize).min(DRM_MAX_LAYERS);
        &self.layers[..n]
    }

    /// Convenience for the single-object, single-layer frames produced here
    pub fn primary_fd(&self) -> c_int {
        self.objects[0].fd
    }

    pub fn primary_layer(&self) -> &DrmLayer {
        &self.layers[0]
    }
}

// ============================================================================
// Reference-counted handle
// ============================================================================

/// Invoked with the descriptor when the last handle drops.
pub type ReleaseFn = Box<dyn FnOnce(&DrmFrameDescriptor) + Send>;

struct DrmPrimeInner {
    desc: DrmFrameDescriptor,
    release: Mutex<Option<ReleaseFn>>,
}

impl Drop for DrmPrimeInner {
    fn drop(&mut self) {
        if let Some(release) = self.release.get_mut().take() {
            release(&self.desc);
        }
    }
}

/// Shared, read-only DRM-PRIME buffer.
#[derive(Clone)]
pub struct DrmPrime {
    inner: Arc<DrmPrimeInner>,
}

impl DrmPrime {
    pub(crate) fn new(desc: DrmFrameDescriptor, release: ReleaseFn) -> Self {
        Self {
            inner: Arc::new(DrmPrimeInner {
                desc,
                release: Mutex::new(Some(release)),
            }),
        }
    }

    pub fn descriptor(&self) -> &DrmFrameDescriptor {
        &self.inner.desc
    }

    pub fn fd(&self) -> c_int {
        self.inner.desc.primary_fd()
    }

    /// Both handles refer to the same underlying buffer
    pub fn same_buffer(&self, other: &DrmPrime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::fmt::Debug for DrmPrime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let layer = self.inner.desc.primary_layer();
        f.debug_struct("DrmPrime")
            .field("fd", &self.fd())
            .field("format", &layer.fourcc())
            .field("planes", &layer.nb_planes)
            .field("refs", &self.ref_count())
            .finish()
    }
}
