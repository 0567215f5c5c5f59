//! Framebuffer metadata retained by a layer across frames.
//!
//! The device wrapper is the one that actually calls `GETFB2` and closes the
//! returned object handles (see [`crate::device::Device::get_fb`]); this
//! module only defines the descriptor that survives that call.

use drm_fourcc::{DrmFourcc, DrmModifier};

/// Width/height/format/modifier of a framebuffer, as last observed from the
/// kernel. Retained after the driver's object handles are closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FbInfo {
    pub width: u32,
    pub height: u32,
    pub pixel_format: DrmFourcc,
    pub modifier: DrmModifier,
    /// `true` if the kernel reported a modifier at all. A framebuffer
    /// imported without one (the legacy/implicit-modifier path) is never
    /// rejected on format/modifier grounds.
    pub has_modifier: bool,
}

impl FbInfo {
    /// `true` if `self` and `other` would force a plane reallocation per the
    /// reuse rule (size, format, or modifier changed).
    pub fn realloc_relevant_change(&self, other: &FbInfo) -> bool {
        self.width != other.width
            || self.height != other.height
            || self.pixel_format != other.pixel_format
            || self.modifier != other.modifier
    }
}
