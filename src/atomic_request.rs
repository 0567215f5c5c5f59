//! Cursor/rewind wrapper around a caller-owned atomic-commit request.
//!
//! The search speculatively stages writes for a candidate plane/layer
//! pairing, probes the kernel, and on anything but success must undo
//! exactly those writes before trying a sibling candidate. Doing that against
//! `drm::control::atomic::AtomicModeReq` directly is awkward — it merges
//! writes into a per-object property set rather than keeping an append-only
//! log. So this wrapper keeps its own ordered log of `(object, property,
//! value)` triples with real snapshot/truncate semantics, and only
//! materializes into the kernel's `AtomicModeReq` shape when a commit is
//! actually issued.

use drm::control::atomic::AtomicModeReq;
use drm::control::{property, RawResourceHandle};

/// An opaque position in the write log, captured by [`AtomicRequest::snapshot`]
/// and restored by [`AtomicRequest::rewind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(usize);

/// A caller-owned, append-only log of pending atomic property writes.
#[derive(Debug, Default)]
pub struct AtomicRequest {
    writes: Vec<(RawResourceHandle, property::Handle, u64)>,
}

impl AtomicRequest {
    pub fn new() -> Self {
        AtomicRequest { writes: Vec::new() }
    }

    /// Capture the current write-log length.
    pub fn snapshot(&self) -> Cursor {
        Cursor(self.writes.len())
    }

    /// Truncate the log back to a previously captured [`Cursor`], undoing
    /// every write appended since.
    pub fn rewind(&mut self, cursor: Cursor) {
        self.writes.truncate(cursor.0);
    }

    /// Append one property write. Last write for a given `(object,
    /// property)` pair wins when materialized (matches the kernel's own
    /// atomic semantics: one ioctl, one value per property).
    pub fn push(&mut self, object: impl Into<RawResourceHandle>, prop: property::Handle, value: u64) {
        self.writes.push((object.into(), prop, value));
    }

    /// Number of writes currently staged.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Read-only view of the staged writes, in append order.
    pub fn writes(&self) -> &[(RawResourceHandle, property::Handle, u64)] {
        &self.writes
    }

    /// Materialize the staged writes into the shape `drm::control::Device::
    /// atomic_commit` expects.
    pub fn to_drm_request(&self) -> AtomicModeReq {
        let mut req = AtomicModeReq::new();
        for (object, prop, value) in &self.writes {
            req.add_raw_property(*object, *prop, *value);
        }
        req
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drm::control::{crtc, RawResourceHandle};

    fn fake_prop(raw: u32) -> property::Handle {
        property::Handle::from(std::num::NonZeroU32::new(raw).unwrap())
    }

    #[test]
    fn rewind_undoes_writes_since_snapshot() {
        let mut req = AtomicRequest::new();
        let crtc_handle: RawResourceHandle = crtc::Handle::from(std::num::NonZeroU32::new(1).unwrap()).into();
        req.push(crtc_handle, fake_prop(10), 1);
        let cursor = req.snapshot();
        req.push(crtc_handle, fake_prop(11), 2);
        req.push(crtc_handle, fake_prop(12), 3);
        assert_eq!(req.len(), 3);
        req.rewind(cursor);
        assert_eq!(req.len(), 1);
    }
}
