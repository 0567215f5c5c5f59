//! Hardware plane entity: format/modifier compatibility, zpos, and the
//! device plane-list ordering invariant.

use indexmap::IndexMap;

use crate::fb::FbInfo;
use crate::property::{Property, PropertyIndex};
use drm::control::plane;
use drm_fourcc::{DrmFourcc, DrmModifier};

/// Hardware type of a plane, as reported by the kernel's `type` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneType {
    Primary,
    Overlay,
    Cursor,
}

/// One modifier's entry in an `IN_FORMATS` blob: the bitmap window it
/// covers over the format array, and which formats in that window it
/// actually supports.
#[derive(Debug, Clone)]
pub struct ModifierEntry {
    pub modifier: DrmModifier,
    pub offset: usize,
    pub formats: u64,
}

/// Parsed `IN_FORMATS` property blob: the plane's format array plus one
/// [`ModifierEntry`] per supported modifier.
///
/// `formats` keeps one slot per entry in the kernel's raw format array, even
/// for fourccs this crate doesn't recognize (`None`) — `ModifierEntry`'s
/// bitmap windows are indexed positionally into that array, so dropping an
/// unrecognized entry would shift every later bit out from under its format.
#[derive(Debug, Clone, Default)]
pub struct InFormats {
    pub formats: Vec<Option<DrmFourcc>>,
    pub modifiers: Vec<ModifierEntry>,
}

impl InFormats {
    /// Does this blob permit `(format, modifier)`?
    fn supports(&self, format: DrmFourcc, modifier: DrmModifier) -> bool {
        let Some(format_index) = self.formats.iter().position(|f| *f == Some(format)) else {
            return false;
        };
        let Some(entry) = self.modifiers.iter().find(|m| m.modifier == modifier) else {
            return false;
        };
        let window_bit = match format_index.checked_sub(entry.offset) {
            Some(bit) if bit < 64 => bit,
            _ => return false,
        };
        entry.formats & (1u64 << window_bit) != 0
    }
}

/// A hardware scanout plane, owned by the [`crate::device::Device`].
#[derive(Debug)]
pub struct Plane {
    pub driver_id: plane::Handle,
    pub plane_type: PlaneType,
    /// Bitmask of CRTC indices this plane may be attached to.
    pub possible_crtcs: u32,
    /// Driver-reported zpos, or a synthesized one when absent.
    pub zpos: i64,
    pub in_formats: Option<InFormats>,
    pub properties: IndexMap<PropertyIndex, Property>,
    /// Index (within whichever output currently owns it) of the layer
    /// assigned here, maintained symmetrically with `Layer::plane`
    /// A plane is only ever claimed by one output's
    /// search at a time (callers serialize `apply` per device).
    pub assigned: Option<usize>,
}

impl Plane {
    pub fn new(
        driver_id: plane::Handle,
        plane_type: PlaneType,
        possible_crtcs: u32,
        zpos: i64,
        in_formats: Option<InFormats>,
        properties: IndexMap<PropertyIndex, Property>,
    ) -> Self {
        Plane {
            driver_id,
            plane_type,
            possible_crtcs,
            zpos,
            in_formats,
            properties,
            assigned: None,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.plane_type == PlaneType::Primary
    }

    /// `true` if CRTC index `crtc_idx` is in this plane's possible-CRTC mask.
    pub fn compatible_with_crtc(&self, crtc_idx: usize) -> bool {
        crtc_idx < 32 && (self.possible_crtcs & (1 << crtc_idx)) != 0
    }

    /// Format/modifier compatibility check.
    ///
    /// Returns `true` ("insufficient information to reject") when the
    /// framebuffer has no modifier or the plane has no `IN_FORMATS` blob at
    /// all, otherwise defers to [`InFormats::supports`].
    pub fn supports(&self, fb_info: &FbInfo) -> bool {
        if !fb_info.has_modifier {
            return true;
        }
        match &self.in_formats {
            None => true,
            Some(in_formats) => in_formats.supports(fb_info.pixel_format, fb_info.modifier),
        }
    }
}

/// Synthesize a zpos for a plane that didn't report one.
///
/// `first_primary_id` is the driver id of the first-registered PRIMARY
/// plane; overlays registered with a higher id are assumed to sit above it,
/// lower ids below.
pub fn synthesize_zpos(plane_type: PlaneType, driver_id: u32, first_primary_id: Option<u32>) -> i64 {
    match plane_type {
        PlaneType::Primary => 0,
        PlaneType::Cursor => 2,
        PlaneType::Overlay => match first_primary_id {
            Some(primary_id) if driver_id > primary_id => 1,
            _ => -1,
        },
    }
}

/// Insert a freshly-registered plane into the device's ordered plane
/// list, maintaining invariant 1: PRIMARY planes at the head; among
/// non-primary planes, descending zpos (topmost at the front of that
/// segment).
pub fn insert_ordered(planes: &mut Vec<Plane>, plane: Plane) {
    if plane.is_primary() {
        planes.insert(0, plane);
        return;
    }
    let insert_at = planes
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_primary())
        .find(|(_, p)| p.zpos <= plane.zpos)
        .map(|(idx, _)| idx);
    match insert_at {
        Some(idx) => planes.insert(idx, plane),
        None => planes.push(plane),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(modifier: u64, offset: usize, formats: u64) -> ModifierEntry {
        ModifierEntry {
            modifier: DrmModifier::from(modifier),
            offset,
            formats,
        }
    }

    #[test]
    fn in_formats_rejects_missing_format() {
        let blob = InFormats {
            formats: vec![Some(DrmFourcc::Xrgb8888)],
            modifiers: vec![entry(0, 0, 0b1)],
        };
        assert!(!blob.supports(DrmFourcc::Argb8888, DrmModifier::from(0)));
    }

    #[test]
    fn in_formats_rejects_missing_modifier() {
        let blob = InFormats {
            formats: vec![Some(DrmFourcc::Xrgb8888)],
            modifiers: vec![entry(0, 0, 0b1)],
        };
        assert!(!blob.supports(DrmFourcc::Xrgb8888, DrmModifier::from(99)));
    }

    #[test]
    fn in_formats_checks_window_bit() {
        let blob = InFormats {
            formats: vec![Some(DrmFourcc::Xrgb8888), Some(DrmFourcc::Argb8888)],
            modifiers: vec![entry(0, 0, 0b01)],
        };
        assert!(blob.supports(DrmFourcc::Xrgb8888, DrmModifier::from(0)));
        assert!(!blob.supports(DrmFourcc::Argb8888, DrmModifier::from(0)));
    }

    #[test]
    fn unrecognized_format_keeps_later_bits_aligned() {
        // Slot 1 is an unrecognized fourcc; slot 2 (Argb8888) must stay at
        // bit 2, not shift down to bit 1 because slot 1 was dropped.
        let blob = InFormats {
            formats: vec![Some(DrmFourcc::Xrgb8888), None, Some(DrmFourcc::Argb8888)],
            modifiers: vec![entry(0, 0, 0b100)],
        };
        assert!(!blob.supports(DrmFourcc::Xrgb8888, DrmModifier::from(0)));
        assert!(blob.supports(DrmFourcc::Argb8888, DrmModifier::from(0)));
    }

    #[test]
    fn zpos_synthesis_matches_spec() {
        assert_eq!(synthesize_zpos(PlaneType::Primary, 5, None), 0);
        assert_eq!(synthesize_zpos(PlaneType::Cursor, 5, None), 2);
        assert_eq!(synthesize_zpos(PlaneType::Overlay, 10, Some(5)), 1);
        assert_eq!(synthesize_zpos(PlaneType::Overlay, 2, Some(5)), -1);
    }
}
