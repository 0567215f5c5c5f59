//! Client-visible layer entity: property bag, visibility/rect/zpos queries,
//! change tracking, framebuffer metadata cache.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::Error;
use crate::fb::FbInfo;
use crate::property::{DriverMetadata, Property, PropertyIndex};
use drm::control::property;

/// How often (in page-flip ticks) pending priority is folded into current
/// priority. Retained for future heuristics; the search does not
/// currently read `current_priority`.
pub const PRIORITY_PERIOD: u64 = 60;

/// A client-visible unit to display, owned by exactly one [`crate::output::Output`]
/// for its lifetime (owned by exactly one output at a time).
#[derive(Debug)]
pub struct Layer {
    pub properties: IndexMap<PropertyIndex, Property>,
    /// Set since the last successful `apply` if any property was set.
    pub changed: bool,
    /// Forces this layer into GPU composition regardless of plane
    /// availability; set by [`Layer::mark_composited`].
    pub force_composition: bool,
    pub fb_info: Option<FbInfo>,
    pub prev_fb_info: Option<FbInfo>,
    pub pending_priority: u64,
    pub current_priority: u64,
    /// Plane indices tried as candidates for this layer during the current
    /// `apply` call, reset at the start of every fresh
    /// search.
    pub candidate_planes: HashSet<usize>,
    /// Plane index this layer is currently bound to, symmetric with
    /// `Plane::assigned`.
    pub plane: Option<usize>,
}

impl Default for Layer {
    fn default() -> Self {
        Layer {
            properties: IndexMap::new(),
            changed: false,
            force_composition: false,
            fb_info: None,
            prev_fb_info: None,
            pending_priority: 0,
            current_priority: 0,
            candidate_planes: HashSet::new(),
            plane: None,
        }
    }
}

impl Layer {
    pub fn new() -> Self {
        Self::default()
    }

    fn value(&self, index: PropertyIndex) -> Option<u64> {
        self.properties.get(&index).map(|p| p.current_value)
    }

    fn value_or(&self, index: PropertyIndex, default: u64) -> u64 {
        self.value(index).unwrap_or(default)
    }

    /// `ALPHA` (if set) is nonzero AND (forced-composition OR `FB_ID`
    /// nonzero).
    pub fn visible(&self) -> bool {
        let alpha_nonzero = self.value(PropertyIndex::Alpha).map_or(true, |a| a != 0);
        alpha_nonzero && (self.force_composition || self.value_or(PropertyIndex::FbId, 0) != 0)
    }

    /// `(CRTC_X, CRTC_Y, CRTC_W, CRTC_H)`, each defaulting to 0.
    pub fn rect(&self) -> Rect {
        Rect {
            x: self.value_or(PropertyIndex::CrtcX, 0) as i64,
            y: self.value_or(PropertyIndex::CrtcY, 0) as i64,
            w: self.value_or(PropertyIndex::CrtcW, 0),
            h: self.value_or(PropertyIndex::CrtcH, 0),
        }
    }

    /// zpos as reported on the layer, if the client set one.
    pub fn zpos(&self) -> Option<i64> {
        self.properties.get(&PropertyIndex::Zpos).map(|p| p.current_value as i64)
    }

    /// Both layers visible and their rectangles overlap.
    pub fn intersects(&self, other: &Layer) -> bool {
        self.visible() && other.visible() && self.rect().overlaps(&other.rect())
    }

    /// Clears `FB_ID` and sets `force_composition`, routing this layer
    /// through GPU composition regardless of plane availability.
    pub fn mark_composited(&mut self) {
        self.force_composition = true;
        if let Some(prop) = self.properties.get_mut(&PropertyIndex::FbId) {
            prop.current_value = 0;
        }
        self.changed = true;
    }

    /// Called once per page-flip; folds `pending_priority` into
    /// `current_priority` every [`PRIORITY_PERIOD`] ticks.
    pub fn age_priority(&mut self, flip_count: u64) {
        if flip_count % PRIORITY_PERIOD == 0 {
            self.current_priority = self.pending_priority;
            self.pending_priority = 0;
        }
    }

    /// Record an `FB_ID` change between frames for priority aging.
    pub fn note_fb_changed(&mut self) {
        self.pending_priority += 1;
    }

    /// Snapshot every property's value into its previous
    /// slot, snapshot `fb_info`, and clear `changed`.
    pub fn mark_clean(&mut self) {
        for prop in self.properties.values_mut() {
            prop.previous_value = prop.current_value;
        }
        self.prev_fb_info = self.fb_info;
        self.changed = false;
    }

    /// Sets a client-visible property. `CRTC_ID` is a plane-side concern the allocator
    /// derives itself; a client trying to set it directly is a programmer
    /// error, not a feasibility question.
    pub fn set_property(&mut self, index: PropertyIndex, value: u64) -> Result<(), Error> {
        if index == PropertyIndex::CrtcId {
            return Err(Error::Programmer("CRTC_ID cannot be set directly on a layer"));
        }
        if index == PropertyIndex::FbId && self.value(index) != Some(value) {
            self.note_fb_changed();
        }
        self.properties
            .entry(index)
            .or_insert_with(|| Property::new(index, unbound_handle(), DriverMetadata::Range { lo: 0, hi: u64::MAX }))
            .current_value = value;
        self.changed = true;
        Ok(())
    }

    /// Removes a property's value entirely, reverting to
    /// whatever default [`PropertyIndex::noop_default`] or a zeroed rect
    /// implies.
    pub fn unset_property(&mut self, index: PropertyIndex) {
        if self.properties.shift_remove(&index).is_some() {
            self.changed = true;
        }
    }

    /// Was `plane_index` tried (successfully staged
    /// past format/metadata checks) for this layer during the last search?
    pub fn is_candidate_plane(&self, plane_index: usize) -> bool {
        self.candidate_planes.contains(&plane_index)
    }

    /// `true` if this layer is visible but, after the last `apply`, still
    /// has no plane of its own — the caller must composite it on the GPU.
    pub fn needs_composition(&self) -> bool {
        self.visible() && self.plane.is_none()
    }
}

/// Placeholder driver handle for layer-side property entries, which are
/// client input mirrored onto whichever plane's real property the search
/// eventually picks — never written through directly.
fn unbound_handle() -> property::Handle {
    property::Handle::from(std::num::NonZeroU32::new(1).unwrap())
}

/// Minimal destination rectangle, always in CRTC (output) coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub w: u64,
    pub h: u64,
}

impl Rect {
    /// Nonzero overlap between `self` and `other`.
    pub fn overlaps(&self, other: &Rect) -> bool {
        if self.w == 0 || self.h == 0 || other.w == 0 || other.h == 0 {
            return false;
        }
        let (ax1, ay1, ax2, ay2) = (self.x, self.y, self.x + self.w as i64, self.y + self.h as i64);
        let (bx1, by1, bx2, by2) = (other.x, other.y, other.x + other.w as i64, other.y + other.h as i64);
        ax1 < bx2 && bx1 < ax2 && ay1 < by2 && by1 < ay2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::DriverMetadata;
    use drm::control::property;

    fn fake_prop_handle(raw: u32) -> property::Handle {
        property::Handle::from(std::num::NonZeroU32::new(raw).unwrap())
    }

    fn set(layer: &mut Layer, index: PropertyIndex, value: u64) {
        let prop = layer
            .properties
            .entry(index)
            .or_insert_with(|| Property::new(index, fake_prop_handle(1), DriverMetadata::Range { lo: 0, hi: u64::MAX }));
        prop.current_value = value;
    }

    #[test]
    fn invisible_without_fb_id() {
        let layer = Layer::new();
        assert!(!layer.visible());
    }

    #[test]
    fn visible_with_fb_id_and_no_alpha_set() {
        let mut layer = Layer::new();
        set(&mut layer, PropertyIndex::FbId, 7);
        assert!(layer.visible());
    }

    #[test]
    fn invisible_when_alpha_zero() {
        let mut layer = Layer::new();
        set(&mut layer, PropertyIndex::FbId, 7);
        set(&mut layer, PropertyIndex::Alpha, 0);
        assert!(!layer.visible());
    }

    #[test]
    fn force_composition_makes_visible_without_fb() {
        let mut layer = Layer::new();
        layer.force_composition = true;
        assert!(layer.visible());
    }

    #[test]
    fn rects_overlap_correctly() {
        let a = Rect { x: 0, y: 0, w: 100, h: 100 };
        let b = Rect { x: 50, y: 50, w: 100, h: 100 };
        let c = Rect { x: 200, y: 200, w: 10, h: 10 };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn priority_ages_every_period() {
        let mut layer = Layer::new();
        layer.note_fb_changed();
        layer.note_fb_changed();
        assert_eq!(layer.pending_priority, 2);
        layer.age_priority(PRIORITY_PERIOD);
        assert_eq!(layer.current_priority, 2);
        assert_eq!(layer.pending_priority, 0);
    }

    #[test]
    fn needs_composition_until_a_plane_is_assigned() {
        let mut layer = Layer::new();
        set(&mut layer, PropertyIndex::FbId, 7);
        assert!(layer.needs_composition());
        layer.plane = Some(0);
        assert!(!layer.needs_composition());
    }

    #[test]
    fn mark_composited_clears_fb_and_forces() {
        let mut layer = Layer::new();
        set(&mut layer, PropertyIndex::FbId, 7);
        layer.mark_composited();
        assert!(layer.force_composition);
        assert_eq!(layer.value(PropertyIndex::FbId), Some(0));
    }
}
