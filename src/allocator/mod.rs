//! Backtracking search that assigns hardware planes to layers, probing
//! feasibility via `TEST_ONLY` atomic commits rather than trusting static
//! driver metadata alone.
//!
//! [`apply`] is the only entry point. It always leaves every plane with a
//! definite state staged in the caller's [`AtomicRequest`] — either bound to
//! a layer or explicitly disabled — and every layer either bound to a plane
//! (`Layer::plane`) or left for the caller to composite on the GPU.

use drm::control::{crtc, RawResourceHandle};

use crate::atomic_request::AtomicRequest;
use crate::device::probe::{KernelProbe, ProbeOutcome};
use crate::error::{Error, ErrorKind};
use crate::layer::Layer;
use crate::logging::log;
use crate::output::Output;
use crate::plane::Plane;
use crate::property::PropertyIndex;
use tracing::Level;

bitflags::bitflags! {
    /// Caller intent for the commit `request` will eventually be used for.
    /// `apply` never issues that commit itself — only `TEST_ONLY` probes —
    /// so these bits are passed through for the caller's own bookkeeping,
    /// not consumed here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ApplyFlags: u32 {
        const ALLOW_MODESET = 1 << 0;
        const NONBLOCK = 1 << 1;
    }
}

/// One node's worth of search bookkeeping, threaded down the recursion by
/// value so siblings never see a parent's accumulated state.
#[derive(Debug, Clone, Copy)]
struct SearchState {
    /// Count of *non-composition* layers placed so far.
    score: i64,
    /// zpos of the most recently placed non-primary layer, or `i64::MAX`
    /// before any has been placed.
    last_layer_zpos: i64,
    /// zpos of the layer bound to the primary plane, or `i64::MIN` if none
    /// has been placed yet.
    primary_layer_zpos: i64,
    /// zpos of the primary plane itself, or `i64::MAX` if not yet reached.
    primary_plane_zpos: i64,
    /// Whether the output's composition layer has been placed on the
    /// primary plane in this partial assignment.
    composited: bool,
}

struct BestResult {
    alloc: Vec<Option<usize>>,
    score: i64,
}

/// Tries the reuse path first; on a miss, unassigns this output's current
/// planes, disables every plane device-wide with no assignment, then runs
/// the backtracking search and writes back the winning allocation.
pub fn apply(
    planes: &mut Vec<Plane>,
    output: &mut Output,
    crtc_ids: &[crtc::Handle],
    probe: &mut impl KernelProbe,
    request: &mut AtomicRequest,
    flags: ApplyFlags,
    flip_count: &mut u64,
    test_commit_count: &mut u64,
) -> Result<(), Error> {
    let _ = (flags, crtc_ids);

    *flip_count += 1;
    for layer in output.layers.iter_mut() {
        layer.age_priority(*flip_count);
    }

    refresh_fb_info(output, probe)?;

    if try_reuse(planes, output, probe, request, test_commit_count)? {
        output.reuse_count += 1;
        log!(Level::DEBUG, "reused previous allocation for crtc {:?} (reuse #{})", output.crtc_id, output.reuse_count);
        for layer in output.layers.iter_mut() {
            layer.mark_clean();
        }
        return Ok(());
    }

    log!(Level::DEBUG, "reuse unavailable for crtc {:?}, running a fresh search over {} planes", output.crtc_id, planes.len());

    for layer in output.layers.iter_mut() {
        layer.candidate_planes.clear();
        if let Some(plane_idx) = layer.plane.take() {
            if let Some(plane) = planes.get_mut(plane_idx) {
                plane.assigned = None;
            }
        }
    }

    for plane in planes.iter() {
        if plane.assigned.is_none() {
            plane_apply(plane, output.crtc_id, None, request)?;
        }
    }

    let mut alloc: Vec<Option<usize>> = vec![None; planes.len()];
    let mut best = BestResult {
        alloc: vec![None; planes.len()],
        score: -1,
    };
    let state = SearchState {
        score: 0,
        last_layer_zpos: i64::MAX,
        primary_layer_zpos: i64::MIN,
        primary_plane_zpos: i64::MAX,
        composited: false,
    };

    search(
        planes,
        output.crtc_index,
        output.crtc_id,
        &mut output.layers,
        output.composition_layer,
        0,
        &mut alloc,
        &state,
        probe,
        request,
        test_commit_count,
        &mut best,
    )?;

    // No placement beats leaving every layer to composition; that is a
    // valid outcome, not a failure (an output with nothing placeable still
    // has a well-defined, all-composited state).
    let winner = if best.score >= 0 { best.alloc } else { vec![None; planes.len()] };
    log!(
        Level::INFO,
        "crtc {:?}: placed {} layer(s) on hardware planes out of {} visible",
        output.crtc_id,
        best.score.max(0),
        output.visible_non_composition_count()
    );

    for (plane_idx, slot) in winner.iter().enumerate() {
        if let Some(layer_idx) = slot {
            plane_apply(&planes[plane_idx], output.crtc_id, Some(&output.layers[*layer_idx]), request)?;
            planes[plane_idx].assigned = Some(*layer_idx);
            output.layers[*layer_idx].plane = Some(plane_idx);
        }
    }

    output.layers_changed = false;
    for layer in output.layers.iter_mut() {
        layer.mark_clean();
    }

    Ok(())
}

/// Refreshes every visible layer's cached framebuffer metadata from the
/// driver. A layer with no `FB_ID` set carries no framebuffer at all.
fn refresh_fb_info(output: &mut Output, probe: &mut impl KernelProbe) -> Result<(), Error> {
    for layer in output.layers.iter_mut() {
        if !layer.visible() {
            continue;
        }
        let fb_id = layer
            .properties
            .get(&PropertyIndex::FbId)
            .map(|p| p.current_value)
            .unwrap_or(0);
        layer.fb_info = if fb_id == 0 { None } else { probe.get_fb(fb_id as u32)? };
    }
    Ok(())
}

/// Attempts to reuse the previous allocation unchanged. Bails out (returning
/// `false`) the moment the output's layer set changed, or any layer changed
/// a property outside the exempt set (`IN_FENCE_FD`, `FB_DAMAGE_CLIPS`, and
/// `ALPHA` so long as it stays strictly between fully-transparent and
/// fully-opaque) or swapped in a framebuffer of different size/format/
/// modifier. A reusable candidate is re-staged in full and confirmed with a
/// single `TEST_ONLY` probe — static bookkeeping alone isn't trusted to know
/// the kernel would still accept it.
fn try_reuse(
    planes: &[Plane],
    output: &mut Output,
    probe: &mut impl KernelProbe,
    request: &mut AtomicRequest,
    test_commit_count: &mut u64,
) -> Result<bool, Error> {
    if output.layers_changed {
        return Ok(false);
    }
    for layer in &output.layers {
        if layer.changed && reuse_blocked_by(layer) {
            return Ok(false);
        }
    }

    let cursor = request.snapshot();
    for layer in &output.layers {
        if let Some(plane_idx) = layer.plane {
            match plane_apply(&planes[plane_idx], output.crtc_id, Some(layer), request) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Feasibility => {
                    request.rewind(cursor);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
    }

    *test_commit_count += 1;
    match probe.test_commit(request)? {
        ProbeOutcome::Feasible => Ok(true),
        ProbeOutcome::Infeasible => {
            request.rewind(cursor);
            Ok(false)
        }
    }
}

fn reuse_blocked_by(layer: &Layer) -> bool {
    match (&layer.prev_fb_info, &layer.fb_info) {
        (Some(prev), Some(cur)) if prev.realloc_relevant_change(cur) => return true,
        (None, Some(_)) | (Some(_), None) => return true,
        _ => {}
    }

    for (index, prop) in layer.properties.iter() {
        if prop.current_value == prop.previous_value {
            continue;
        }
        match index {
            PropertyIndex::InFenceFd | PropertyIndex::FbDamageClips => continue,
            PropertyIndex::Alpha => {
                let crossed_transparent = (prop.previous_value == 0) != (prop.current_value == 0);
                let crossed_opaque = (prop.previous_value == 0xFFFF) != (prop.current_value == 0xFFFF);
                if crossed_transparent || crossed_opaque {
                    return true;
                }
            }
            _ => return true,
        }
    }
    false
}

/// One node of the depth-first search over `planes[depth..]`. Plane order is
/// fixed (invariant 1): PRIMARY first, then non-primary in descending zpos.
#[allow(clippy::too_many_arguments)]
fn search(
    planes: &[Plane],
    crtc_idx: usize,
    crtc_id: crtc::Handle,
    layers: &mut [Layer],
    composition_layer: Option<usize>,
    depth: usize,
    alloc: &mut Vec<Option<usize>>,
    state: &SearchState,
    probe: &mut impl KernelProbe,
    request: &mut AtomicRequest,
    test_commit_count: &mut u64,
    best: &mut BestResult,
) -> Result<(), Error> {
    if depth == planes.len() {
        if state.score > best.score && is_valid_terminal(layers, composition_layer, state) {
            best.score = state.score;
            best.alloc.clone_from(alloc);
        }
        return Ok(());
    }

    let remaining = (planes.len() - depth) as i64;
    if best.score >= state.score + remaining {
        return Ok(());
    }

    let plane = &planes[depth];
    let node_cursor = request.snapshot();

    if plane.compatible_with_crtc(crtc_idx) {
        for layer_idx in 0..layers.len() {
            if !feasible(plane, layer_idx, depth, alloc, layers, planes, composition_layer, state) {
                continue;
            }

            let cursor = request.snapshot();
            let staged = plane_apply(plane, crtc_id, Some(&layers[layer_idx]), request);
            layers[layer_idx].candidate_planes.insert(depth);

            match staged {
                Err(e) if e.kind() == ErrorKind::Feasibility => {
                    request.rewind(cursor);
                    continue;
                }
                Err(e) => return Err(e),
                Ok(()) => {}
            }

            let fb_supported = layers[layer_idx].fb_info.as_ref().map_or(true, |fb| plane.supports(fb));
            if layers[layer_idx].force_composition || !fb_supported {
                request.rewind(cursor);
                continue;
            }

            *test_commit_count += 1;
            match probe.test_commit(request)? {
                ProbeOutcome::Infeasible => {
                    request.rewind(cursor);
                    continue;
                }
                ProbeOutcome::Feasible => {
                    alloc[depth] = Some(layer_idx);
                    let is_composition_layer = composition_layer == Some(layer_idx);
                    let child_state = advance_state(state, plane, &layers[layer_idx], is_composition_layer);
                    search(
                        planes,
                        crtc_idx,
                        crtc_id,
                        layers,
                        composition_layer,
                        depth + 1,
                        alloc,
                        &child_state,
                        probe,
                        request,
                        test_commit_count,
                        best,
                    )?;
                    alloc[depth] = None;
                    request.rewind(cursor);
                }
            }
        }
    }

    alloc[depth] = None;
    search(
        planes,
        crtc_idx,
        crtc_id,
        layers,
        composition_layer,
        depth + 1,
        alloc,
        state,
        probe,
        request,
        test_commit_count,
        best,
    )?;

    request.rewind(node_cursor);
    Ok(())
}

/// Advances search state for a plane/layer pairing just placed. Placing the
/// output's composition layer contributes 0 to `score` and sets `composited`
/// instead of incrementing it; any other layer contributes 1.
fn advance_state(state: &SearchState, plane: &Plane, layer: &Layer, is_composition_layer: bool) -> SearchState {
    let mut next = *state;
    if is_composition_layer {
        next.composited = true;
    } else {
        next.score += 1;
    }
    if !plane.is_primary() {
        if let Some(z) = layer.zpos() {
            next.last_layer_zpos = z;
        }
    } else {
        next.primary_plane_zpos = plane.zpos;
        if let Some(z) = layer.zpos() {
            next.primary_layer_zpos = z;
        }
    }
    next
}

/// The six feasibility rules a candidate `(plane, layer)` pairing must pass
/// before it is even worth staging and probing.
#[allow(clippy::too_many_arguments)]
fn feasible(
    plane: &Plane,
    layer_idx: usize,
    depth: usize,
    alloc: &[Option<usize>],
    layers: &[Layer],
    planes: &[Plane],
    composition_layer: Option<usize>,
    state: &SearchState,
) -> bool {
    let layer = &layers[layer_idx];
    if !layer.visible() {
        return false;
    }

    // The composition layer never takes a non-primary plane.
    if !plane.is_primary() && composition_layer == Some(layer_idx) {
        return false;
    }

    // Already placed at a shallower depth.
    if alloc[..depth].contains(&Some(layer_idx)) {
        return false;
    }

    let layer_zpos = layer.zpos();

    if let Some(z) = layer_zpos {
        // Would invert stacking against an already-placed, overlapping,
        // lower-zpos layer on a non-primary plane.
        if z > state.last_layer_zpos {
            for d in 0..depth {
                if let Some(other_idx) = alloc[d] {
                    if !planes[d].is_primary() {
                        if let Some(other_z) = layers[other_idx].zpos() {
                            if other_z < z && layers[other_idx].intersects(layer) {
                                return false;
                            }
                        }
                    }
                }
            }
        }

        // Conservative guard against a lower-zpos layer claiming territory
        // below a non-primary plane that is still bound elsewhere (a plane
        // shared with another output, not yet revisited by this search).
        if z < state.last_layer_zpos {
            for other_plane in &planes[depth + 1..] {
                if !other_plane.is_primary() && other_plane.assigned.is_some() {
                    return false;
                }
            }
        }
    }

    if !plane.is_primary() {
        if let Some(z) = layer_zpos {
            // This layer belongs below the primary, but the plane under
            // consideration sits above it.
            if z < state.primary_layer_zpos && plane.zpos > state.primary_plane_zpos {
                return false;
            }

            // An unallocated, overlapping layer with a strictly greater
            // zpos would have to be composited above this one, occluding it.
            for (other_idx, other) in layers.iter().enumerate() {
                if other_idx == layer_idx || alloc[..depth].contains(&Some(other_idx)) {
                    continue;
                }
                if let Some(other_z) = other.zpos() {
                    if other_z > z && other.intersects(layer) {
                        return false;
                    }
                }
            }
        }
    }

    true
}

/// With `N` the count of visible, non-composition layers, a
/// terminal is invalid if composition was required but the composition
/// layer itself wasn't placed (`score != N`), and equally invalid if the
/// composition layer *was* placed despite every other layer already having
/// a plane (`score == N`, composition would be wasteful). An output with no
/// composition layer has no such fallback to validate — any terminal stands.
fn is_valid_terminal(layers: &[Layer], composition_layer: Option<usize>, state: &SearchState) -> bool {
    if composition_layer.is_none() {
        return true;
    }
    let n = layers
        .iter()
        .enumerate()
        .filter(|(idx, l)| Some(*idx) != composition_layer && l.visible())
        .count() as i64;
    if !state.composited && state.score != n {
        return false;
    }
    if state.composited && state.score == n {
        return false;
    }
    true
}

/// Stages the writes for one plane: either a full disable (`layer` is
/// `None`) or `CRTC_ID` plus every layer property the plane declares,
/// skipping `ZPOS` (derived from plane order, never written) and tolerating
/// a missing plane property only when the layer's value for it is a no-op
/// default.
fn plane_apply(
    plane: &Plane,
    crtc_id: crtc::Handle,
    layer: Option<&Layer>,
    request: &mut AtomicRequest,
) -> Result<(), Error> {
    let cursor = request.snapshot();
    let object: RawResourceHandle = plane.driver_id.into();

    let Some(layer) = layer else {
        if let Err(e) = disable_plane(plane, object, request) {
            request.rewind(cursor);
            return Err(e);
        }
        return Ok(());
    };

    let crtc_prop = match plane.properties.get(&PropertyIndex::CrtcId) {
        Some(p) => p,
        None => {
            request.rewind(cursor);
            return Err(Error::Einval);
        }
    };
    let raw_crtc = u32::from(crtc_id) as u64;
    if let Err(e) = crtc_prop.validate_and_write(request, object, raw_crtc) {
        request.rewind(cursor);
        return Err(e);
    }

    for (index, layer_prop) in layer.properties.iter() {
        if *index == PropertyIndex::Zpos {
            continue;
        }
        match plane.properties.get(index) {
            Some(plane_prop) => {
                if let Err(e) = plane_prop.validate_and_write(request, object, layer_prop.current_value) {
                    request.rewind(cursor);
                    return Err(e);
                }
            }
            None => {
                let is_noop = index.noop_default().map_or(false, |d| layer_prop.current_value == d)
                    || matches!(index, PropertyIndex::FbDamageClips | PropertyIndex::InFenceFd);
                if !is_noop {
                    request.rewind(cursor);
                    return Err(Error::Einval);
                }
            }
        }
    }
    Ok(())
}

fn disable_plane(plane: &Plane, object: RawResourceHandle, request: &mut AtomicRequest) -> Result<(), Error> {
    if let Some(p) = plane.properties.get(&PropertyIndex::FbId) {
        p.validate_and_write(request, object, 0)?;
    }
    if let Some(p) = plane.properties.get(&PropertyIndex::CrtcId) {
        p.validate_and_write(request, object, 0)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fb::FbInfo;
    use crate::property::{DriverMetadata, Property};
    use drm::control::{plane, property};
    use drm_fourcc::{DrmFourcc, DrmModifier};
    use indexmap::IndexMap;

    struct FakeKernel {
        test_commits: u64,
        reject: Option<RawResourceHandle>,
        fb_to_return: Option<FbInfo>,
    }

    impl FakeKernel {
        fn accepts_everything() -> Self {
            FakeKernel { test_commits: 0, reject: None, fb_to_return: None }
        }
    }

    impl KernelProbe for FakeKernel {
        fn test_commit(&mut self, req: &AtomicRequest) -> Result<ProbeOutcome, Error> {
            self.test_commits += 1;
            if let Some(rejected) = self.reject {
                if req.writes().iter().any(|(obj, _, _)| *obj == rejected) {
                    return Ok(ProbeOutcome::Infeasible);
                }
            }
            Ok(ProbeOutcome::Feasible)
        }

        fn get_fb(&mut self, _fb_id: u32) -> Result<Option<FbInfo>, Error> {
            Ok(self.fb_to_return)
        }
    }

    fn prop_handle(raw: u32) -> property::Handle {
        property::Handle::from(std::num::NonZeroU32::new(raw).unwrap())
    }

    fn crtc_handle(raw: u32) -> crtc::Handle {
        crtc::Handle::from(std::num::NonZeroU32::new(raw).unwrap())
    }

    fn plane_handle(raw: u32) -> plane::Handle {
        plane::Handle::from(std::num::NonZeroU32::new(raw).unwrap())
    }

    /// Builds a plane with a writable `CRTC_ID`/`FB_ID`/rect/`ALPHA`/`ZPOS`
    /// property set and no format restriction, mirroring what a real
    /// driver reports for a basic overlay.
    fn test_plane(raw_id: u32, plane_type: crate::plane::PlaneType, possible_crtcs: u32, zpos: i64) -> Plane {
        let mut properties = IndexMap::new();
        let unrestricted = || DriverMetadata::Range { lo: 0, hi: u64::MAX };
        for (idx, prop_id) in [
            (PropertyIndex::CrtcId, 1),
            (PropertyIndex::FbId, 2),
            (PropertyIndex::CrtcX, 3),
            (PropertyIndex::CrtcY, 4),
            (PropertyIndex::CrtcW, 5),
            (PropertyIndex::CrtcH, 6),
            (PropertyIndex::SrcX, 7),
            (PropertyIndex::SrcY, 8),
            (PropertyIndex::SrcW, 9),
            (PropertyIndex::SrcH, 10),
            (PropertyIndex::Alpha, 11),
        ] {
            properties.insert(idx, Property::new(idx, prop_handle(prop_id), unrestricted()));
        }
        Plane::new(plane_handle(raw_id), plane_type, possible_crtcs, zpos, None, properties)
    }

    fn visible_layer(zpos: Option<i64>, x: i64, y: i64, w: u64, h: u64) -> Layer {
        let mut layer = Layer::new();
        layer.set_property(PropertyIndex::FbId, 42).unwrap();
        layer.set_property(PropertyIndex::CrtcX, x as u64).unwrap();
        layer.set_property(PropertyIndex::CrtcY, y as u64).unwrap();
        layer.set_property(PropertyIndex::CrtcW, w).unwrap();
        layer.set_property(PropertyIndex::CrtcH, h).unwrap();
        if let Some(z) = zpos {
            layer.set_property(PropertyIndex::Zpos, z as u64).unwrap();
        }
        layer
    }

    #[test]
    fn trivial_single_layer_takes_the_primary_plane() {
        let mut planes = vec![test_plane(10, crate::plane::PlaneType::Primary, 0b1, 0)];
        let mut output = Output::new(crtc_handle(1), 0);
        output.add_layer(visible_layer(None, 0, 0, 100, 100));
        let mut probe = FakeKernel::accepts_everything();
        let mut request = AtomicRequest::new();
        let mut flip = 0;
        let mut commits = 0;

        apply(
            &mut planes,
            &mut output,
            &[crtc_handle(1)],
            &mut probe,
            &mut request,
            ApplyFlags::empty(),
            &mut flip,
            &mut commits,
        )
        .unwrap();

        assert_eq!(output.layers[0].plane, Some(0));
        assert!(!output.needs_composition());
        assert!(commits > 0);
    }

    #[test]
    fn two_non_overlapping_overlays_each_get_a_plane() {
        let mut planes = vec![
            test_plane(10, crate::plane::PlaneType::Primary, 0b1, 0),
            test_plane(11, crate::plane::PlaneType::Overlay, 0b1, 1),
            test_plane(12, crate::plane::PlaneType::Overlay, 0b1, 2),
        ];
        let mut output = Output::new(crtc_handle(1), 0);
        output.add_layer(visible_layer(Some(1), 0, 0, 50, 50));
        output.add_layer(visible_layer(Some(2), 200, 200, 50, 50));
        let mut probe = FakeKernel::accepts_everything();
        let mut request = AtomicRequest::new();
        let mut flip = 0;
        let mut commits = 0;

        apply(
            &mut planes,
            &mut output,
            &[crtc_handle(1)],
            &mut probe,
            &mut request,
            ApplyFlags::empty(),
            &mut flip,
            &mut commits,
        )
        .unwrap();

        assert!(output.layers[0].plane.is_some());
        assert!(output.layers[1].plane.is_some());
        assert_ne!(output.layers[0].plane, output.layers[1].plane);
    }

    #[test]
    fn driver_rejected_plane_falls_back_to_composition() {
        let mut planes = vec![
            test_plane(10, crate::plane::PlaneType::Primary, 0b1, 0),
            test_plane(11, crate::plane::PlaneType::Overlay, 0b1, 1),
        ];
        let overlay_object: RawResourceHandle = plane_handle(11).into();
        let mut output = Output::new(crtc_handle(1), 0);
        output.add_layer(visible_layer(Some(1), 0, 0, 50, 50));
        let mut probe = FakeKernel { test_commits: 0, reject: Some(overlay_object), fb_to_return: None };
        let mut request = AtomicRequest::new();
        let mut flip = 0;
        let mut commits = 0;

        apply(
            &mut planes,
            &mut output,
            &[crtc_handle(1)],
            &mut probe,
            &mut request,
            ApplyFlags::empty(),
            &mut flip,
            &mut commits,
        )
        .unwrap();

        // The overlay always fails its probe, but the primary plane can
        // still take the layer directly (no GPU composition needed here).
        assert_eq!(output.layers[0].plane, Some(0));
    }

    #[test]
    fn composition_layer_is_not_used_when_everything_else_placed_directly() {
        // A composition layer must never be preferred over an all-hardware
        // placement just because it would (wrongly) inflate `score` — a
        // terminal where `composited` is set but every other visible layer
        // already has a plane of its own is invalid.
        let mut planes = vec![
            test_plane(10, crate::plane::PlaneType::Primary, 0b1, 0),
            test_plane(11, crate::plane::PlaneType::Overlay, 0b1, 1),
        ];
        let mut output = Output::new(crtc_handle(1), 0);
        let l1_idx = output.add_layer(visible_layer(Some(1), 0, 0, 50, 50));
        let mut comp_layer = Layer::new();
        comp_layer.mark_composited();
        let comp_idx = output.add_layer(comp_layer);
        output.set_composition_layer(Some(comp_idx));

        let mut probe = FakeKernel::accepts_everything();
        let mut request = AtomicRequest::new();
        let mut flip = 0;
        let mut commits = 0;

        apply(
            &mut planes,
            &mut output,
            &[crtc_handle(1)],
            &mut probe,
            &mut request,
            ApplyFlags::empty(),
            &mut flip,
            &mut commits,
        )
        .unwrap();

        assert!(output.layers[l1_idx].plane.is_some(), "the real layer should land on a plane");
        assert!(output.layers[comp_idx].plane.is_none(), "composition is wasteful here and must be skipped");
        assert!(!output.needs_composition());
    }

    #[test]
    fn composition_layer_absorbs_the_layer_that_has_no_plane() {
        // Mirrors scenario 3: the overlay always rejects, so with a
        // composition layer designated, the allocator must place the
        // composition layer on PRIMARY while the unplaceable layer falls
        // through — and the placed composition layer must not count toward
        // `score`.
        let mut planes = vec![
            test_plane(10, crate::plane::PlaneType::Primary, 0b1, 0),
            test_plane(11, crate::plane::PlaneType::Overlay, 0b1, 1),
        ];
        let overlay_object: RawResourceHandle = plane_handle(11).into();
        let mut output = Output::new(crtc_handle(1), 0);
        let l1_idx = output.add_layer(visible_layer(Some(1), 0, 0, 50, 50));
        let l2_idx = output.add_layer(visible_layer(Some(2), 200, 200, 50, 50));
        let mut comp_layer = Layer::new();
        comp_layer.mark_composited();
        let comp_idx = output.add_layer(comp_layer);
        output.set_composition_layer(Some(comp_idx));

        let mut probe = FakeKernel { test_commits: 0, reject: Some(overlay_object), fb_to_return: None };
        let mut request = AtomicRequest::new();
        let mut flip = 0;
        let mut commits = 0;

        apply(
            &mut planes,
            &mut output,
            &[crtc_handle(1)],
            &mut probe,
            &mut request,
            ApplyFlags::empty(),
            &mut flip,
            &mut commits,
        )
        .unwrap();

        assert_eq!(output.layers[comp_idx].plane, Some(0), "composition layer must land on PRIMARY");
        let placed_count = [l1_idx, l2_idx].iter().filter(|&&idx| output.layers[idx].plane.is_some()).count();
        assert_eq!(placed_count, 0, "neither overlay-only layer can take the rejected overlay plane");
        assert!(output.needs_composition());
    }

    #[test]
    fn reuse_path_skips_a_fresh_search() {
        let mut planes = vec![test_plane(10, crate::plane::PlaneType::Primary, 0b1, 0)];
        let mut output = Output::new(crtc_handle(1), 0);
        output.add_layer(visible_layer(None, 0, 0, 100, 100));
        let mut probe = FakeKernel::accepts_everything();
        let mut request = AtomicRequest::new();
        let mut flip = 0;
        let mut commits = 0;

        apply(&mut planes, &mut output, &[crtc_handle(1)], &mut probe, &mut request, ApplyFlags::empty(), &mut flip, &mut commits).unwrap();
        let commits_after_first = commits;
        assert!(commits_after_first > 0);

        apply(&mut planes, &mut output, &[crtc_handle(1)], &mut probe, &mut request, ApplyFlags::empty(), &mut flip, &mut commits).unwrap();

        assert_eq!(
            commits,
            commits_after_first + 1,
            "reuse path confirms with exactly one test-commit"
        );
        assert_eq!(output.reuse_count, 1);
    }

    #[test]
    fn fb_size_change_invalidates_reuse() {
        let mut planes = vec![test_plane(10, crate::plane::PlaneType::Primary, 0b1, 0)];
        let mut output = Output::new(crtc_handle(1), 0);
        output.add_layer(visible_layer(None, 0, 0, 100, 100));
        let mut probe = FakeKernel::accepts_everything();
        probe.fb_to_return = Some(FbInfo {
            width: 1920,
            height: 1080,
            pixel_format: DrmFourcc::Xrgb8888,
            modifier: DrmModifier::Linear,
            has_modifier: false,
        });
        let mut request = AtomicRequest::new();
        let mut flip = 0;
        let mut commits = 0;
        apply(&mut planes, &mut output, &[crtc_handle(1)], &mut probe, &mut request, ApplyFlags::empty(), &mut flip, &mut commits).unwrap();

        // A new buffer of a different size lands on the next frame — the
        // client swaps FB_ID as usual, but the driver now reports new
        // dimensions for it.
        output.layers[0].set_property(PropertyIndex::FbId, 99).unwrap();
        probe.fb_to_return = Some(FbInfo {
            width: 640,
            height: 480,
            pixel_format: DrmFourcc::Xrgb8888,
            modifier: DrmModifier::Linear,
            has_modifier: false,
        });

        let commits_before = commits;
        apply(&mut planes, &mut output, &[crtc_handle(1)], &mut probe, &mut request, ApplyFlags::empty(), &mut flip, &mut commits).unwrap();
        assert!(commits > commits_before, "size change must force a fresh search, not a reuse");
    }
}
