//! Per-CRTC collection of layers plus the optional composition layer.

use drm::control::crtc;

use crate::layer::Layer;

/// One output (CRTC) and the layers the client wants shown on it.
#[derive(Debug)]
pub struct Output {
    pub crtc_id: crtc::Handle,
    /// Index into the device's CRTC-id array; used to test a plane's
    /// possible-CRTC mask.
    pub crtc_index: usize,
    /// Insertion order = client stacking order, for clients not using zpos.
    pub layers: Vec<Layer>,
    /// Index into `layers` of the client-designated composition layer, if
    /// any. Never assigned to a non-PRIMARY plane.
    pub composition_layer: Option<usize>,
    /// Set when a layer was added, removed, or the composition-layer
    /// designation changed — forces a fresh search on the next `apply`.
    pub layers_changed: bool,
    /// Debug counter: incremented every time `apply` takes the reuse path.
    pub reuse_count: u64,
}

impl Output {
    pub fn new(crtc_id: crtc::Handle, crtc_index: usize) -> Self {
        Output {
            crtc_id,
            crtc_index,
            layers: Vec::new(),
            composition_layer: None,
            layers_changed: false,
            reuse_count: 0,
        }
    }

    pub fn add_layer(&mut self, layer: Layer) -> usize {
        self.layers.push(layer);
        self.layers_changed = true;
        self.layers.len() - 1
    }

    pub fn remove_layer(&mut self, index: usize) {
        self.layers.remove(index);
        if let Some(comp) = self.composition_layer {
            self.composition_layer = match comp.cmp(&index) {
                std::cmp::Ordering::Equal => None,
                std::cmp::Ordering::Greater => Some(comp - 1),
                std::cmp::Ordering::Less => Some(comp),
            };
        }
        self.layers_changed = true;
    }

    pub fn set_composition_layer(&mut self, index: Option<usize>) {
        if self.composition_layer != index {
            self.composition_layer = index;
            self.layers_changed = true;
        }
    }

    /// Count of currently visible, non-composition layers.
    pub fn visible_non_composition_count(&self) -> usize {
        self.layers
            .iter()
            .enumerate()
            .filter(|(idx, l)| Some(*idx) != self.composition_layer && l.visible())
            .count()
    }

    /// True if any visible layer currently lacks a
    /// plane, i.e. the composition layer is (or would be) in use.
    pub fn needs_composition(&self) -> bool {
        self.layers
            .iter()
            .enumerate()
            .any(|(idx, l)| Some(idx) != self.composition_layer && l.visible() && l.plane.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crtc_handle(raw: u32) -> crtc::Handle {
        crtc::Handle::from(std::num::NonZeroU32::new(raw).unwrap())
    }

    #[test]
    fn remove_layer_shifts_composition_index() {
        let mut output = Output::new(crtc_handle(1), 0);
        output.add_layer(Layer::new());
        output.add_layer(Layer::new());
        output.add_layer(Layer::new());
        output.set_composition_layer(Some(2));
        output.remove_layer(0);
        assert_eq!(output.composition_layer, Some(1));
    }

    #[test]
    fn remove_layer_clears_composition_when_removed() {
        let mut output = Output::new(crtc_handle(1), 0);
        output.add_layer(Layer::new());
        output.set_composition_layer(Some(0));
        output.remove_layer(0);
        assert_eq!(output.composition_layer, None);
    }
}
