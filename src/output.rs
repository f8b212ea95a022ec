//! Output (CRTC) bookkeeping: the ordered list of layers targeting one CRTC.

use crate::collections::{Arena, Id};
use crate::device::CrtcId;
use crate::layer::{Layer, LayerId};

pub type OutputId = Id<Output>;

/// One CRTC's worth of layers.
///
/// Layers live in an arena owned by the output, not a device-global one:
/// dropping an `Output` drops every layer it owns along with it. The
/// original C implementation instead leaves a dangling `layer->output`
/// pointer if a caller destroys an output before its layers — callers here
/// get memory safety instead, at the cost of losing access to layers that
/// were never explicitly destroyed first.
#[derive(Debug)]
pub struct Output {
    pub(crate) crtc_id: CrtcId,
    pub(crate) crtc_index: usize,
    pub(crate) layers: Arena<Layer>,
    pub(crate) layer_order: Vec<LayerId>,
    pub(crate) composition_layer: Option<LayerId>,
    pub(crate) layers_changed: bool,
    pub(crate) alloc_reused_counter: u32,
}

impl Output {
    pub(crate) fn new(crtc_id: CrtcId, crtc_index: usize) -> Self {
        Output {
            crtc_id,
            crtc_index,
            layers: Arena::new(),
            layer_order: Vec::new(),
            composition_layer: None,
            layers_changed: false,
            alloc_reused_counter: 0,
        }
    }

    pub fn crtc_id(&self) -> CrtcId {
        self.crtc_id
    }

    pub fn create_layer(&mut self) -> LayerId {
        let id = self.layers.insert(Layer::new());
        self.layer_order.push(id);
        self.layers_changed = true;
        id
    }

    pub fn destroy_layer(&mut self, id: LayerId) -> bool {
        let removed = self.layers.remove(id).is_some();
        if removed {
            self.layer_order.retain(|&l| l != id);
            if self.composition_layer == Some(id) {
                self.composition_layer = None;
            }
            self.layers_changed = true;
        }
        removed
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(id)
    }

    pub fn layers(&self) -> impl Iterator<Item = (LayerId, &Layer)> {
        self.layer_order.iter().filter_map(move |&id| self.layers.get(id).map(|l| (id, l)))
    }

    /// Designate `layer` as the layer that receives compositor output when
    /// the allocator can't place every visible layer on hardware. Passing
    /// `None` clears the designation.
    pub fn set_composition_layer(&mut self, layer: Option<LayerId>) {
        if let Some(id) = layer {
            if !self.layers.contains(id) {
                return;
            }
        }
        if self.composition_layer != layer {
            self.layers_changed = true;
        }
        self.composition_layer = layer;
    }

    pub fn composition_layer(&self) -> Option<LayerId> {
        self.composition_layer
    }

    /// True if any visible layer currently has no plane and will be drawn by
    /// the compositor's own rendering path instead.
    pub fn needs_composition(&self) -> bool {
        self.layers().any(|(_, layer)| layer.needs_composition())
    }

    pub(crate) fn non_composited_visible_count(&self) -> u32 {
        self.layers()
            .filter(|&(id, layer)| layer.is_visible() && Some(id) != self.composition_layer)
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Property;

    fn output() -> Output {
        Output::new(CrtcId(1), 0)
    }

    #[test]
    fn create_destroy_layer_tracks_order() {
        let mut out = output();
        let a = out.create_layer();
        let b = out.create_layer();
        assert_eq!(out.layer_order, vec![a, b]);
        out.destroy_layer(a);
        assert_eq!(out.layer_order, vec![b]);
    }

    #[test]
    fn destroying_composition_layer_clears_designation() {
        let mut out = output();
        let a = out.create_layer();
        out.set_composition_layer(Some(a));
        out.destroy_layer(a);
        assert_eq!(out.composition_layer(), None);
    }

    #[test]
    fn needs_composition_true_when_visible_layer_unbound() {
        let mut out = output();
        let a = out.create_layer();
        out.layer_mut(a).unwrap().set_property(Property::FbId, 1).unwrap();
        assert!(out.needs_composition());
    }
}
