//! Client-facing layer bookkeeping.

use crate::collections::Id;
use crate::device::OutputId;
use crate::error::PropertyError;
use crate::plane::PlaneId;
use crate::property::Property;

pub type LayerId = Id<Layer>;

/// A reference to a layer owned by a particular output.
///
/// [`Layer`] ids are only unique within the [`Output`](crate::output::Output)
/// that owns the arena they live in, so anything that needs to name a layer
/// from outside that output (a bound [`Plane`](crate::plane::Plane), in
/// particular) has to carry the owning output alongside the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerRef {
    pub output: OutputId,
    pub layer: LayerId,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PropertySlot {
    pub value: u64,
    pub prev: u64,
}

/// Framebuffer metadata cached on a layer, used to decide whether a change
/// to `FB_ID` can be serviced by the previous plane allocation or forces a
/// fresh search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FbInfo {
    pub fb_id: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub modifier: u64,
    pub has_modifier: bool,
}

impl FbInfo {
    /// Whether switching from `self` to `other` requires a new plane
    /// (pitch and byte offsets are deliberately not compared: a driver that
    /// rejects those will surface it at test-commit time instead).
    pub(crate) fn needs_realloc(&self, other: &FbInfo) -> bool {
        self.width != other.width
            || self.height != other.height
            || self.pixel_format != other.pixel_format
            || self.modifier != other.modifier
    }
}

/// A client-requested layer: a rectangle of pixels somewhere on an output,
/// expressed purely as a set of property values until a plane is found for it.
#[derive(Debug)]
pub struct Layer {
    pub(crate) properties: [Option<PropertySlot>; Property::COUNT],
    pub(crate) bound_plane: Option<PlaneId>,
    pub(crate) fb_info: FbInfo,
    pub(crate) prev_fb_info: FbInfo,
    pub(crate) candidate_planes: Vec<PlaneId>,
    pub(crate) changed: bool,
    pub(crate) force_comp: bool,
    pub(crate) current_priority: u32,
    pub(crate) pending_priority: u32,
}

impl Default for Layer {
    fn default() -> Self {
        Layer {
            properties: [None; Property::COUNT],
            bound_plane: None,
            fb_info: FbInfo::default(),
            prev_fb_info: FbInfo::default(),
            candidate_planes: Vec::new(),
            changed: false,
            force_comp: false,
            current_priority: 0,
            pending_priority: 0,
        }
    }
}

impl Layer {
    pub(crate) fn new() -> Self {
        Layer::default()
    }

    pub fn bound_plane(&self) -> Option<PlaneId> {
        self.bound_plane
    }

    pub fn needs_composition(&self) -> bool {
        self.is_visible() && self.bound_plane.is_none()
    }

    pub(crate) fn property_raw(&self, property: Property) -> Option<u64> {
        self.properties[property.index()].map(|slot| slot.value)
    }

    pub(crate) fn zpos(&self) -> Option<i64> {
        self.property_raw(Property::Zpos).map(|v| v as i64)
    }

    /// A layer is invisible if `ALPHA` is present and zero; visible if it is
    /// marked for forced composition; otherwise visible iff it carries a
    /// nonzero `FB_ID`.
    pub fn is_visible(&self) -> bool {
        if let Some(alpha) = self.property_raw(Property::Alpha) {
            if alpha == 0 {
                return false;
            }
        }
        if self.force_comp {
            return true;
        }
        matches!(self.property_raw(Property::FbId), Some(fb_id) if fb_id != 0)
    }

    pub fn rect(&self) -> Rect {
        Rect {
            x: self.property_raw(Property::CrtcX).unwrap_or(0) as i64,
            y: self.property_raw(Property::CrtcY).unwrap_or(0) as i64,
            w: self.property_raw(Property::CrtcW).unwrap_or(0) as i64,
            h: self.property_raw(Property::CrtcH).unwrap_or(0) as i64,
        }
    }

    /// Two layers intersect iff both are visible and their `CRTC_{X,Y,W,H}`
    /// rectangles overlap.
    pub fn intersects(&self, other: &Layer) -> bool {
        if !self.is_visible() || !other.is_visible() {
            return false;
        }
        self.rect().intersects(&other.rect())
    }

    /// Set a property value. Rejects `CRTC_ID`, which this crate derives
    /// from the layer's output and never lets a caller override.
    pub fn set_property(&mut self, property: Property, value: u64) -> Result<(), PropertyError> {
        if property == Property::CrtcId {
            return Err(PropertyError("CRTC_ID is derived from the layer's output and cannot be set directly"));
        }
        let was_set = self.properties[property.index()].is_some();
        let prev = self.properties[property.index()].map(|s| s.prev).unwrap_or(0);
        self.properties[property.index()] = Some(PropertySlot { value, prev: if was_set { prev } else { value } });
        // Only a newly-added property (or clearing `force_comp`) marks the
        // layer dirty outright; an ordinary value update on an
        // already-present property leaves `changed` alone and is judged by
        // `reuse::layer_needs_realloc` comparing against `prev` instead.
        if !was_set {
            self.changed = true;
        }
        if property == Property::FbId && self.force_comp {
            self.force_comp = false;
            self.changed = true;
        }
        Ok(())
    }

    pub fn unset_property(&mut self, property: Property) {
        if self.properties[property.index()].take().is_some() {
            self.changed = true;
        }
    }

    /// Mark this layer as always requiring composition, regardless of
    /// whether a plane could otherwise be found for it. Clears `FB_ID` as a
    /// side effect, since a force-composited layer is never staged directly.
    pub fn set_force_composited(&mut self) {
        if self.force_comp {
            return;
        }
        let _ = self.set_property(Property::FbId, 0);
        self.force_comp = true;
        self.changed = true;
    }

    pub fn is_force_composited(&self) -> bool {
        self.force_comp
    }

    pub fn current_priority(&self) -> u32 {
        self.current_priority
    }

    pub(crate) fn mark_clean(&mut self) {
        self.changed = false;
        self.prev_fb_info = self.fb_info;
        for slot in self.properties.iter_mut().flatten() {
            slot.prev = slot.value;
        }
    }
}

/// An axis-aligned rectangle in output coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

impl Rect {
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invisible_without_fb_id() {
        let layer = Layer::new();
        assert!(!layer.is_visible());
    }

    #[test]
    fn visible_with_nonzero_fb_id() {
        let mut layer = Layer::new();
        layer.set_property(Property::FbId, 42).unwrap();
        assert!(layer.is_visible());
    }

    #[test]
    fn zero_alpha_overrides_visibility() {
        let mut layer = Layer::new();
        layer.set_property(Property::FbId, 42).unwrap();
        layer.set_property(Property::Alpha, 0).unwrap();
        assert!(!layer.is_visible());
    }

    #[test]
    fn force_composited_is_visible_without_fb_id() {
        let mut layer = Layer::new();
        layer.set_force_composited();
        assert!(layer.is_visible());
        assert_eq!(layer.property_raw(Property::FbId), Some(0));
    }

    #[test]
    fn setting_fb_id_clears_force_composited() {
        let mut layer = Layer::new();
        layer.set_force_composited();
        layer.set_property(Property::FbId, 7).unwrap();
        assert!(!layer.is_force_composited());
    }

    #[test]
    fn crtc_id_cannot_be_set() {
        let mut layer = Layer::new();
        assert!(layer.set_property(Property::CrtcId, 1).is_err());
    }

    #[test]
    fn rects_overlap_half_open() {
        let a = Rect { x: 0, y: 0, w: 10, h: 10 };
        let b = Rect { x: 5, y: 5, w: 10, h: 10 };
        let c = Rect { x: 10, y: 10, w: 10, h: 10 };
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
