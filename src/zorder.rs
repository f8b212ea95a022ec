//! Z-order constraint checking: rejects (layer, plane) pairings that would
//! commit hardware to a stacking order the client didn't ask for.

use crate::collections::Arena;
use crate::layer::{Layer, LayerId};
use crate::output::Output;
use crate::plane::{Plane, PlaneId, PlaneType};

/// Z-order bookkeeping threaded through the allocator's recursive search.
///
/// `last_layer_zpos` is the `zpos` of the most recently assigned non-primary
/// layer; `primary_layer_zpos`/`primary_plane_zpos` are the layer and plane
/// `zpos` recorded when the primary plane was assigned. Sentinels mirror the
/// original's `INT_MAX`/`INT_MIN` initial values so the first comparison
/// against each is always satisfied.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ZState {
    pub last_layer_zpos: i64,
    pub primary_layer_zpos: i64,
    pub primary_plane_zpos: i64,
}

impl ZState {
    pub(crate) const INITIAL: ZState = ZState {
        last_layer_zpos: i64::MAX,
        primary_layer_zpos: i64::MIN,
        primary_plane_zpos: i64::MAX,
    };

    /// Fold in the just-made assignment of `layer` to `plane`.
    pub(crate) fn advance(self, plane: &Plane, layer_zpos: Option<i64>) -> ZState {
        match (layer_zpos, plane.kind() == PlaneType::Primary) {
            (Some(zpos), false) => ZState {
                last_layer_zpos: zpos,
                ..self
            },
            (Some(zpos), true) => ZState {
                primary_layer_zpos: zpos,
                primary_plane_zpos: plane.zpos(),
                ..self
            },
            (None, _) => self,
        }
    }
}

/// Whether `layer` can be assigned to `plane` given everything already
/// decided for plane positions `0..pos` (`assignment`) and the layers still
/// unassigned anywhere in `output`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compatible(
    output: &Output,
    planes: &Arena<Plane>,
    plane_order: &[PlaneId],
    pos: usize,
    plane: &Plane,
    layer_id: LayerId,
    layer: &Layer,
    z: &ZState,
    assignment: &[Option<LayerId>],
) -> bool {
    let is_primary = plane.kind() == PlaneType::Primary;

    if let Some(zpos) = layer.zpos() {
        if zpos > z.last_layer_zpos && allocated_layer_over(output, plane_order, planes, assignment, pos, layer, zpos) {
            return false;
        }
        if zpos < z.last_layer_zpos && allocated_plane_under(output, plane_order, planes, assignment, pos, plane, layer) {
            return false;
        }
        if !is_primary && zpos < z.primary_layer_zpos && plane.zpos() > z.primary_plane_zpos {
            return false;
        }
    }

    if !is_primary && composited_layer_over(output, assignment, pos, layer_id, layer) {
        return false;
    }

    if !is_primary && output.composition_layer() == Some(layer_id) {
        return false;
    }

    true
}

/// True if some already-assigned non-primary-plane layer intersecting
/// `layer` has a lower `zpos` than it — i.e. `layer` would need to sit above
/// hardware that's already been committed to sitting below something else.
fn allocated_layer_over(
    output: &Output,
    plane_order: &[PlaneId],
    planes: &Arena<Plane>,
    assignment: &[Option<LayerId>],
    pos: usize,
    layer: &Layer,
    layer_zpos: i64,
) -> bool {
    for (index, &other_plane_id) in plane_order.iter().enumerate().take(pos) {
        let Some(other_plane) = planes.get(other_plane_id) else { continue };
        if other_plane.kind() == PlaneType::Primary {
            continue;
        }
        let Some(Some(other_layer_id)) = assignment.get(index) else { continue };
        let Some(other_layer) = output.layer(*other_layer_id) else { continue };
        let Some(other_zpos) = other_layer.zpos() else { continue };
        if layer_zpos > other_zpos && layer.intersects(other_layer) {
            return true;
        }
    }
    false
}

/// True if some already-assigned non-primary plane at-or-above `plane`'s
/// `zpos` holds a layer intersecting `layer` — i.e. plane assignment order
/// has been inverted relative to the stacking order the client wants.
fn allocated_plane_under(
    output: &Output,
    plane_order: &[PlaneId],
    planes: &Arena<Plane>,
    assignment: &[Option<LayerId>],
    pos: usize,
    plane: &Plane,
    layer: &Layer,
) -> bool {
    for (index, &other_plane_id) in plane_order.iter().enumerate().take(pos) {
        let Some(other_plane) = planes.get(other_plane_id) else { continue };
        if other_plane.kind() == PlaneType::Primary {
            continue;
        }
        let Some(Some(other_layer_id)) = assignment.get(index) else { continue };
        let Some(other_layer) = output.layer(*other_layer_id) else { continue };
        if plane.zpos() >= other_plane.zpos() && layer.intersects(other_layer) {
            return true;
        }
    }
    false
}

/// True if some other, still-unassigned visible layer with a higher `zpos`
/// intersects `layer` — i.e. hardware can't yet rule out that a layer still
/// waiting for a plane needs to be composited above `layer`.
fn composited_layer_over(output: &Output, assignment: &[Option<LayerId>], pos: usize, layer_id: LayerId, layer: &Layer) -> bool {
    let Some(layer_zpos) = layer.zpos() else { return false };
    for (other_id, other_layer) in output.layers() {
        if other_id == layer_id {
            continue;
        }
        if assignment[..pos].contains(&Some(other_id)) {
            continue;
        }
        let Some(other_zpos) = other_layer.zpos() else { continue };
        if other_zpos > layer_zpos && layer.intersects(other_layer) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CrtcId;
    use crate::property::Property;

    fn layer_with(output: &mut Output, zpos: i64, rect: (i64, i64, i64, i64)) -> LayerId {
        let id = output.create_layer();
        let layer = output.layer_mut(id).unwrap();
        layer.set_property(Property::FbId, 1).unwrap();
        layer.set_property(Property::Zpos, zpos as u64).unwrap();
        layer.set_property(Property::CrtcX, rect.0 as u64).unwrap();
        layer.set_property(Property::CrtcY, rect.1 as u64).unwrap();
        layer.set_property(Property::CrtcW, rect.2 as u64).unwrap();
        layer.set_property(Property::CrtcH, rect.3 as u64).unwrap();
        id
    }

    #[test]
    fn composited_layer_over_blocks_overlay_assignment() {
        let mut output = Output::new(CrtcId(1), 0);
        let bottom = layer_with(&mut output, 0, (0, 0, 10, 10));
        let _top = layer_with(&mut output, 1, (0, 0, 10, 10));

        let assignment: Vec<Option<LayerId>> = vec![];
        let bottom_layer = output.layer(bottom).unwrap();
        assert!(composited_layer_over(&output, &assignment, 0, bottom, bottom_layer));
    }

    #[test]
    fn non_overlapping_layers_never_block_each_other() {
        let mut output = Output::new(CrtcId(1), 0);
        let a = layer_with(&mut output, 0, (0, 0, 10, 10));
        let _b = layer_with(&mut output, 1, (100, 100, 10, 10));

        let assignment: Vec<Option<LayerId>> = vec![];
        let layer_a = output.layer(a).unwrap();
        assert!(!composited_layer_over(&output, &assignment, 0, a, layer_a));
    }
}
