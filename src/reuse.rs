//! Reuse guard: decides whether the previous plane allocation for an output
//! can be restaged as-is, skipping a full search.

use crate::backend::{Backend, CommitError};
use crate::device::{Device, OutputId};
use crate::layer::Layer;
use crate::property::Property;
use crate::request::{AtomicRequest, CommitFlags};

/// Whether `layer`'s pending property changes are "harmless" enough that
/// its current plane (if any) can keep showing it without a fresh search.
///
/// A single non-harmless change anywhere on the layer forces a realloc, so
/// this returns as soon as one is found.
pub(crate) fn layer_needs_realloc(layer: &Layer) -> bool {
    if layer.changed {
        return true;
    }

    for property in Property::ALL {
        let Some(slot) = layer.properties[property.index()] else {
            continue;
        };

        if property == Property::FbId {
            if slot.value == 0 && slot.prev == 0 {
                continue;
            }
            if (slot.value == 0) != (slot.prev == 0) {
                return true;
            }
            if layer.prev_fb_info.needs_realloc(&layer.fb_info) {
                return true;
            }
            continue;
        }

        if slot.value == slot.prev {
            continue;
        }

        match property {
            Property::Alpha => {
                let is_edge = |v: u64| v == 0 || v == 0xFFFF;
                if is_edge(slot.value) || is_edge(slot.prev) {
                    return true;
                }
            }
            Property::InFenceFd | Property::FbDamageClips => {}
            _ => return true,
        }
    }

    false
}

/// Try to restage the previous plane allocation for `output` directly,
/// without running the allocator. Returns `true` and leaves the staged
/// properties in `request` on success; on failure, leaves `request`
/// untouched (any speculative staging is rewound) so the caller can fall
/// through to a full search.
pub(crate) fn try_reuse<B: Backend>(
    device: &mut Device<B>,
    output_id: OutputId,
    request: &mut AtomicRequest,
    flags: CommitFlags,
) -> bool {
    {
        let Some(output) = device.outputs.get(output_id) else {
            return false;
        };
        if output.layers_changed {
            return false;
        }
        if output
            .layer_order
            .iter()
            .any(|&id| output.layers.get(id).map(layer_needs_realloc).unwrap_or(false))
        {
            return false;
        }
    }

    let cursor = request.cursor();
    if crate::allocator::apply_current(device, request).is_err() {
        request.rewind(cursor);
        return false;
    }

    match device.backend_mut().test_commit(request, flags.for_test_commit()) {
        Ok(()) => true,
        Err(CommitError::Invalid) | Err(CommitError::Range) | Err(CommitError::NoSpace) | Err(CommitError::Backend(_)) => {
            request.rewind(cursor);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_layer_does_not_need_realloc() {
        let mut layer = Layer::default();
        layer.set_property(Property::FbId, 1).unwrap();
        layer.mark_clean();
        assert!(!layer_needs_realloc(&layer));
    }

    #[test]
    fn fb_id_transition_from_zero_needs_realloc() {
        let mut layer = Layer::default();
        layer.set_property(Property::FbId, 0).unwrap();
        layer.mark_clean();
        layer.set_property(Property::FbId, 1).unwrap();
        assert!(layer_needs_realloc(&layer));
    }

    #[test]
    fn fb_id_same_dimensions_does_not_need_realloc() {
        let mut layer = Layer::default();
        layer.set_property(Property::FbId, 1).unwrap();
        layer.fb_info.width = 100;
        layer.fb_info.height = 100;
        layer.mark_clean();
        layer.set_property(Property::FbId, 2).unwrap();
        // fb_info deliberately left identical: same dimensions/format/modifier.
        assert!(!layer_needs_realloc(&layer));
    }

    #[test]
    fn alpha_edge_crossing_needs_realloc() {
        let mut layer = Layer::default();
        layer.set_property(Property::FbId, 1).unwrap();
        layer.set_property(Property::Alpha, 0xFFFF).unwrap();
        layer.mark_clean();
        layer.set_property(Property::Alpha, 0x8000).unwrap();
        assert!(layer_needs_realloc(&layer));
    }

    #[test]
    fn alpha_change_between_non_edge_values_is_harmless() {
        let mut layer = Layer::default();
        layer.set_property(Property::FbId, 1).unwrap();
        layer.set_property(Property::Alpha, 0x8000).unwrap();
        layer.mark_clean();
        layer.set_property(Property::Alpha, 0x4000).unwrap();
        assert!(!layer_needs_realloc(&layer));
    }

    #[test]
    fn in_fence_fd_change_is_always_harmless() {
        let mut layer = Layer::default();
        layer.set_property(Property::FbId, 1).unwrap();
        layer.set_property(Property::InFenceFd, 3).unwrap();
        layer.mark_clean();
        layer.set_property(Property::InFenceFd, 9).unwrap();
        assert!(!layer_needs_realloc(&layer));
    }

    #[test]
    fn unrelated_property_change_forces_realloc() {
        let mut layer = Layer::default();
        layer.set_property(Property::FbId, 1).unwrap();
        layer.set_property(Property::CrtcX, 0).unwrap();
        layer.mark_clean();
        layer.set_property(Property::CrtcX, 5).unwrap();
        assert!(layer_needs_realloc(&layer));
    }
}
