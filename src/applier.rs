//! Stages a layer's properties onto a plane, or clears a plane entirely.

use crate::device::CrtcId;
use crate::layer::Layer;
use crate::plane::Plane;
use crate::property::Property;
use crate::request::AtomicRequest;

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("plane {plane} is missing property {property:?}")]
    MissingProperty { plane: u32, property: Property },
    #[error("plane {plane} property {property:?} is immutable")]
    Immutable { plane: u32, property: Property },
    #[error("plane {plane} rejected value {value} for property {property:?}")]
    InvalidValue { plane: u32, property: Property, value: u64 },
}

/// Properties a plane is allowed to simply not have, provided the layer only
/// ever asks for their identity value. A driver without per-plane alpha
/// blending, for instance, behaves exactly like `ALPHA = 0xFFFF` (opaque)
/// always being in effect.
fn is_tolerated_default(property: Property, value: u64) -> bool {
    match property {
        Property::Alpha => value == 0xFFFF,
        Property::Rotation => value == 1, // DRM_MODE_ROTATE_0
        Property::ScalingFilter => value == 0,
        Property::PixelBlendMode => value == 0,
        Property::FbDamageClips => true,
        _ => false,
    }
}

fn stage(plane: &Plane, property: Property, value: u64, request: &mut AtomicRequest) -> Result<(), ApplyError> {
    let meta = plane.property(property).ok_or(ApplyError::MissingProperty {
        plane: plane.id(),
        property,
    })?;
    if meta.immutable {
        return Err(ApplyError::Immutable { plane: plane.id(), property });
    }
    if !meta.kind.accepts(value) {
        return Err(ApplyError::InvalidValue {
            plane: plane.id(),
            property,
            value,
        });
    }
    request.add_property(plane.id(), meta.id, value);
    Ok(())
}

/// Stage `layer`'s properties onto `plane`, or disable the plane if `layer`
/// is `None`. `ZPOS` is never staged: it's read-only bookkeeping the
/// allocator consults, not a value planes accept changes to.
pub(crate) fn apply_to_request(
    plane: &Plane,
    layer: Option<&Layer>,
    crtc_id: CrtcId,
    request: &mut AtomicRequest,
) -> Result<(), ApplyError> {
    let Some(layer) = layer else {
        stage(plane, Property::FbId, 0, request)?;
        stage(plane, Property::CrtcId, 0, request)?;
        return Ok(());
    };

    let cursor = request.cursor();
    if let Err(err) = stage(plane, Property::CrtcId, crtc_id.0 as u64, request) {
        request.rewind(cursor);
        return Err(err);
    }

    for property in Property::ALL {
        if property == Property::Zpos || property == Property::CrtcId {
            continue;
        }
        let Some(value) = layer.property_raw(property) else {
            continue;
        };
        match plane.property(property) {
            Some(_) => {
                if let Err(err) = stage(plane, property, value, request) {
                    request.rewind(cursor);
                    return Err(err);
                }
            }
            None => {
                if !is_tolerated_default(property, value) {
                    request.rewind(cursor);
                    return Err(ApplyError::MissingProperty {
                        plane: plane.id(),
                        property,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Whether `plane`'s `IN_FORMATS` blob would reject `layer`'s current
/// framebuffer outright, letting the allocator skip a doomed test commit.
///
/// Returns `true` ("can't reject") whenever the check can't be performed:
/// no framebuffer yet, no modifier reported, or no `IN_FORMATS` blob at all.
pub(crate) fn check_layer_fb(plane: &Plane, layer: &Layer) -> bool {
    if layer.fb_info.fb_id == 0 || !layer.fb_info.has_modifier {
        return true;
    }
    match plane.in_formats() {
        Some(in_formats) => in_formats.supports(layer.fb_info.pixel_format, layer.fb_info.modifier),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::{fake_overlay, fake_primary};
    use crate::device::{CrtcId as Id, Device};
    use crate::property::Property;

    fn device_with_primary() -> (Device<crate::backend::test_support::FakeBackend>, crate::plane::PlaneId) {
        let mut backend = crate::backend::test_support::FakeBackend::new(vec![10]);
        backend.add_plane(1, fake_primary(1, 0b1));
        let mut device = Device::new(backend).unwrap();
        let plane = device.create_plane(1).unwrap();
        (device, plane)
    }

    #[test]
    fn unbound_plane_clears_fb_and_crtc() {
        let (device, plane_id) = device_with_primary();
        let plane = device.plane(plane_id).unwrap();
        let mut request = AtomicRequest::new();
        apply_to_request(plane, None, Id(10), &mut request).unwrap();
        assert_eq!(request.changes().len(), 2);
    }

    #[test]
    fn missing_nonzero_alpha_is_rejected() {
        let (device, plane_id) = device_with_primary();
        let plane = device.plane(plane_id).unwrap();
        let mut layer = crate::layer::Layer::default();
        layer.set_property(Property::FbId, 7).unwrap();
        layer.set_property(Property::Alpha, 0x8000).unwrap();
        let mut request = AtomicRequest::new();
        let result = apply_to_request(plane, Some(&layer), Id(10), &mut request);
        assert!(result.is_err());
        assert_eq!(request.changes().len(), 0);
    }

    #[test]
    fn opaque_alpha_tolerated_when_plane_lacks_property() {
        let (device, plane_id) = device_with_primary();
        let plane = device.plane(plane_id).unwrap();
        let mut layer = crate::layer::Layer::default();
        layer.set_property(Property::FbId, 7).unwrap();
        layer.set_property(Property::Alpha, 0xFFFF).unwrap();
        let mut request = AtomicRequest::new();
        assert!(apply_to_request(plane, Some(&layer), Id(10), &mut request).is_ok());
    }

    #[test]
    fn check_layer_fb_passes_without_in_formats() {
        let (device, plane_id) = device_with_primary();
        let plane = device.plane(plane_id).unwrap();
        let mut layer = crate::layer::Layer::default();
        layer.fb_info.fb_id = 1;
        layer.fb_info.has_modifier = true;
        assert!(check_layer_fb(plane, &layer));
    }
}
