//! The closed set of DRM properties the allocator reasons about.
//!
//! Every property the kernel can report on a plane is ultimately a `u64` on
//! the wire, whatever its semantic type. [`PropertyKind`] captures the four
//! shapes the kernel actually exposes (`drmModeGetProperty`'s `flags` field)
//! so a raw value can be validated before it is ever staged into a request.

/// A DRM/KMS property name relevant to plane allocation.
///
/// This is a closed enumeration: the allocator never needs to reason about
/// properties outside this set. Both [`crate::layer::Layer`] and
/// [`crate::plane::Plane`] index their property tables by it, so the order
/// here doubles as the storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Type,
    FbId,
    CrtcId,
    CrtcX,
    CrtcY,
    CrtcW,
    CrtcH,
    SrcX,
    SrcY,
    SrcW,
    SrcH,
    Zpos,
    Alpha,
    Rotation,
    ScalingFilter,
    PixelBlendMode,
    FbDamageClips,
    InFenceFd,
    InFormats,
}

impl Property {
    pub const COUNT: usize = 19;

    pub const ALL: [Property; Property::COUNT] = [
        Property::Type,
        Property::FbId,
        Property::CrtcId,
        Property::CrtcX,
        Property::CrtcY,
        Property::CrtcW,
        Property::CrtcH,
        Property::SrcX,
        Property::SrcY,
        Property::SrcW,
        Property::SrcH,
        Property::Zpos,
        Property::Alpha,
        Property::Rotation,
        Property::ScalingFilter,
        Property::PixelBlendMode,
        Property::FbDamageClips,
        Property::InFenceFd,
        Property::InFormats,
    ];

    /// Index into the fixed-size property arrays used by [`Plane`](crate::plane::Plane)
    /// and [`Layer`](crate::layer::Layer).
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// The property name as reported by `drmModeGetProperty`, used by a
    /// [`Backend`](crate::backend::Backend) implementation to match kernel
    /// properties back onto this enum.
    pub fn drm_name(self) -> &'static str {
        match self {
            Property::Type => "type",
            Property::FbId => "FB_ID",
            Property::CrtcId => "CRTC_ID",
            Property::CrtcX => "CRTC_X",
            Property::CrtcY => "CRTC_Y",
            Property::CrtcW => "CRTC_W",
            Property::CrtcH => "CRTC_H",
            Property::SrcX => "SRC_X",
            Property::SrcY => "SRC_Y",
            Property::SrcW => "SRC_W",
            Property::SrcH => "SRC_H",
            Property::Zpos => "zpos",
            Property::Alpha => "alpha",
            Property::Rotation => "rotation",
            Property::ScalingFilter => "SCALING_FILTER",
            Property::PixelBlendMode => "pixel blend mode",
            Property::FbDamageClips => "FB_DAMAGE_CLIPS",
            Property::InFenceFd => "IN_FENCE_FD",
            Property::InFormats => "IN_FORMATS",
        }
    }

    pub fn from_drm_name(name: &str) -> Option<Property> {
        Property::ALL.into_iter().find(|p| p.drm_name() == name)
    }
}

/// The shape of a property's legal values, as reported by the kernel.
#[derive(Debug, Clone)]
pub enum PropertyKind {
    /// An unsigned range `[min, max]`.
    Range { min: u64, max: u64 },
    /// A signed range; the wire value's bit pattern is reinterpreted as `i64`.
    SignedRange { min: i64, max: i64 },
    /// One of a fixed set of enum values.
    Enum(Vec<u64>),
    /// A bitmask built from a fixed set of enum values, each contributing one bit.
    Bitmask(Vec<u64>),
    /// An object property (e.g. `IN_FORMATS`), whose value is a blob id and
    /// whose legality can't be checked from the wire value alone.
    Blob,
}

impl PropertyKind {
    /// Whether a raw wire value satisfies this property's declared shape.
    pub fn accepts(&self, value: u64) -> bool {
        match self {
            PropertyKind::Range { min, max } => value >= *min && value <= *max,
            PropertyKind::SignedRange { min, max } => {
                let signed = value as i64;
                signed >= *min && signed <= *max
            }
            PropertyKind::Enum(values) => values.contains(&value),
            PropertyKind::Bitmask(bits) => {
                let mask = bits.iter().fold(0u64, |acc, bit| acc | (1u64 << bit));
                value & !mask == 0
            }
            PropertyKind::Blob => true,
        }
    }
}

/// Per-plane metadata for a single property, captured once at plane
/// registration time.
#[derive(Debug, Clone)]
pub struct PropertyMeta {
    /// The kernel's object id for this property, used when staging a value.
    pub id: u32,
    pub kind: PropertyKind,
    pub immutable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_accepts_bounds_inclusive() {
        let kind = PropertyKind::Range { min: 1, max: 4 };
        assert!(kind.accepts(1));
        assert!(kind.accepts(4));
        assert!(!kind.accepts(0));
        assert!(!kind.accepts(5));
    }

    #[test]
    fn signed_range_reinterprets_wire_bits() {
        let kind = PropertyKind::SignedRange { min: -100, max: 100 };
        let wire = (-5i64) as u64;
        assert!(kind.accepts(wire));
        assert!(!kind.accepts(200));
    }

    #[test]
    fn bitmask_rejects_bits_outside_declared_set() {
        let kind = PropertyKind::Bitmask(vec![0, 2]);
        assert!(kind.accepts(0b0000));
        assert!(kind.accepts(0b0001));
        assert!(kind.accepts(0b0100));
        assert!(kind.accepts(0b0101));
        assert!(!kind.accepts(0b0010));
    }

    #[test]
    fn drm_name_round_trips() {
        for prop in Property::ALL {
            assert_eq!(Property::from_drm_name(prop.drm_name()), Some(prop));
        }
        assert_eq!(Property::from_drm_name("not-a-property"), None);
    }
}
