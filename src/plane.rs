//! Hardware plane bookkeeping.

use crate::collections::Id;
use crate::layer::LayerRef;
use crate::property::{Property, PropertyKind, PropertyMeta};

pub type PlaneId = Id<Plane>;

/// The kernel's classification of a plane, as reported by its `type` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneType {
    Primary,
    Overlay,
    Cursor,
}

/// One format/modifier pair a plane's framebuffer can use, covering up to 64
/// formats relative to `offset` (the layout `IN_FORMATS` blobs use).
#[derive(Debug, Clone)]
pub struct FormatModifier {
    pub modifier: u64,
    /// Index of the first format this modifier's bitmask covers.
    pub offset: usize,
    /// Bit `i` is set iff format `offset + i` supports `modifier`.
    pub formats: u64,
}

/// Parsed contents of a plane's `IN_FORMATS` blob.
#[derive(Debug, Clone, Default)]
pub struct InFormats {
    pub formats: Vec<u32>,
    pub modifiers: Vec<FormatModifier>,
}

impl InFormats {
    /// Whether `(pixel_format, modifier)` appears in this blob.
    ///
    /// Mirrors the bit-twiddling `drm_format_modifier_blob` walk every KMS
    /// driver expects userspace to perform: formats and modifiers are both
    /// flattened arrays, and a modifier entry claims support for up to 64
    /// formats relative to its `offset` via a bitmask.
    pub fn supports(&self, pixel_format: u32, modifier: u64) -> bool {
        let Some(format_index) = self.formats.iter().position(|&f| f == pixel_format) else {
            return false;
        };
        let Some(entry) = self.modifiers.iter().find(|m| m.modifier == modifier) else {
            return false;
        };
        if format_index < entry.offset || format_index >= entry.offset + 64 {
            return false;
        }
        entry.formats & (1u64 << (format_index - entry.offset)) != 0
    }
}

/// A hardware plane known to the device.
#[derive(Debug)]
pub struct Plane {
    /// The kernel's DRM object id for this plane.
    pub(crate) id: u32,
    pub(crate) kind: PlaneType,
    /// Bitmask of CRTC indices this plane can be attached to.
    pub(crate) possible_crtcs: u32,
    pub(crate) zpos: i64,
    pub(crate) properties: [Option<PropertyMeta>; Property::COUNT],
    pub(crate) in_formats: Option<InFormats>,
    pub(crate) bound_layer: Option<LayerRef>,
}

impl Plane {
    pub(crate) fn new(
        id: u32,
        kind: PlaneType,
        possible_crtcs: u32,
        zpos: i64,
        properties: [Option<PropertyMeta>; Property::COUNT],
        in_formats: Option<InFormats>,
    ) -> Self {
        Plane {
            id,
            kind,
            possible_crtcs,
            zpos,
            properties,
            in_formats,
            bound_layer: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> PlaneType {
        self.kind
    }

    pub fn zpos(&self) -> i64 {
        self.zpos
    }

    pub fn possible_crtcs(&self) -> u32 {
        self.possible_crtcs
    }

    pub fn can_attach_to(&self, crtc_index: usize) -> bool {
        crtc_index < 32 && self.possible_crtcs & (1 << crtc_index) != 0
    }

    pub fn is_bound(&self) -> bool {
        self.bound_layer.is_some()
    }

    pub(crate) fn property(&self, property: Property) -> Option<&PropertyMeta> {
        self.properties[property.index()].as_ref()
    }

    pub fn in_formats(&self) -> Option<&InFormats> {
        self.in_formats.as_ref()
    }
}

/// A plane with no `zpos` property reports one to the kernel via this guess
/// so it can still be ordered relative to planes that do.
///
/// `known_primary_id` is the id of the device's current primary plane (there
/// is always at most one); ties are broken on plane id purely to produce a
/// deterministic order, matching hardware where overlay planes of unknown
/// relative depth are rare in the first place.
pub(crate) fn guess_zpos(id: u32, kind: PlaneType, known_primary_id: Option<u32>) -> i64 {
    match kind {
        PlaneType::Primary => 0,
        PlaneType::Cursor => 2,
        PlaneType::Overlay => match known_primary_id {
            None => 0,
            Some(primary_id) => {
                if id < primary_id {
                    -1
                } else {
                    1
                }
            }
        },
    }
}
