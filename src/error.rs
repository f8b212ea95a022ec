//! Error types for device, output and layer operations.

use crate::device::CrtcId;
use crate::property::Property;

/// A caller passed a value this crate will never accept, independent of
/// kernel state — currently the only source is [`Layer::set_property`]
/// rejecting `CRTC_ID`.
///
/// Kept as its own unit type (rather than a bare `&'static str`) so
/// [`Error::InvalidArgument`] can carry it via `#[from]` without needing to
/// know a backend's error type, which [`Layer`](crate::layer::Layer) never
/// does.
///
/// [`Layer::set_property`]: crate::layer::Layer::set_property
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("{0}")]
pub struct PropertyError(pub(crate) &'static str);

/// Errors returned by [`Device`](crate::device::Device) and the types it owns.
///
/// `B` is the backend's own error type, carried through unchanged so callers
/// can match on transport-level failures (ioctl errors, closed fds, ...)
/// without this crate having to understand them.
#[derive(Debug, thiserror::Error)]
pub enum Error<B>
where
    B: std::error::Error + Send + Sync + 'static,
{
    /// A layer or plane table could not grow to accommodate a new entry.
    #[error("out of memory")]
    OutOfMemory,

    /// A caller passed a value this crate will never accept, independent of
    /// kernel state (e.g. setting `CRTC_ID` on a layer).
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] PropertyError),

    /// An output was created for a CRTC id the device doesn't know about.
    #[error("no CRTC with id {0:?} is known to this device")]
    UnknownCrtc(CrtcId),

    /// A plane with this id has already been registered on the device.
    #[error("plane {0} is already registered")]
    DuplicatePlane(u32),

    /// A plane was missing a property every plane must expose.
    #[error("plane {plane} is missing required property {property:?}")]
    MissingPlaneProperty { plane: u32, property: Property },

    /// The kernel rejected a configuration for a reason unrelated to plane
    /// allocation (the allocator already tolerates `EINVAL`/`ERANGE`/`ENOSPC`
    /// from test commits internally; this variant is for everything else).
    #[error(transparent)]
    Backend(#[from] B),

    /// The plane/layer search itself failed: an unknown output was named, or
    /// re-staging the winning assignment failed after the search had already
    /// committed to it.
    #[error(transparent)]
    Allocate(#[from] crate::allocator::Error<B>),
}

pub type Result<T, B> = std::result::Result<T, Error<B>>;
