//! The kernel ioctl boundary, abstracted so the allocator can be tested
//! without real hardware.

use crate::layer::FbInfo;
use crate::plane::InFormats;
use crate::property::PropertyKind;
use crate::request::{AtomicRequest, CommitFlags};

/// CRTC ids reported by `drmModeGetResources`.
#[derive(Debug, Clone, Default)]
pub struct ResourceHandles {
    pub crtcs: Vec<u32>,
}

/// A single property as reported by `drmModeObjectGetProperties` +
/// `drmModeGetProperty`, already classified into a [`PropertyKind`].
#[derive(Debug, Clone)]
pub struct RawPropertyInfo {
    pub name: String,
    pub id: u32,
    pub kind: PropertyKind,
    pub immutable: bool,
    /// The property's current value, used only at plane registration time to
    /// read `type` and `zpos`.
    pub value: u64,
}

/// Everything [`Device::create_plane`](crate::device::Device::create_plane)
/// needs about a plane, gathered from `drmModeGetPlane` and its object
/// properties in one call.
#[derive(Debug, Clone)]
pub struct PlaneInfo {
    pub id: u32,
    pub possible_crtcs: u32,
    pub properties: Vec<RawPropertyInfo>,
    pub in_formats: Option<InFormats>,
}

/// The result of [`Backend::framebuffer_info`]: the metadata worth caching
/// plus the GEM handles the query opened, which the caller owns and must
/// close (deduplicated) via [`Backend::close_buffer_handles`].
#[derive(Debug, Clone, Default)]
pub struct FramebufferQuery {
    pub info: FbInfo,
    pub gem_handles: Vec<u32>,
}

/// The outcome of a test (or real) atomic commit, distinguishing the three
/// rejection codes the allocator treats as "this plane assignment doesn't
/// work" from every other failure, which it treats as fatal.
#[derive(Debug, thiserror::Error)]
pub enum CommitError<E> {
    /// `EINVAL`: the configuration is invalid for this hardware.
    #[error("commit rejected as invalid")]
    Invalid,
    /// `ERANGE`: a value was out of the range the driver accepts right now.
    #[error("commit rejected: value out of range")]
    Range,
    /// `ENOSPC`: the hardware doesn't have enough of some resource (usually
    /// memory bandwidth) to support this configuration.
    #[error("commit rejected: insufficient resources")]
    NoSpace,
    /// Anything else, including I/O errors and being out of file descriptors.
    #[error(transparent)]
    Backend(E),
}

/// The DRM/KMS operations the allocator needs from a real device.
///
/// Implementations wrap a DRM file descriptor (e.g. via the `drm` crate);
/// this crate never opens one itself.
pub trait Backend {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Enumerate CRTCs, once, when a [`Device`](crate::device::Device) is
    /// created.
    fn resource_handles(&mut self) -> Result<ResourceHandles, Self::Error>;

    /// Enumerate every plane's object id currently exposed by the device.
    fn plane_ids(&mut self) -> Result<Vec<u32>, Self::Error>;

    /// Fetch a plane's static metadata: its possible CRTCs, its properties
    /// (with current values, ranges/enums/bitmasks already resolved) and its
    /// `IN_FORMATS` blob if it has one.
    fn plane_info(&mut self, plane_id: u32) -> Result<PlaneInfo, Self::Error>;

    /// Resolve a framebuffer id to its format metadata, used to decide
    /// whether an `FB_ID` change can reuse the previous plane allocation and
    /// whether a plane's `IN_FORMATS` blob accepts it.
    ///
    /// `drmModeGetFB2` always opens a fresh GEM handle per plane of the
    /// framebuffer, whether or not the caller already holds one; the handles
    /// are returned alongside the metadata so the caller can close them
    /// immediately via [`Backend::close_buffer_handles`] rather than leak
    /// them.
    ///
    /// Returns `Ok(None)` if the kernel no longer recognizes the id (the
    /// original treats this as "nothing to cache", not an error).
    fn framebuffer_info(&mut self, fb_id: u32) -> Result<Option<FramebufferQuery>, Self::Error>;

    /// Release GEM handles opened by a prior [`Backend::framebuffer_info`]
    /// call. The caller de-duplicates handle values before calling this.
    fn close_buffer_handles(&mut self, handles: &[u32]) -> Result<(), Self::Error>;

    /// Attempt a commit with `DRM_MODE_ATOMIC_TEST_ONLY` set, without
    /// applying anything. Implementations should transparently retry on
    /// `EINTR`/`EAGAIN`, matching `device_test_commit`.
    fn test_commit(&mut self, request: &AtomicRequest, flags: CommitFlags) -> Result<(), CommitError<Self::Error>>;
}
