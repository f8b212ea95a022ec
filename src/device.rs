//! The top-level handle to a DRM device: its planes, CRTCs and outputs.

use crate::allocator;
use crate::backend::Backend;
use crate::collections::{Arena, Id};
use crate::error::Error;
use crate::layer::FbInfo;
use crate::output::{Output, OutputId};
use crate::plane::{guess_zpos, InFormats, Plane, PlaneId, PlaneType};
use crate::priority;
use crate::property::{Property, PropertyKind, PropertyMeta};
use crate::request::{AtomicRequest, CommitFlags};
use crate::reuse;

/// A raw DRM CRTC object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CrtcId(pub u32);

/// Owns every plane and output known for one DRM device, plus the counters
/// the allocator and priority tracker need across calls to [`Device::apply`].
pub struct Device<B: Backend> {
    pub(crate) backend: B,
    pub(crate) crtcs: Vec<CrtcId>,
    pub(crate) planes: Arena<Plane>,
    pub(crate) plane_order: Vec<PlaneId>,
    pub(crate) outputs: Arena<Output>,
    pub(crate) test_commit_counter: u64,
    pub(crate) page_flip_counter: u32,
}

impl<B: Backend> Device<B> {
    /// Open a device on top of an existing [`Backend`], capturing its CRTC
    /// table. Planes are not enumerated yet; call [`Device::register_planes`]
    /// or [`Device::create_plane`] next.
    pub fn new(mut backend: B) -> Result<Self, Error<B::Error>> {
        let resources = backend.resource_handles().map_err(Error::Backend)?;
        Ok(Device {
            backend,
            crtcs: resources.crtcs.into_iter().map(CrtcId).collect(),
            planes: Arena::new(),
            plane_order: Vec::new(),
            outputs: Arena::new(),
            test_commit_counter: 0,
            page_flip_counter: 0,
        })
    }

    pub fn crtcs(&self) -> &[CrtcId] {
        &self.crtcs
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Enumerate every plane currently reported by the backend and register
    /// each one, in the order the kernel returns them.
    pub fn register_planes(&mut self) -> Result<(), Error<B::Error>> {
        let ids = self.backend.plane_ids().map_err(Error::Backend)?;
        for id in ids {
            self.create_plane(id)?;
        }
        Ok(())
    }

    /// Register a single plane by its DRM object id.
    pub fn create_plane(&mut self, id: u32) -> Result<PlaneId, Error<B::Error>> {
        if self.plane_order.iter().any(|&p| self.planes.get(p).map(|pl| pl.id()) == Some(id)) {
            return Err(Error::DuplicatePlane(id));
        }

        let info = self.backend.plane_info(id).map_err(Error::Backend)?;

        let mut properties: [Option<PropertyMeta>; Property::COUNT] = Default::default();
        let mut kind: Option<PlaneType> = None;
        let mut zpos: Option<i64> = None;
        let mut in_formats = None;

        for raw in &info.properties {
            let Some(property) = Property::from_drm_name(&raw.name) else {
                continue;
            };
            properties[property.index()] = Some(PropertyMeta {
                id: raw.id,
                kind: raw.kind.clone(),
                immutable: raw.immutable,
            });
            match property {
                Property::Type => kind = Some(plane_type_from_raw(raw.value)),
                Property::Zpos => zpos = Some(raw.value as i64),
                Property::InFormats => in_formats = info.in_formats.clone(),
                _ => {}
            }
        }

        let kind = kind.ok_or(Error::MissingPlaneProperty {
            plane: id,
            property: Property::Type,
        })?;

        let known_primary_id = self.plane_order.iter().find_map(|&p| {
            let plane = self.planes.get(p)?;
            (plane.kind() == PlaneType::Primary).then(|| plane.id())
        });
        let zpos = zpos.unwrap_or_else(|| guess_zpos(id, kind, known_primary_id));

        let plane = Plane::new(id, kind, info.possible_crtcs, zpos, properties, in_formats);
        let handle = self.planes.insert(plane);
        self.insert_plane_order(handle, kind, zpos);
        debug_assert!(self.plane_order_is_sorted(), "plane order invariant violated after insert");
        Ok(handle)
    }

    /// Checks invariant 4 of §3: the primary plane (if registered) leads
    /// `plane_order`, and every plane after it is sorted by descending
    /// `zpos`. The allocator's Z-order reasoning assumes this holds before
    /// it ever starts a search.
    fn plane_order_is_sorted(&self) -> bool {
        let Some((first, rest)) = self.plane_order.split_first() else {
            return true;
        };
        if let Some(plane) = self.planes.get(*first) {
            if plane.kind() != PlaneType::Primary && rest.iter().any(|&p| self.planes.get(p).map(|pl| pl.kind()) == Some(PlaneType::Primary)) {
                return false;
            }
        }
        rest.windows(2).all(|pair| {
            let (Some(a), Some(b)) = (self.planes.get(pair[0]), self.planes.get(pair[1])) else {
                return true;
            };
            a.zpos() >= b.zpos()
        })
    }

    fn insert_plane_order(&mut self, handle: PlaneId, kind: PlaneType, zpos: i64) {
        if kind == PlaneType::Primary {
            self.plane_order.insert(0, handle);
            return;
        }
        let position = self.plane_order.iter().position(|&other| {
            let Some(plane) = self.planes.get(other) else {
                return false;
            };
            plane.kind() != PlaneType::Primary && zpos >= plane.zpos()
        });
        match position {
            Some(index) => self.plane_order.insert(index, handle),
            None => self.plane_order.push(handle),
        }
    }

    pub fn plane(&self, id: PlaneId) -> Option<&Plane> {
        self.planes.get(id)
    }

    /// Planes in allocation order: the primary plane first, then overlay and
    /// cursor planes in descending `zpos`.
    pub fn planes(&self) -> impl Iterator<Item = (PlaneId, &Plane)> {
        self.plane_order.iter().filter_map(move |&id| self.planes.get(id).map(|p| (id, p)))
    }

    pub fn create_output(&mut self, crtc_id: CrtcId) -> Result<OutputId, Error<B::Error>> {
        let index = self
            .crtcs
            .iter()
            .position(|&c| c == crtc_id)
            .ok_or(Error::UnknownCrtc(crtc_id))?;
        Ok(self.outputs.insert(Output::new(crtc_id, index)))
    }

    /// Destroy an output, along with every layer it owns. Any plane still
    /// bound to one of those layers is unbound so it can be reused.
    pub fn destroy_output(&mut self, id: OutputId) -> bool {
        for &plane_id in &self.plane_order {
            if let Some(plane) = self.planes.get_mut(plane_id) {
                if plane.bound_layer.map(|r| r.output) == Some(id) {
                    plane.bound_layer = None;
                }
            }
        }
        self.outputs.remove(id).is_some()
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.get(id)
    }

    pub fn output_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.get_mut(id)
    }

    pub(crate) fn planes_cap(&self) -> usize {
        self.plane_order.len()
    }

    /// Find the best plane assignment for `output`'s current layers, stage
    /// it into `request`, and update plane/layer bindings to match.
    ///
    /// Tries the reuse guard first, matching `device_apply`: only when the
    /// previous allocation can't be trusted as-is does this run the full
    /// search. `request` is expected to start out freshly cleared; on
    /// success every plane belonging to `output` has been staged into it,
    /// either with a layer's properties or disabled.
    pub fn apply(&mut self, output: OutputId, request: &mut AtomicRequest, flags: CommitFlags) -> Result<(), Error<B::Error>> {
        let crtc = self.outputs.get(output).map(|o| o.crtc_id().0);
        let span = tracing::info_span!("apply", ?crtc);
        let _enter = span.enter();

        priority::update(self, output);
        refresh_framebuffers(self, output).map_err(Error::Backend)?;

        if reuse::try_reuse(self, output, request, flags) {
            priority::mark_output_clean(self, output);
            tracing::debug!("reused previous allocation");
            return Ok(());
        }

        allocator::run(self, output, request, flags)?;
        Ok(())
    }
}

/// Refresh every layer's cached framebuffer metadata ahead of an apply,
/// matching `layer_cache_fb_info`: a layer whose `FB_ID` is unchanged from
/// what's already cached is left alone, one set to zero is cleared, and
/// anything else is re-queried from the backend. A framebuffer id the
/// kernel no longer recognizes quietly keeps the last known metadata rather
/// than erroring out.
///
/// Resolving a framebuffer this way always opens fresh GEM handles for it;
/// they're deduplicated and closed right away since nothing here keeps a
/// reference to the underlying buffer, only its metadata.
fn refresh_framebuffers<B: Backend>(device: &mut Device<B>, output_id: OutputId) -> Result<(), B::Error> {
    let Some(output) = device.outputs.get(output_id) else {
        return Ok(());
    };
    let layer_ids = output.layer_order.clone();

    for layer_id in layer_ids {
        let Some(fb_id) = device
            .outputs
            .get(output_id)
            .and_then(|o| o.layer(layer_id))
            .and_then(|l| l.property_raw(Property::FbId))
            .map(|v| v as u32)
        else {
            continue;
        };

        if fb_id == 0 {
            if let Some(layer) = device.outputs.get_mut(output_id).and_then(|o| o.layer_mut(layer_id)) {
                layer.fb_info = FbInfo::default();
            }
            continue;
        }

        let cached = device
            .outputs
            .get(output_id)
            .and_then(|o| o.layer(layer_id))
            .map(|l| l.fb_info.fb_id);
        if cached == Some(fb_id) {
            continue;
        }

        if let Some(query) = device.backend.framebuffer_info(fb_id)? {
            let mut handles = query.gem_handles;
            handles.sort_unstable();
            handles.dedup();
            if !handles.is_empty() {
                device.backend.close_buffer_handles(&handles)?;
            }
            if let Some(layer) = device.outputs.get_mut(output_id).and_then(|o| o.layer_mut(layer_id)) {
                layer.fb_info = query.info;
            }
        }
    }

    Ok(())
}

fn plane_type_from_raw(value: u64) -> PlaneType {
    // DRM_PLANE_TYPE_{OVERLAY,PRIMARY,CURSOR} = {0, 1, 2}.
    match value {
        1 => PlaneType::Primary,
        2 => PlaneType::Cursor,
        _ => PlaneType::Overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::FakeBackend;

    #[test]
    fn unknown_crtc_rejected() {
        let mut device = Device::new(FakeBackend::new(vec![10, 11])).unwrap();
        assert!(matches!(device.create_output(CrtcId(99)), Err(Error::UnknownCrtc(CrtcId(99)))));
        let out = device.create_output(CrtcId(10));
        assert!(out.is_ok());
    }

    #[test]
    fn primary_plane_always_leads_order() {
        let mut backend = FakeBackend::new(vec![10]);
        backend.add_plane(1, crate::backend::test_support::fake_overlay(1, 0b1, 5));
        backend.add_plane(2, crate::backend::test_support::fake_primary(2, 0b1));
        backend.add_plane(3, crate::backend::test_support::fake_overlay(3, 0b1, 1));
        let mut device = Device::new(backend).unwrap();
        device.register_planes().unwrap();

        let order: Vec<u32> = device.planes().map(|(_, p)| p.id()).collect();
        assert_eq!(order[0], 2);
        assert!(order[1..].windows(2).all(|w| {
            let a = device.planes().find(|(_, p)| p.id() == w[0]).unwrap().1.zpos();
            let b = device.planes().find(|(_, p)| p.id() == w[1]).unwrap().1.zpos();
            a >= b
        }));
    }

    #[test]
    fn duplicate_plane_rejected() {
        let mut backend = FakeBackend::new(vec![10]);
        backend.add_plane(1, crate::backend::test_support::fake_primary(1, 0b1));
        let mut device = Device::new(backend).unwrap();
        device.create_plane(1).unwrap();
        assert!(matches!(device.create_plane(1), Err(Error::DuplicatePlane(1))));
    }

    #[test]
    fn apply_rejects_unknown_output() {
        use crate::output::OutputId;
        use crate::request::{AtomicRequest, CommitFlags};

        let mut device = Device::new(FakeBackend::new(vec![10])).unwrap();
        let real = device.create_output(CrtcId(10)).unwrap();
        device.destroy_output(real);
        let mut request = AtomicRequest::new();
        let err = device.apply(real, &mut request, CommitFlags::empty());
        assert!(matches!(err, Err(Error::Allocate(crate::allocator::Error::UnknownOutput))));
        let _ = OutputId::default;
    }

    #[test]
    fn apply_binds_a_visible_layer_and_then_reuses_it() {
        use crate::property::Property;
        use crate::request::{AtomicRequest, CommitFlags};

        let mut backend = FakeBackend::new(vec![10]);
        backend.add_plane(1, crate::backend::test_support::fake_primary(1, 0b1));
        let mut device = Device::new(backend).unwrap();
        device.register_planes().unwrap();
        let output_id = device.create_output(CrtcId(10)).unwrap();
        let layer_id = device.output_mut(output_id).unwrap().create_layer();
        {
            let layer = device.output_mut(output_id).unwrap().layer_mut(layer_id).unwrap();
            layer.set_property(Property::FbId, 1).unwrap();
            layer.set_property(Property::CrtcX, 0).unwrap();
            layer.set_property(Property::CrtcY, 0).unwrap();
            layer.set_property(Property::CrtcW, 100).unwrap();
            layer.set_property(Property::CrtcH, 100).unwrap();
        }

        let mut request = AtomicRequest::new();
        device.apply(output_id, &mut request, CommitFlags::empty()).unwrap();
        let bound_plane = device.output(output_id).unwrap().layer(layer_id).unwrap().bound_plane();
        assert!(bound_plane.is_some());
        let commits_after_first = device.backend().commits.len();

        let mut request = AtomicRequest::new();
        device.apply(output_id, &mut request, CommitFlags::empty()).unwrap();
        assert_eq!(
            device.output(output_id).unwrap().layer(layer_id).unwrap().bound_plane(),
            bound_plane
        );
        assert_eq!(device.backend().commits.len(), commits_after_first + 1);
    }

    #[test]
    fn refreshing_a_framebuffer_closes_its_deduplicated_gem_handles() {
        use crate::property::Property;
        use crate::request::{AtomicRequest, CommitFlags};

        let mut backend = FakeBackend::new(vec![10]);
        backend.add_plane(1, crate::backend::test_support::fake_primary(1, 0b1));
        backend.add_framebuffer_with_handles(
            1,
            FbInfo { fb_id: 1, width: 100, height: 100, pixel_format: 0, modifier: 0, has_modifier: false },
            vec![7, 7, 8],
        );
        let mut device = Device::new(backend).unwrap();
        device.register_planes().unwrap();
        let output_id = device.create_output(CrtcId(10)).unwrap();
        let layer_id = device.output_mut(output_id).unwrap().create_layer();
        {
            let layer = device.output_mut(output_id).unwrap().layer_mut(layer_id).unwrap();
            layer.set_property(Property::FbId, 1).unwrap();
            layer.set_property(Property::CrtcX, 0).unwrap();
            layer.set_property(Property::CrtcY, 0).unwrap();
            layer.set_property(Property::CrtcW, 100).unwrap();
            layer.set_property(Property::CrtcH, 100).unwrap();
        }

        let mut request = AtomicRequest::new();
        device.apply(output_id, &mut request, CommitFlags::empty()).unwrap();

        assert_eq!(device.backend().closed_handles, vec![vec![7, 8]]);

        // FB_ID unchanged on the next apply: no re-query, no further close.
        let mut request = AtomicRequest::new();
        device.apply(output_id, &mut request, CommitFlags::empty()).unwrap();
        assert_eq!(device.backend().closed_handles.len(), 1);
    }
}
