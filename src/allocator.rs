//! The recursive plane/layer search: the core of this crate.
//!
//! [`apply`] walks the device's plane order position by position, trying each
//! unassigned visible layer on the current plane (plus always trying "leave
//! this plane empty"), pruning branches a test commit or the Z-order
//! evaluator has already ruled out, and keeping the highest-scoring valid
//! terminal assignment it finds.

use crate::applier::{self, ApplyError};
use crate::backend::{Backend, CommitError};
use crate::device::{CrtcId, Device};
use crate::layer::LayerId;
use crate::output::OutputId;
use crate::plane::{PlaneId, PlaneType};
use crate::priority;
use crate::request::{AtomicRequest, CommitFlags};
use crate::reuse;
use crate::zorder::{self, ZState};

/// Errors that can abort an [`apply`] call outright.
///
/// Everything the allocator can recover from internally (a test commit
/// rejecting one candidate, a property failing validation on one plane) is
/// handled by pruning that branch of the search and never reaches here.
#[derive(Debug, thiserror::Error)]
pub enum Error<B>
where
    B: std::error::Error + Send + Sync + 'static,
{
    /// The output named by the caller doesn't exist on this device.
    #[error("unknown output")]
    UnknownOutput,
    /// Staging the chosen allocation back into the request failed after the
    /// search already committed to it; bindings are left installed per §7.
    #[error("failed to re-stage the chosen allocation: {0}")]
    Reapply(#[from] ApplyError),
    /// A hard kernel/driver failure, not one of the three tolerated test
    /// commit rejections.
    #[error(transparent)]
    Backend(B),
}

/// Partial (or, at the leaf, complete) assignment of layers to plane
/// positions, indexed the same way as [`Device::planes`](crate::device::Device::planes).
type Assignment = Vec<Option<LayerId>>;

struct Search<'a, B: Backend> {
    device: &'a mut Device<B>,
    output_id: OutputId,
    crtc_id: CrtcId,
    plane_order: Vec<PlaneId>,
    layer_order: Vec<LayerId>,
    composition_layer: Option<LayerId>,
    visible_count: u32,
    request: &'a mut AtomicRequest,
    flags: CommitFlags,
    best: Option<Assignment>,
    best_score: u32,
    /// Set by a hard backend failure during a test commit; once set, every
    /// further recursive call returns immediately without exploring more
    /// branches, unwinding the search.
    hard_error: Option<B::Error>,
    /// Always `true` outside tests. The "monotone pruning" law (§8) claims
    /// the upper-bound cut in [`Search::step`] never changes the best score
    /// it finds, only how much of the tree it has to visit to find it; the
    /// `disabling_upper_bound_prune_finds_the_same_best_score` test below
    /// turns this off to check that directly.
    prune_enabled: bool,
}

/// Run the allocator for `output`, populating `request` with the best
/// mapping found and updating plane/layer bindings to match.
///
/// Callers normally reach this through [`crate::device::Device::apply`],
/// which first tries [`reuse::try_reuse`] and only falls back to a full
/// search here when reuse is refused.
pub(crate) fn run<B: Backend>(
    device: &mut Device<B>,
    output_id: OutputId,
    request: &mut AtomicRequest,
    flags: CommitFlags,
) -> Result<(), Error<B::Error>> {
    run_inner(device, output_id, request, flags, true)
}

/// Same as [`run`], but with the upper-bound pruning in [`Search::step`]
/// optionally disabled. Only reachable from tests, to check the "monotone
/// pruning" law: the prune is a pure performance optimization and must
/// never change which score the search settles on.
#[cfg(test)]
pub(crate) fn run_for_test<B: Backend>(
    device: &mut Device<B>,
    output_id: OutputId,
    request: &mut AtomicRequest,
    flags: CommitFlags,
    prune_enabled: bool,
) -> Result<(), Error<B::Error>> {
    run_inner(device, output_id, request, flags, prune_enabled)
}

fn run_inner<B: Backend>(
    device: &mut Device<B>,
    output_id: OutputId,
    request: &mut AtomicRequest,
    flags: CommitFlags,
    prune_enabled: bool,
) -> Result<(), Error<B::Error>> {
    let output = device.outputs.get(output_id).ok_or(Error::UnknownOutput)?;
    let crtc_id = output.crtc_id();
    let plane_order = device.plane_order.clone();
    let layer_order = output.layer_order.clone();
    let composition_layer = output.composition_layer();
    let visible_count = output.non_composited_visible_count();

    for &layer_id in &layer_order {
        if let Some(layer) = device.outputs.get_mut(output_id).and_then(|o| o.layer_mut(layer_id)) {
            layer.candidate_planes.clear();
        }
    }

    let span = tracing::info_span!("allocate", crtc = crtc_id.0, planes = plane_order.len(), layers = layer_order.len());
    let _enter = span.enter();

    let mut search = Search {
        device,
        output_id,
        crtc_id,
        plane_order,
        layer_order,
        composition_layer,
        visible_count,
        request,
        flags,
        best: None,
        best_score: 0,
        hard_error: None,
        prune_enabled,
    };

    let assignment = vec![None; search.plane_order.len()];
    search.step(0, assignment, ZState::INITIAL, 0);

    if let Some(err) = search.hard_error.take() {
        return Err(Error::Backend(err));
    }

    let Some(best) = search.best.take() else {
        // No valid terminal state at all (shouldn't happen: the all-empty
        // assignment is valid whenever there's no composition layer to place).
        tracing::warn!("allocator found no valid assignment");
        return install(search.device, output_id, crtc_id, &[], search.request).map_err(Error::Reapply);
    };

    install(search.device, output_id, crtc_id, &best, search.request)?;
    Ok(())
}

impl<'a, B: Backend> Search<'a, B> {
    fn score(assignment: &[Option<LayerId>], composition_layer: Option<LayerId>) -> u32 {
        assignment
            .iter()
            .filter(|entry| matches!(entry, Some(id) if Some(*id) != composition_layer))
            .count() as u32
    }

    fn is_valid(&self, assignment: &[Option<LayerId>]) -> bool {
        let score = Self::score(assignment, self.composition_layer);
        let places_composition = self
            .composition_layer
            .map(|id| assignment.contains(&Some(id)))
            .unwrap_or(false);

        match self.composition_layer {
            Some(_) if !places_composition && score != self.visible_count => false,
            Some(_) if places_composition && score == self.visible_count => false,
            _ => true,
        }
    }

    /// Recurse at plane position `pos` with partial assignment `assignment`
    /// and Z-order state `z`; `depth` is only used for tracing.
    fn step(&mut self, pos: usize, assignment: Assignment, z: ZState, depth: usize) {
        if self.hard_error.is_some() {
            return;
        }
        if pos == self.plane_order.len() {
            let score = Self::score(&assignment, self.composition_layer);
            if (self.best.is_none() || score > self.best_score) && self.is_valid(&assignment) {
                tracing::trace!(score, "new best assignment");
                self.best_score = score;
                self.best = Some(assignment);
            }
            return;
        }

        let remaining = (self.plane_order.len() - pos) as u32;
        let current_score = Self::score(&assignment, self.composition_layer);
        if self.prune_enabled && self.best.is_some() && self.best_score >= current_score + remaining {
            return;
        }

        let plane_id = self.plane_order[pos];
        let Some(plane) = self.device.planes.get(plane_id) else {
            return;
        };
        let plane_numeric_id = plane.id();
        let plane_already_bound = plane.is_bound();
        let plane_fits_crtc = {
            let Some(output) = self.device.outputs.get(self.output_id) else { return };
            plane.can_attach_to(output.crtc_index)
        };

        // Skip-plane branch: always explored first, matching the original's
        // depth-first preference for leaving hardware unused over a
        // speculative test commit.
        {
            let mut next = assignment.clone();
            next[pos] = None;
            self.step(pos + 1, next, z, depth + 1);
        }

        if plane_already_bound || !plane_fits_crtc {
            return;
        }

        for &layer_id in &self.layer_order.clone() {
            if assignment.contains(&Some(layer_id)) {
                continue;
            }
            let Some(output) = self.device.outputs.get(self.output_id) else { return };
            let Some(layer) = output.layer(layer_id) else { continue };
            if !layer.is_visible() {
                continue;
            }

            let compatible = {
                let plane = self.device.planes.get(plane_id).unwrap();
                zorder::compatible(
                    output,
                    &self.device.planes,
                    &self.plane_order,
                    pos,
                    plane,
                    layer_id,
                    layer,
                    &z,
                    &assignment,
                )
            };
            if !compatible {
                continue;
            }

            let cursor = self.request.cursor();
            let stage_result = {
                let plane = self.device.planes.get(plane_id).unwrap();
                let output = self.device.outputs.get(self.output_id).unwrap();
                let layer = output.layer(layer_id).unwrap();
                applier::apply_to_request(plane, Some(layer), self.crtc_id, self.request)
            };

            match stage_result {
                Ok(()) => {}
                Err(err) => {
                    tracing::trace!(plane = plane_numeric_id, ?err, "staging rejected");
                    self.request.rewind(cursor);
                    continue;
                }
            }

            if let Some(output) = self.device.outputs.get_mut(self.output_id) {
                if let Some(layer) = output.layer_mut(layer_id) {
                    if !layer.candidate_planes.contains(&plane_id) {
                        layer.candidate_planes.push(plane_id);
                    }
                }
            }

            let rejected_without_commit = {
                let plane = self.device.planes.get(plane_id).unwrap();
                let output = self.device.outputs.get(self.output_id).unwrap();
                let layer = output.layer(layer_id).unwrap();
                layer.is_force_composited() || !applier::check_layer_fb(plane, layer)
            };
            if rejected_without_commit {
                self.request.rewind(cursor);
                continue;
            }

            let commit_result = self.device.backend.test_commit(self.request, self.flags.for_test_commit());
            self.device.test_commit_counter += 1;

            match commit_result {
                Ok(()) => {
                    let next_z = {
                        let plane = self.device.planes.get(plane_id).unwrap();
                        let output = self.device.outputs.get(self.output_id).unwrap();
                        let layer = output.layer(layer_id).unwrap();
                        z.advance(plane, layer.zpos())
                    };
                    let mut next = assignment.clone();
                    next[pos] = Some(layer_id);
                    self.step(pos + 1, next, next_z, depth + 1);
                }
                Err(CommitError::Invalid) | Err(CommitError::Range) | Err(CommitError::NoSpace) => {}
                Err(CommitError::Backend(err)) => {
                    tracing::error!(?err, "hard failure during test commit");
                    self.hard_error = Some(err);
                    self.request.rewind(cursor);
                    return;
                }
            }

            self.request.rewind(cursor);
        }
    }
}

/// Clear every plane/layer binding for `output`, rebind per `best`, and
/// re-stage every plane (bound or empty) into `request`; mark all layers
/// clean on success.
fn install<B: Backend>(
    device: &mut Device<B>,
    output_id: OutputId,
    crtc_id: CrtcId,
    best: &[Option<LayerId>],
    request: &mut AtomicRequest,
) -> Result<(), ApplyError> {
    let plane_order = device.plane_order.clone();

    for &plane_id in &plane_order {
        if let Some(plane) = device.planes.get_mut(plane_id) {
            if plane.bound_layer.map(|r| r.output) == Some(output_id) {
                plane.bound_layer = None;
            }
        }
    }
    if let Some(output) = device.outputs.get_mut(output_id) {
        let layer_order = output.layer_order.clone();
        for layer_id in layer_order {
            if let Some(layer) = output.layer_mut(layer_id) {
                layer.bound_plane = None;
            }
        }
    }

    for (pos, &plane_id) in plane_order.iter().enumerate() {
        let Some(Some(layer_id)) = best.get(pos).copied() else {
            continue;
        };
        if let Some(plane) = device.planes.get_mut(plane_id) {
            plane.bound_layer = Some(crate::layer::LayerRef { output: output_id, layer: layer_id });
        }
        if let Some(output) = device.outputs.get_mut(output_id) {
            if let Some(layer) = output.layer_mut(layer_id) {
                layer.bound_plane = Some(plane_id);
            }
        }
    }

    for &plane_id in &plane_order {
        let plane = device.planes.get(plane_id).unwrap();
        let bound_layer_id = plane
            .bound_layer
            .filter(|r| r.output == output_id)
            .map(|r| r.layer);
        let layer_ref = bound_layer_id.and_then(|id| device.outputs.get(output_id).and_then(|o| o.layer(id)));
        applier::apply_to_request(plane, layer_ref, crtc_id, request)?;
    }

    priority::mark_output_clean(device, output_id);
    tracing::debug!(
        assigned = best.iter().filter(|e| e.is_some()).count(),
        "allocation installed"
    );
    Ok(())
}

/// Re-stage the current bindings (no search) for the [`reuse`] fast path.
pub(crate) fn apply_current<B: Backend>(device: &mut Device<B>, request: &mut AtomicRequest) -> Result<(), ApplyError> {
    let plane_order = device.plane_order.clone();
    for &plane_id in &plane_order {
        let plane = device.planes.get(plane_id).unwrap();
        let layer_ref = plane
            .bound_layer
            .and_then(|r| device.outputs.get(r.output).and_then(|o| o.layer(r.layer)));
        applier::apply_to_request(plane, layer_ref, plane_crtc(device, plane_id), request)?;
    }
    Ok(())
}

fn plane_crtc<B: Backend>(device: &Device<B>, plane_id: PlaneId) -> CrtcId {
    device
        .planes
        .get(plane_id)
        .and_then(|p| p.bound_layer)
        .and_then(|r| device.outputs.get(r.output))
        .map(|o| o.crtc_id())
        .unwrap_or(CrtcId(0))
}
