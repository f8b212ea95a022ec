//! Per-layer priority bookkeeping and clean/dirty tracking across commits.
//!
//! "Priority" here is purely a diagnostic signal: it counts how often a
//! layer's framebuffer actually changes, sampled once per
//! [`PRIORITY_PERIOD`] page flips, so callers (and `tracing` subscribers)
//! can tell a layer that updates every frame from one that's effectively
//! static without having to watch every single commit.

use crate::backend::Backend;
use crate::device::Device;
use crate::output::OutputId;

pub(crate) const PRIORITY_PERIOD: u32 = 60;

/// Advance the device's page-flip counter, returning whether this call
/// crossed a [`PRIORITY_PERIOD`] boundary and every layer's pending priority
/// should be folded into its current one.
pub(crate) fn tick(counter: &mut u32) -> bool {
    *counter += 1;
    if *counter >= PRIORITY_PERIOD {
        *counter = 0;
        true
    } else {
        false
    }
}

/// Runs once per [`Device::apply`](crate::device::Device::apply) call,
/// before any reuse/allocation decision is made.
pub(crate) fn update<B: Backend>(device: &mut Device<B>, output: OutputId) {
    let elapsed = tick(&mut device.page_flip_counter);
    let Some(output) = device.outputs.get_mut(output) else { return };
    for &layer_id in &output.layer_order {
        if let Some(layer) = output.layers.get_mut(layer_id) {
            update_layer(layer, elapsed);
        }
    }
}

fn update_layer(layer: &mut crate::layer::Layer, elapsed: bool) {
    if let Some(slot) = layer.properties[crate::property::Property::FbId.index()] {
        if slot.prev != slot.value {
            layer.pending_priority += 1;
        }
    }
    if elapsed {
        if layer.current_priority != layer.pending_priority {
            tracing::debug!(
                from = layer.current_priority,
                to = layer.pending_priority,
                "layer priority changed"
            );
        }
        layer.current_priority = layer.pending_priority;
        layer.pending_priority = 0;
    }
}

/// Clear every layer's dirty bit and snapshot its properties as the new
/// "previous clean" baseline, after a successful apply.
pub(crate) fn mark_output_clean<B: Backend>(device: &mut Device<B>, output: OutputId) {
    let Some(output) = device.outputs.get_mut(output) else { return };
    output.layers_changed = false;
    for &layer_id in &output.layer_order {
        if let Some(layer) = output.layers.get_mut(layer_id) {
            layer.mark_clean();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_wraps_at_priority_period() {
        let mut counter = 0;
        for _ in 0..PRIORITY_PERIOD - 1 {
            assert!(!tick(&mut counter));
        }
        assert!(tick(&mut counter));
        assert_eq!(counter, 0);
    }

    #[test]
    fn pending_priority_increments_on_fb_id_change() {
        let mut layer = crate::layer::Layer::default();
        layer.set_property(crate::property::Property::FbId, 1).unwrap();
        // freshly set, prev == value: no pending increment yet.
        update_layer(&mut layer, false);
        assert_eq!(layer.pending_priority, 0);

        layer.set_property(crate::property::Property::FbId, 2).unwrap();
        update_layer(&mut layer, false);
        assert_eq!(layer.pending_priority, 1);
    }

    #[test]
    fn current_priority_only_updates_when_elapsed() {
        let mut layer = crate::layer::Layer::default();
        layer.set_property(crate::property::Property::FbId, 1).unwrap();
        layer.set_property(crate::property::Property::FbId, 2).unwrap();
        update_layer(&mut layer, false);
        assert_eq!(layer.current_priority, 0);
        update_layer(&mut layer, true);
        assert_eq!(layer.current_priority, 1);
        assert_eq!(layer.pending_priority, 0);
    }
}
