// Engine notification bus
//
// One typed broadcast channel per engine instance; subscribers receive
// state updates for polled targets/devices, catalog refresh markers,
// and non-fatal backend failures.

use std::sync::Arc;

use crate::model::{Device, DeviceState, Target, TargetState};

/// Events published by the polling engine.
///
/// Per-target events are delivered in the order polls complete for that
/// target; there is no total ordering across targets.
#[derive(Debug, Clone)]
pub enum Event {
    /// A poll updated (or synthesized) the cached state of a target.
    TargetState {
        target: Arc<Target>,
        state: TargetState,
    },
    /// The slow loop updated a device's state (active preset, liveness).
    DeviceState {
        device: Arc<Device>,
        state: DeviceState,
    },
    /// A catalog refresh completed and was published atomically.
    CatalogUpdated,
    /// A non-fatal backend failure worth showing to the operator.
    Log(String),
}
