// stagelink-core: device/backend abstraction and polling engine.
//
// Aggregates the protocol clients from `stagelink-proto` behind one
// generic device/target/state vocabulary, discovers reachable hardware,
// and polls exactly the targets the control surface currently watches.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod hosts;
pub mod limiter;
pub mod model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backend::Backend;
pub use config::{AmpSettings, DlmSettings, EngineConfig};
pub use engine::{Engine, RefreshPhase};
pub use error::CoreError;
pub use event::Event;
pub use model::{
    ActionKind, BackendKind, Binding, Capability, Device, DeviceState, LevelMode, Target, TargetId,
    TargetKind, TargetState,
};
