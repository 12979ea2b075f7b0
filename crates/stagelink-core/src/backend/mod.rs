// ── Backend abstraction ──
//
// One capability surface over two protocol families. Dispatch is a
// tagged union with a fixed method set -- no trait objects, because the
// set of families is closed and target identity itself is tagged by
// backend kind.

pub mod amp;
pub mod dlm;

pub use amp::AmpBackend;
pub use dlm::DlmBackend;

use crate::error::CoreError;
use crate::model::{BackendKind, Device, LevelMode, Target, TargetState};

pub enum Backend {
    Dlm(DlmBackend),
    Amp(AmpBackend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Dlm(_) => BackendKind::Dlm,
            Self::Amp(_) => BackendKind::AmpHttp,
        }
    }

    /// Find the reachable devices of this family.
    pub async fn discover(&self) -> Result<Vec<Device>, CoreError> {
        match self {
            Self::Dlm(b) => b.discover(),
            Self::Amp(b) => b.discover().await,
        }
    }

    /// Enumerate the controllable targets of one device.
    pub async fn targets(&self, device: &Device) -> Result<Vec<Target>, CoreError> {
        match self {
            Self::Dlm(b) => Ok(b.targets(device)),
            Self::Amp(b) => b.targets(device).await,
        }
    }

    /// Fetch the current state of one target.
    pub async fn state(&self, target: &Target) -> Result<TargetState, CoreError> {
        match self {
            Self::Dlm(b) => b.state(target).await,
            Self::Amp(b) => b.state(target).await,
        }
    }

    pub async fn set_mute(&self, target: &Target, mute: bool) -> Result<(), CoreError> {
        match self {
            Self::Dlm(b) => b.set_mute(target, mute).await,
            Self::Amp(b) => b.set_mute(target, mute).await,
        }
    }

    pub async fn set_level(
        &self,
        target: &Target,
        value: f64,
        mode: LevelMode,
    ) -> Result<(), CoreError> {
        match self {
            Self::Dlm(b) => b.set_level(target, value).await,
            Self::Amp(b) => b.set_level(target, value, mode).await,
        }
    }

    pub async fn recall_preset(&self, device: &Device, index: u32) -> Result<(), CoreError> {
        match self {
            Self::Dlm(b) => b.recall_preset(index).await,
            Self::Amp(b) => b.recall_preset(device, index).await,
        }
    }

    /// Currently active preset slot, for families that can report it.
    pub async fn active_preset_index(&self, device: &Device) -> Result<Option<u32>, CoreError> {
        match self {
            // DLM units do not echo preset changes back.
            Self::Dlm(_) => Ok(None),
            Self::Amp(b) => b.active_preset_index(device).await,
        }
    }
}
