// ── Domain model ──
//
// The generic device/target/state vocabulary shared by both protocol
// families. Target identity is a tagged tuple, not inheritance: the
// backend kind disambiguates what the key means (module letter, group
// name, output index, preset slot).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which protocol family a device belongs to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Loudspeaker-management unit over the DLM UDP protocol.
    Dlm,
    /// Amplifier/processor unit over JSON HTTP.
    AmpHttp,
}

/// What a target is within its device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Module,
    Group,
    Output,
    Preset,
}

/// What a bound control does with its target. Drives the polling
/// cadence: preset bindings additionally enroll their device in the
/// slower active-preset poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Mute,
    Level,
    Preset,
}

/// Which operations a target supports, auto-detected per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Mute,
    Level,
    Volume,
}

/// How to interpret a level write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelMode {
    /// Decibel gain.
    Gain,
    /// Integer volume steps.
    Volume,
}

/// A discovered device. Replaced wholesale on every catalog refresh;
/// identity is the backend plus an address-derived id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub display_name: String,
    pub backend: BackendKind,
    pub address: String,
    pub model: Option<String>,
    pub online: bool,
}

/// Canonical target identity: `(backend, device, kind, key)`.
///
/// Rendered as `<backend>:<device_id>:<kind>:<key>` -- the only
/// externally visible identifier, stable across catalog refreshes.
/// Device ids may themselves contain `:` (host:port addresses), so
/// parsing takes the backend from the left and kind/key from the right.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetId {
    pub backend: BackendKind,
    pub device_id: String,
    pub kind: TargetKind,
    pub key: String,
}

impl TargetId {
    pub fn new(
        backend: BackendKind,
        device_id: impl Into<String>,
        kind: TargetKind,
        key: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            device_id: device_id.into(),
            kind,
            key: key.into(),
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.backend, self.device_id, self.kind, self.key
        )
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid target id: {0}")]
pub struct InvalidTargetId(pub String);

impl FromStr for TargetId {
    type Err = InvalidTargetId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || InvalidTargetId(s.to_owned());
        let (backend, rest) = s.split_once(':').ok_or_else(err)?;
        let (rest, key) = rest.rsplit_once(':').ok_or_else(err)?;
        let (device_id, kind) = rest.rsplit_once(':').ok_or_else(err)?;
        if device_id.is_empty() || key.is_empty() {
            return Err(err());
        }
        Ok(Self {
            backend: backend.parse().map_err(|_| err())?,
            device_id: device_id.to_owned(),
            kind: kind.parse().map_err(|_| err())?,
            key: key.to_owned(),
        })
    }
}

/// A controllable endpoint within a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    pub supports: Vec<Capability>,
}

impl Target {
    pub fn supports(&self, capability: Capability) -> bool {
        self.supports.contains(&capability)
    }
}

/// Last polled state of one target. Write-through cache entry, replaced
/// (not merged) on each successful poll.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetState {
    pub online: bool,
    pub mute: Option<bool>,
    pub level_db: Option<f64>,
    pub volume: Option<f64>,
    pub last_updated_ms: i64,
}

impl TargetState {
    /// Synthetic entry recorded when a poll fails.
    pub fn offline(last_updated_ms: i64) -> Self {
        Self {
            online: false,
            mute: None,
            level_db: None,
            volume: None,
            last_updated_ms,
        }
    }
}

/// Device-level state, polled at a slower cadence than target state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub online: bool,
    pub active_preset_index: Option<u32>,
    pub last_updated_ms: i64,
}

/// A control's declared interest in a target -- the only input that
/// drives which targets are actively polled. Carries no cached state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub context: String,
    pub target_id: TargetId,
    pub action: ActionKind,
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
