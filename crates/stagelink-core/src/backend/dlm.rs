// DLM backend: loudspeaker-management units over UDP
//
// One configured unit per backend instance. The target set is fixed by
// the hardware: four processing modules, two defined groups, ten preset
// slots. Group operations fan out to the member modules in parallel and
// aggregate (mute = AND of members, level = arithmetic mean).

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use stagelink_proto::dlm::{DlmClient, commands};

use crate::config::DlmSettings;
use crate::error::CoreError;
use crate::model::{
    BackendKind, Capability, Device, Target, TargetId, TargetKind, TargetState, now_ms,
};

/// Processing module letters, in dial order.
pub const MODULES: [&str; 4] = ["A", "B", "C", "D"];

/// Preset slots addressable on the unit.
pub const PRESET_SLOTS: u32 = 10;

struct GroupDef {
    name: &'static str,
    members: &'static [&'static str],
}

const GROUPS: [GroupDef; 2] = [
    GroupDef {
        name: "LR",
        members: &["A", "B"],
    },
    GroupDef {
        name: "ALL",
        members: &["A", "B", "C", "D"],
    },
];

fn group_members(name: &str) -> Option<&'static [&'static str]> {
    GROUPS.iter().find(|g| g.name == name).map(|g| g.members)
}

pub struct DlmBackend {
    client: Arc<DlmClient>,
    settings: DlmSettings,
    device_id: String,
}

impl DlmBackend {
    pub async fn new(settings: DlmSettings) -> Result<Self, CoreError> {
        let target: SocketAddr = format!("{}:{}", settings.host, settings.port)
            .parse()
            .map_err(|e| CoreError::Config {
                message: format!("invalid DLM address {}:{}: {e}", settings.host, settings.port),
            })?;
        let client = Arc::new(DlmClient::bind(settings.listen_port, target).await?);
        let device_id = format!("dlm_{}", settings.host);
        Ok(Self {
            client,
            settings,
            device_id,
        })
    }

    /// The one configured unit. Online mirrors the client's inferred
    /// liveness flag, not a transport property.
    pub fn discover(&self) -> Result<Vec<Device>, CoreError> {
        Ok(vec![Device {
            id: self.device_id.clone(),
            display_name: format!("DLM unit ({})", self.settings.host),
            backend: BackendKind::Dlm,
            address: self.settings.host.clone(),
            model: None,
            online: self.client.is_online(),
        }])
    }

    /// Fixed target set: modules, groups, presets.
    pub fn targets(&self, device: &Device) -> Vec<Target> {
        let mut targets: Vec<Target> = MODULES
            .iter()
            .map(|module| Target {
                id: TargetId::new(BackendKind::Dlm, &device.id, TargetKind::Module, *module),
                name: format!("Module {module}"),
                supports: vec![Capability::Mute, Capability::Level],
            })
            .collect();

        for group in &GROUPS {
            targets.push(Target {
                id: TargetId::new(BackendKind::Dlm, &device.id, TargetKind::Group, group.name),
                name: format!("Group {}", group.name),
                supports: vec![Capability::Mute, Capability::Level],
            });
        }

        for slot in 1..=PRESET_SLOTS {
            targets.push(Target {
                id: TargetId::new(
                    BackendKind::Dlm,
                    &device.id,
                    TargetKind::Preset,
                    slot.to_string(),
                ),
                name: format!("Preset {slot}"),
                supports: Vec::new(),
            });
        }

        targets
    }

    pub async fn state(&self, target: &Target) -> Result<TargetState, CoreError> {
        match target.id.kind {
            TargetKind::Module => Ok(self.module_state(&target.id.key).await),
            TargetKind::Group => Ok(self.group_state(&target.id.key).await),
            // Presets carry no readable state; liveness comes from the client.
            _ => Ok(TargetState {
                online: self.client.is_online(),
                mute: None,
                level_db: None,
                volume: None,
                last_updated_ms: now_ms(),
            }),
        }
    }

    pub async fn set_mute(&self, target: &Target, mute: bool) -> Result<(), CoreError> {
        match target.id.kind {
            TargetKind::Module => self.command(&commands::set_mute(&target.id.key, mute)).await,
            TargetKind::Group => {
                let Some(members) = group_members(&target.id.key) else {
                    return Ok(());
                };
                let writes = members
                    .iter()
                    .map(|module| self.command_owned(commands::set_mute(module, mute)));
                collect_results(join_all(writes).await)
            }
            _ => Ok(()),
        }
    }

    pub async fn set_level(&self, target: &Target, gain_db: f64) -> Result<(), CoreError> {
        match target.id.kind {
            TargetKind::Module => {
                self.command(&commands::set_gain(&target.id.key, gain_db)).await
            }
            TargetKind::Group => {
                let Some(members) = group_members(&target.id.key) else {
                    return Ok(());
                };
                let writes = members
                    .iter()
                    .map(|module| self.command_owned(commands::set_gain(module, gain_db)));
                collect_results(join_all(writes).await)
            }
            _ => Ok(()),
        }
    }

    pub async fn recall_preset(&self, index: u32) -> Result<(), CoreError> {
        self.command(&commands::recall_preset(index)).await
    }

    async fn module_state(&self, module: &str) -> TargetState {
        let (mute, gain) = tokio::join!(self.read_mute(module), self.read_gain(module));
        TargetState {
            online: self.client.is_online(),
            mute,
            level_db: gain,
            volume: None,
            last_updated_ms: now_ms(),
        }
    }

    async fn group_state(&self, name: &str) -> TargetState {
        let Some(members) = group_members(name) else {
            return TargetState::offline(now_ms());
        };
        let mutes = join_all(members.iter().map(|m| self.read_mute(m))).await;
        let gains = join_all(members.iter().map(|m| self.read_gain(m))).await;
        TargetState {
            online: self.client.is_online(),
            mute: aggregate_mute(&mutes),
            level_db: aggregate_level(&gains),
            volume: None,
            last_updated_ms: now_ms(),
        }
    }

    /// Query one module's mute flag. Poll reads run without retries --
    /// the next cycle comes around soon enough.
    async fn read_mute(&self, module: &str) -> Option<bool> {
        let reply = self
            .client
            .send(&commands::get_mute(module), 0, self.settings.timeout)
            .await
            .ok()??;
        trailing_token(&reply).map(|token| token == "1")
    }

    async fn read_gain(&self, module: &str) -> Option<f64> {
        let reply = self
            .client
            .send(&commands::get_gain(module), 0, self.settings.timeout)
            .await
            .ok()??;
        trailing_token(&reply)?.parse().ok()
    }

    /// Fire a write/action command with the configured retry budget.
    async fn command(&self, command: &str) -> Result<(), CoreError> {
        debug!(command, "dlm command");
        self.client
            .send(command, self.settings.retries, self.settings.timeout)
            .await?;
        Ok(())
    }

    async fn command_owned(&self, command: String) -> Result<(), CoreError> {
        self.command(&command).await
    }
}

/// The value token trailing an echoed query response.
fn trailing_token(payload: &str) -> Option<&str> {
    payload.split_whitespace().last()
}

/// Group mute is the AND of its members: the group only reads muted when
/// every member is muted (unknown members count as unmuted).
fn aggregate_mute(members: &[Option<bool>]) -> Option<bool> {
    if members.is_empty() {
        return None;
    }
    Some(members.iter().all(|m| *m == Some(true)))
}

/// Group level is the arithmetic mean of the members that reported.
fn aggregate_level(members: &[Option<f64>]) -> Option<f64> {
    let values: Vec<f64> = members.iter().filter_map(|m| *m).collect();
    if values.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(mean)
}

fn collect_results(results: Vec<Result<(), CoreError>>) -> Result<(), CoreError> {
    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn group_mute_is_the_and_of_members() {
        assert_eq!(aggregate_mute(&[Some(true), Some(false)]), Some(false));
        assert_eq!(aggregate_mute(&[Some(true), Some(true)]), Some(true));
        assert_eq!(aggregate_mute(&[Some(true), None]), Some(false));
        assert_eq!(aggregate_mute(&[]), None);
    }

    #[test]
    fn group_level_averages_reporting_members() {
        assert_eq!(aggregate_level(&[Some(-6.0), Some(0.0)]), Some(-3.0));
        assert_eq!(aggregate_level(&[Some(-6.0), None]), Some(-6.0));
        assert_eq!(aggregate_level(&[None, None]), None);
    }

    #[test]
    fn trailing_token_parses_echoed_responses() {
        assert_eq!(trailing_token("Mod.In.Mute?A 1"), Some("1"));
        assert_eq!(trailing_token("Mod.In.Gain?B -6.50"), Some("-6.50"));
        assert_eq!(trailing_token(""), None);
    }

    #[test]
    fn groups_cover_the_expected_modules() {
        assert_eq!(group_members("LR"), Some(&["A", "B"][..]));
        assert_eq!(group_members("ALL"), Some(&["A", "B", "C", "D"][..]));
        assert_eq!(group_members("XY"), None);
    }
}
