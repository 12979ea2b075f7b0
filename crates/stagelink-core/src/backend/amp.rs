// Amplifier HTTP backend
//
// Devices are found by sweeping a host list (explicit or expanded from a
// subnet expression) with bounded-concurrency probes against the info
// endpoint. Per-device output count and capability set are auto-detected
// by probing output 1 before enumerating. Every call to one device goes
// through that device's concurrency limiter.

use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use stagelink_proto::{DigestClient, HttpResponse};

use crate::config::AmpSettings;
use crate::error::CoreError;
use crate::hosts;
use crate::limiter::DeviceLimiters;
use crate::model::{
    BackendKind, Capability, Device, LevelMode, Target, TargetId, TargetKind, TargetState, now_ms,
};

/// Preset library slots checked during target enumeration.
pub const PRESET_SLOTS: u32 = 10;

#[derive(Debug, Deserialize)]
struct InfoResponse {
    name: Option<String>,
    firmware_version: Option<String>,
}

pub struct AmpBackend {
    settings: AmpSettings,
    clients: DashMap<String, Arc<DigestClient>>,
    limiters: DeviceLimiters,
}

impl AmpBackend {
    pub fn new(settings: AmpSettings) -> Self {
        let limiters = DeviceLimiters::new(settings.per_device_limit);
        Self {
            settings,
            clients: DashMap::new(),
            limiters,
        }
    }

    /// Sweep the candidate host list with bounded concurrency.
    ///
    /// Hosts that fail to answer are silently absent from the result;
    /// a large list takes proportionally longer rather than failing.
    pub async fn discover(&self) -> Result<Vec<Device>, CoreError> {
        let candidates = hosts::expand_hosts(&self.settings.hosts, &self.settings.subnet);
        debug!(candidates = candidates.len(), "amp discovery sweep");

        let devices = stream::iter(candidates)
            .map(|host| self.probe(host))
            .buffer_unordered(self.settings.discovery_workers.max(1))
            .filter_map(|device| async move { device })
            .collect()
            .await;
        Ok(devices)
    }

    async fn probe(&self, host: String) -> Option<Device> {
        let client = self.client(&host).ok()?;
        let device_id = device_id_for(&host);
        let resp: HttpResponse<InfoResponse> =
            self.limited_get(&device_id, &client, "/api/info").await.ok()?;
        if !resp.ok() {
            return None;
        }
        let info = resp.data?;
        Some(Device {
            id: device_id,
            display_name: info.name.unwrap_or_else(|| host.clone()),
            backend: BackendKind::AmpHttp,
            address: host,
            model: info.firmware_version,
            online: true,
        })
    }

    /// Enumerate outputs and used preset slots of one device.
    pub async fn targets(&self, device: &Device) -> Result<Vec<Target>, CoreError> {
        let client = self.client(&device.address)?;

        let outputs: HttpResponse<Vec<serde_json::Value>> = self
            .limited_get(&device.id, &client, "/api/control/dsp/output")
            .await?;
        let output_count = outputs.data.map_or(0, |list| list.len());
        let supports = self.detect_output_support(device, &client).await?;

        let mut targets = Vec::with_capacity(output_count + 2);
        for index in 1..=output_count {
            targets.push(Target {
                id: TargetId::new(
                    BackendKind::AmpHttp,
                    &device.id,
                    TargetKind::Output,
                    index.to_string(),
                ),
                name: format!("Output {index}"),
                supports: supports.clone(),
            });
        }

        for slot in 1..=PRESET_SLOTS {
            let used: HttpResponse<bool> = self
                .limited_get(
                    &device.id,
                    &client,
                    &format!("/api/configuration/library/{slot}/used"),
                )
                .await?;
            if used.data != Some(true) {
                continue;
            }
            let name: HttpResponse<String> = self
                .limited_get(
                    &device.id,
                    &client,
                    &format!("/api/configuration/library/{slot}/name"),
                )
                .await?;
            targets.push(Target {
                id: TargetId::new(
                    BackendKind::AmpHttp,
                    &device.id,
                    TargetKind::Preset,
                    slot.to_string(),
                ),
                name: name.data.unwrap_or_else(|| format!("Preset {slot}")),
                supports: Vec::new(),
            });
        }

        Ok(targets)
    }

    /// Probe output 1 to learn what this model exposes. Mute is always
    /// assumed; gain and volume only when their endpoints answer.
    async fn detect_output_support(
        &self,
        device: &Device,
        client: &DigestClient,
    ) -> Result<Vec<Capability>, CoreError> {
        let mut supports = vec![Capability::Mute];
        let gain: HttpResponse<f64> = self
            .limited_get(&device.id, client, "/api/control/dsp/output/1/gain")
            .await?;
        if gain.ok() {
            supports.push(Capability::Level);
        }
        let volume: HttpResponse<f64> = self
            .limited_get(&device.id, client, "/api/control/dsp/output/1/volume")
            .await?;
        if volume.ok() {
            supports.push(Capability::Volume);
        }
        Ok(supports)
    }

    pub async fn state(&self, target: &Target) -> Result<TargetState, CoreError> {
        if target.id.kind != TargetKind::Output {
            // Preset targets carry no readable state of their own.
            return Ok(TargetState {
                online: true,
                mute: None,
                level_db: None,
                volume: None,
                last_updated_ms: now_ms(),
            });
        }

        let client = self.client_for_target(target)?;
        let index = &target.id.key;
        let mute: HttpResponse<bool> = self
            .limited_get(
                &target.id.device_id,
                &client,
                &format!("/api/control/dsp/output/{index}/mute"),
            )
            .await?;
        let gain: HttpResponse<f64> = self
            .limited_get(
                &target.id.device_id,
                &client,
                &format!("/api/control/dsp/output/{index}/gain"),
            )
            .await?;
        let volume: HttpResponse<f64> = self
            .limited_get(
                &target.id.device_id,
                &client,
                &format!("/api/control/dsp/output/{index}/volume"),
            )
            .await?;

        Ok(TargetState {
            online: mute.ok() || gain.ok() || volume.ok(),
            mute: mute.data,
            level_db: gain.data,
            volume: volume.data,
            last_updated_ms: now_ms(),
        })
    }

    pub async fn set_mute(&self, target: &Target, mute: bool) -> Result<(), CoreError> {
        if target.id.kind != TargetKind::Output {
            return Ok(());
        }
        let client = self.client_for_target(target)?;
        let path = format!("/api/control/dsp/output/{}/mute", target.id.key);
        self.limited_post(&target.id.device_id, &client, &path, json!(mute))
            .await?;
        Ok(())
    }

    pub async fn set_level(
        &self,
        target: &Target,
        value: f64,
        mode: LevelMode,
    ) -> Result<(), CoreError> {
        if target.id.kind != TargetKind::Output {
            return Ok(());
        }
        let client = self.client_for_target(target)?;
        let (path, body) = match mode {
            LevelMode::Volume => {
                #[allow(clippy::cast_possible_truncation)]
                let steps = value.round() as i64;
                (
                    format!("/api/control/dsp/output/{}/volume", target.id.key),
                    json!(steps),
                )
            }
            LevelMode::Gain => (
                format!("/api/control/dsp/output/{}/gain", target.id.key),
                json!(value),
            ),
        };
        self.limited_post(&target.id.device_id, &client, &path, body)
            .await?;
        Ok(())
    }

    pub async fn recall_preset(&self, device: &Device, index: u32) -> Result<(), CoreError> {
        let client = self.client(&device.address)?;
        self.limited_post(
            &device.id,
            &client,
            "/api/configuration/load",
            json!({ "index": index }),
        )
        .await?;
        Ok(())
    }

    pub async fn active_preset_index(&self, device: &Device) -> Result<Option<u32>, CoreError> {
        let client = self.client(&device.address)?;
        let resp: HttpResponse<u32> = self
            .limited_get(&device.id, &client, "/api/configuration/active/index")
            .await?;
        if !resp.ok() {
            return Ok(None);
        }
        Ok(resp.data)
    }

    /// One cached client per host; limiters are keyed by device id.
    fn client(&self, host: &str) -> Result<Arc<DigestClient>, CoreError> {
        if let Some(existing) = self.clients.get(host) {
            return Ok(Arc::clone(&existing));
        }
        let client = Arc::new(DigestClient::new(
            host,
            self.settings.credentials(),
            self.settings.probe_timeout,
        )?);
        self.clients.insert(host.to_owned(), Arc::clone(&client));
        Ok(client)
    }

    fn client_for_target(&self, target: &Target) -> Result<Arc<DigestClient>, CoreError> {
        self.client(host_for_device_id(&target.id.device_id))
    }

    async fn limited_get<T: DeserializeOwned>(
        &self,
        device_id: &str,
        client: &DigestClient,
        path: &str,
    ) -> Result<HttpResponse<T>, CoreError> {
        let _permit = self.limiters.acquire(device_id).await;
        Ok(client.get(path).await?)
    }

    async fn limited_post(
        &self,
        device_id: &str,
        client: &DigestClient,
        path: &str,
        body: serde_json::Value,
    ) -> Result<HttpResponse<serde_json::Value>, CoreError> {
        let _permit = self.limiters.acquire(device_id).await;
        Ok(client.post(path, &body).await?)
    }
}

fn device_id_for(host: &str) -> String {
    format!("amp_{host}")
}

/// Inverse of [`device_id_for`]: target ids carry the device id, the
/// HTTP client needs the host back.
fn host_for_device_id(device_id: &str) -> &str {
    device_id.strip_prefix("amp_").unwrap_or(device_id)
}
