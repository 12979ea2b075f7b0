// ── Polling engine ──
//
// Owns the backends, the discovered catalog, and the cached states, and
// runs two background loops: a fast one polling exactly the targets the
// control surface has bound, and a slow one re-discovering the catalog.
// The catalog is replaced atomically on refresh; readers never observe a
// half-built one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{AmpBackend, Backend, DlmBackend};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::event::Event;
use crate::model::{
    ActionKind, BackendKind, Binding, Capability, Device, DeviceState, LevelMode, Target, TargetId,
    TargetKind, TargetState, now_ms,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Where a catalog refresh currently stands. Mostly useful for UIs that
/// want to show a "scanning..." indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Discovering,
    TargetEnumerating,
    Published,
}

#[derive(Default)]
struct Catalog {
    devices: HashMap<String, Arc<Device>>,
    targets: HashMap<TargetId, Arc<Target>>,
}

struct EngineInner {
    config: EngineConfig,
    backends: Vec<Backend>,
    catalog: RwLock<Catalog>,
    target_states: RwLock<HashMap<TargetId, TargetState>>,
    device_states: RwLock<HashMap<String, DeviceState>>,
    bindings: RwLock<HashMap<String, Binding>>,
    event_tx: broadcast::Sender<Event>,
    phase_tx: watch::Sender<RefreshPhase>,
    // Holds a receiver while a refresh is in flight so concurrent
    // callers await the same pass instead of starting their own.
    refresh_gate: Mutex<Option<watch::Receiver<bool>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a running engine. Cheap to clone; all clones share the
/// same catalog, caches, and background tasks.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Build an engine from config. Backends are only constructed for
    /// the protocol families whose settings are present.
    pub async fn new(config: EngineConfig) -> Result<Self, CoreError> {
        let mut backends = Vec::new();
        if let Some(dlm) = config.dlm.clone() {
            backends.push(Backend::Dlm(DlmBackend::new(dlm).await?));
        }
        if let Some(amp) = config.amp.clone() {
            backends.push(Backend::Amp(AmpBackend::new(amp)));
        }

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (phase_tx, _) = watch::channel(RefreshPhase::Idle);

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                backends,
                catalog: RwLock::new(Catalog::default()),
                target_states: RwLock::new(HashMap::new()),
                device_states: RwLock::new(HashMap::new()),
                bindings: RwLock::new(HashMap::new()),
                event_tx,
                phase_tx,
                refresh_gate: Mutex::new(None),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Spawn the discovery and polling loops. Idempotent.
    pub async fn start(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        info!("engine starting");
        tasks.push(tokio::spawn(discovery_task(self.clone())));
        tasks.push(tokio::spawn(poll_task(Arc::clone(&self.inner))));
    }

    /// Cancel the background loops and wait for them to exit.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
        info!("engine stopped");
    }

    /// Run (or join) a catalog refresh.
    ///
    /// If a refresh is already in flight, this waits for that pass to
    /// publish rather than starting a second one.
    pub async fn refresh_catalog(&self) {
        let done_tx = {
            let mut gate = self.inner.refresh_gate.lock().await;
            if let Some(mut rx) = (*gate).clone() {
                drop(gate);
                // Sender drop also releases waiters.
                let _ = rx.changed().await;
                return;
            }
            let (tx, rx) = watch::channel(false);
            *gate = Some(rx);
            tx
        };

        self.inner.refresh_internal().await;

        *self.inner.refresh_gate.lock().await = None;
        let _ = done_tx.send(true);
    }

    /// Declare a control's interest in a target. Keyed by context, so a
    /// control re-binding replaces its previous interest.
    pub async fn register_binding(&self, binding: Binding) {
        self.inner
            .bindings
            .write()
            .await
            .insert(binding.context.clone(), binding);
    }

    pub async fn unregister_binding(&self, context: &str) {
        self.inner.bindings.write().await.remove(context);
    }

    pub async fn devices(&self) -> Vec<Arc<Device>> {
        self.inner.catalog.read().await.devices.values().cloned().collect()
    }

    pub async fn targets(&self) -> Vec<Arc<Target>> {
        self.inner.catalog.read().await.targets.values().cloned().collect()
    }

    pub async fn target(&self, id: &TargetId) -> Option<Arc<Target>> {
        self.inner.catalog.read().await.targets.get(id).cloned()
    }

    /// Last polled state of a target, if it has been polled at all.
    pub async fn target_state(&self, id: &TargetId) -> Option<TargetState> {
        self.inner.target_states.read().await.get(id).cloned()
    }

    pub async fn device_state(&self, device_id: &str) -> Option<DeviceState> {
        self.inner.device_states.read().await.get(device_id).cloned()
    }

    /// Set a target's mute flag. Unknown targets are a silent no-op:
    /// the control surface may hold ids from a previous catalog.
    pub async fn set_mute(&self, id: &TargetId, mute: bool) -> Result<(), CoreError> {
        let Some(target) = self.target(id).await else {
            return Ok(());
        };
        let Some(backend) = self.inner.backend_for(id.backend) else {
            return Ok(());
        };
        backend.set_mute(&target, mute).await
    }

    /// Write a level. The mode is picked from the target's detected
    /// capabilities: volume-only targets get integer volume steps,
    /// everything else gets dB gain.
    pub async fn set_level(&self, id: &TargetId, value: f64) -> Result<(), CoreError> {
        let Some(target) = self.target(id).await else {
            return Ok(());
        };
        let Some(backend) = self.inner.backend_for(id.backend) else {
            return Ok(());
        };
        let mode = if target.supports(Capability::Volume) && !target.supports(Capability::Level) {
            LevelMode::Volume
        } else {
            LevelMode::Gain
        };
        backend.set_level(&target, value, mode).await
    }

    /// Recall the preset a preset target names on its device.
    pub async fn recall_preset(&self, id: &TargetId) -> Result<(), CoreError> {
        if id.kind != TargetKind::Preset {
            return Ok(());
        }
        let Ok(index) = id.key.parse::<u32>() else {
            return Ok(());
        };
        let device = {
            let catalog = self.inner.catalog.read().await;
            catalog.devices.get(&id.device_id).cloned()
        };
        let Some(device) = device else {
            return Ok(());
        };
        let Some(backend) = self.inner.backend_for(id.backend) else {
            return Ok(());
        };
        backend.recall_preset(&device, index).await
    }

    /// Subscribe to engine events. Slow subscribers lag (and observe
    /// `RecvError::Lagged`) rather than blocking the poll loop.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.event_tx.subscribe()
    }

    /// Watch catalog refresh progress.
    pub fn phase_watch(&self) -> watch::Receiver<RefreshPhase> {
        self.inner.phase_tx.subscribe()
    }
}

impl EngineInner {
    fn backend_for(&self, kind: BackendKind) -> Option<&Backend> {
        self.backends.iter().find(|b| b.kind() == kind)
    }

    fn set_phase(&self, phase: RefreshPhase) {
        let _ = self.phase_tx.send(phase);
    }

    /// Non-fatal failure: log it and surface it on the event bus.
    fn log(&self, message: String) {
        warn!("{message}");
        let _ = self.event_tx.send(Event::Log(message));
    }

    /// One full discovery + enumeration pass, published atomically.
    async fn refresh_internal(&self) {
        self.set_phase(RefreshPhase::Discovering);
        let mut devices: Vec<Device> = Vec::new();
        for backend in &self.backends {
            match backend.discover().await {
                Ok(found) => devices.extend(found),
                Err(e) => self.log(format!("{} discovery failed: {e}", backend.kind())),
            }
        }

        self.set_phase(RefreshPhase::TargetEnumerating);
        let mut next = Catalog::default();
        for device in devices {
            let Some(backend) = self.backend_for(device.backend) else {
                continue;
            };
            match backend.targets(&device).await {
                Ok(targets) => {
                    for target in targets {
                        next.targets.insert(target.id.clone(), Arc::new(target));
                    }
                }
                Err(e) => self.log(format!("{}: target listing failed: {e}", device.id)),
            }
            next.devices.insert(device.id.clone(), Arc::new(device));
        }

        debug!(
            devices = next.devices.len(),
            targets = next.targets.len(),
            "catalog refreshed"
        );
        *self.catalog.write().await = next;
        self.set_phase(RefreshPhase::Published);
        let _ = self.event_tx.send(Event::CatalogUpdated);
        self.set_phase(RefreshPhase::Idle);
    }

    /// Poll every bound target once and publish the results.
    async fn poll_targets(&self, targets: &[Arc<Target>]) {
        if targets.is_empty() {
            return;
        }
        let fetches = targets.iter().map(|target| async move {
            let backend = self.backend_for(target.id.backend)?;
            Some(backend.state(target).await)
        });
        let results = join_all(fetches).await;

        let mut states = self.target_states.write().await;
        for (target, result) in targets.iter().zip(results) {
            let state = match result {
                Some(Ok(state)) => state,
                Some(Err(e)) => {
                    debug!(target = %target.id, error = %e, "poll failed");
                    TargetState::offline(now_ms())
                }
                None => continue,
            };
            states.insert(target.id.clone(), state.clone());
            let _ = self.event_tx.send(Event::TargetState {
                target: Arc::clone(target),
                state,
            });
        }
    }

    /// Ask each preset-bound device which preset is active.
    async fn poll_presets(&self, device_ids: &HashSet<String>) {
        let devices: Vec<Arc<Device>> = {
            let catalog = self.catalog.read().await;
            device_ids
                .iter()
                .filter_map(|id| catalog.devices.get(id).cloned())
                .collect()
        };

        for device in devices {
            let Some(backend) = self.backend_for(device.backend) else {
                continue;
            };
            let state = match backend.active_preset_index(&device).await {
                Ok(index) => DeviceState {
                    online: true,
                    active_preset_index: index,
                    last_updated_ms: now_ms(),
                },
                Err(e) => {
                    debug!(device = %device.id, error = %e, "preset poll failed");
                    DeviceState {
                        online: false,
                        active_preset_index: None,
                        last_updated_ms: now_ms(),
                    }
                }
            };
            self.device_states
                .write()
                .await
                .insert(device.id.clone(), state.clone());
            let _ = self.event_tx.send(Event::DeviceState { device, state });
        }
    }
}

/// Initial refresh, then periodic re-discovery until cancelled.
async fn discovery_task(engine: Engine) {
    engine.refresh_catalog().await;

    let mut ticker = interval(engine.inner.config.discovery_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately; already refreshed

    loop {
        tokio::select! {
            biased;
            () = engine.inner.cancel.cancelled() => break,
            _ = ticker.tick() => engine.refresh_catalog().await,
        }
    }
}

/// Fast loop: poll bound targets every tick, preset-bound devices at
/// their own (slower) cadence.
async fn poll_task(inner: Arc<EngineInner>) {
    let mut ticker = interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_preset_poll: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            _ = ticker.tick() => {
                let (targets, preset_devices) = {
                    let bindings = inner.bindings.read().await;
                    let catalog = inner.catalog.read().await;
                    poll_sets(&bindings, &catalog.targets)
                };
                inner.poll_targets(&targets).await;
                if !preset_devices.is_empty()
                    && last_preset_poll
                        .is_none_or(|t| t.elapsed() >= inner.config.preset_poll_interval)
                {
                    inner.poll_presets(&preset_devices).await;
                    last_preset_poll = Some(Instant::now());
                }
            }
        }
    }
}

/// Resolve the current bindings against the catalog: the deduplicated
/// target set to poll, plus the devices enrolled in the preset poll.
/// Bindings that reference ids absent from the catalog are skipped.
fn poll_sets(
    bindings: &HashMap<String, Binding>,
    targets: &HashMap<TargetId, Arc<Target>>,
) -> (Vec<Arc<Target>>, HashSet<String>) {
    let mut seen = HashSet::new();
    let mut to_poll = Vec::new();
    let mut preset_devices = HashSet::new();

    for binding in bindings.values() {
        let Some(target) = targets.get(&binding.target_id) else {
            continue;
        };
        if seen.insert(&binding.target_id) {
            to_poll.push(Arc::clone(target));
        }
        if binding.action == ActionKind::Preset {
            preset_devices.insert(binding.target_id.device_id.clone());
        }
    }

    (to_poll, preset_devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn target(id: &TargetId) -> Arc<Target> {
        Arc::new(Target {
            id: id.clone(),
            name: id.key.clone(),
            supports: vec![Capability::Mute],
        })
    }

    fn module_id(key: &str) -> TargetId {
        TargetId::new(BackendKind::Dlm, "dlm_192.168.1.50", TargetKind::Module, key)
    }

    #[test]
    fn no_bindings_means_nothing_is_polled() {
        let (to_poll, preset_devices) = poll_sets(&HashMap::new(), &HashMap::new());
        assert!(to_poll.is_empty());
        assert!(preset_devices.is_empty());
    }

    #[test]
    fn bindings_to_unknown_targets_are_skipped() {
        let known = module_id("A");
        let unknown = module_id("Z");
        let targets = HashMap::from([(known.clone(), target(&known))]);
        let bindings = HashMap::from([
            (
                "ctx-1".to_owned(),
                Binding {
                    context: "ctx-1".to_owned(),
                    target_id: known.clone(),
                    action: ActionKind::Mute,
                },
            ),
            (
                "ctx-2".to_owned(),
                Binding {
                    context: "ctx-2".to_owned(),
                    target_id: unknown,
                    action: ActionKind::Mute,
                },
            ),
        ]);

        let (to_poll, _) = poll_sets(&bindings, &targets);
        assert_eq!(to_poll.len(), 1);
        assert_eq!(to_poll[0].id, known);
    }

    #[test]
    fn duplicate_bindings_poll_the_target_once() {
        let id = module_id("A");
        let targets = HashMap::from([(id.clone(), target(&id))]);
        let bindings = HashMap::from([
            (
                "ctx-1".to_owned(),
                Binding {
                    context: "ctx-1".to_owned(),
                    target_id: id.clone(),
                    action: ActionKind::Mute,
                },
            ),
            (
                "ctx-2".to_owned(),
                Binding {
                    context: "ctx-2".to_owned(),
                    target_id: id.clone(),
                    action: ActionKind::Level,
                },
            ),
        ]);

        let (to_poll, _) = poll_sets(&bindings, &targets);
        assert_eq!(to_poll.len(), 1);
    }

    #[test]
    fn preset_bindings_enroll_their_device() {
        let preset = TargetId::new(BackendKind::AmpHttp, "amp_10.0.0.5", TargetKind::Preset, "3");
        let targets = HashMap::from([(preset.clone(), target(&preset))]);
        let bindings = HashMap::from([(
            "ctx-1".to_owned(),
            Binding {
                context: "ctx-1".to_owned(),
                target_id: preset,
                action: ActionKind::Preset,
            },
        )]);

        let (_, preset_devices) = poll_sets(&bindings, &targets);
        assert_eq!(preset_devices, HashSet::from(["amp_10.0.0.5".to_owned()]));
    }
}
