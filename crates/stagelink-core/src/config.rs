// ── Runtime engine configuration ──
//
// These types describe *how* to reach the hardware. They carry credential
// data and tuning, but never touch disk -- the host application constructs
// an `EngineConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;

/// Settings for the DLM (UDP) backend.
#[derive(Debug, Clone)]
pub struct DlmSettings {
    /// Unit address (IPv4 literal).
    pub host: String,
    /// Destination port the unit listens on.
    pub port: u16,
    /// Local port replies come back to. 0 lets the OS pick (tests only;
    /// real units reply to the fixed port).
    pub listen_port: u16,
    /// Retransmissions per user-triggered command.
    pub retries: u32,
    /// Reply window per transmission attempt.
    pub timeout: Duration,
}

impl Default for DlmSettings {
    fn default() -> Self {
        Self {
            host: "192.168.1.50".into(),
            port: stagelink_proto::dlm::client::DEFAULT_LISTEN_PORT,
            listen_port: stagelink_proto::dlm::client::DEFAULT_LISTEN_PORT,
            retries: stagelink_proto::dlm::client::DEFAULT_RETRIES,
            timeout: stagelink_proto::dlm::client::DEFAULT_TIMEOUT,
        }
    }
}

/// Settings for the amplifier HTTP backend.
#[derive(Debug, Clone)]
pub struct AmpSettings {
    /// Explicit hosts to probe. When non-empty, wins over `subnet`.
    pub hosts: Vec<String>,
    /// Discovery range: `a.b.c.0/24` or `a.b.c.start-end`.
    pub subnet: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Per-request timeout. Kept short so a /24 sweep fails fast per host.
    pub probe_timeout: Duration,
    /// Concurrent discovery probes across hosts.
    pub discovery_workers: usize,
    /// In-flight request cap per device.
    pub per_device_limit: usize,
}

impl Default for AmpSettings {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            subnet: String::new(),
            username: None,
            password: None,
            probe_timeout: stagelink_proto::http::client::DEFAULT_TIMEOUT,
            discovery_workers: 10,
            per_device_limit: 10,
        }
    }
}

impl AmpSettings {
    /// Credential pair for the digest client, when both halves are set.
    pub fn credentials(&self) -> Option<(String, SecretString)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}

/// Configuration for one [`Engine`](crate::Engine) instance.
///
/// A backend is only constructed when its settings are present.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dlm: Option<DlmSettings>,
    pub amp: Option<AmpSettings>,
    /// Cadence of the bound-target state poll.
    pub poll_interval: Duration,
    /// Cadence of full catalog re-discovery.
    pub discovery_interval: Duration,
    /// Minimum spacing between active-preset polls.
    pub preset_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dlm: None,
            amp: None,
            poll_interval: Duration::from_millis(300),
            discovery_interval: Duration::from_secs(15),
            preset_poll_interval: Duration::from_secs(1),
        }
    }
}
