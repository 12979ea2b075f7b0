use thiserror::Error;

/// Top-level error type for the `stagelink-proto` crate.
///
/// Covers every failure mode across both protocol families.
/// `stagelink-core` maps these into cached device state or user-facing
/// errors depending on where the call originated.
#[derive(Debug, Error)]
pub enum Error {
    // ── UDP transactional client ────────────────────────────────────
    /// A request exhausted its retries without a matching reply.
    #[error("No reply after {attempts} transmission attempts")]
    Timeout { attempts: u32 },

    /// Socket-level I/O failure (bind, send).
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    // ── HTTP digest client ──────────────────────────────────────────
    /// Digest handshake was rejected (second 401). The device is
    /// reachable but denied -- distinct from offline.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// HTTP transport error (connection refused, request timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error means the device did not answer at all.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Returns `true` if the device answered but refused the credentials.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}
