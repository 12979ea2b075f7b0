// ── Core error types ──
//
// Only direct user actions (mute/level/preset commands) ever surface
// these to callers; anything originating from the polling loop is
// translated into `online: false` state instead.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Protocol-level failure from one of the wire clients.
    #[error("Backend error: {0}")]
    Backend(#[from] stagelink_proto::Error),

    /// Invalid engine configuration (bad address, bad subnet, ...).
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Returns `true` if the device never answered (as opposed to
    /// answering with a refusal).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_timeout())
    }

    /// Returns `true` for reachable-but-denied failures, which are kept
    /// distinct from offline.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_denied())
    }
}
