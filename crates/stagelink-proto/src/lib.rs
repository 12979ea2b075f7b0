// stagelink-proto: wire-protocol clients for audio hardware.
//
// Two protocol families live here: the DLM binary request/response
// protocol spoken over UDP by loudspeaker-management units, and the
// JSON-over-HTTP surface exposed by amplifier/processor units (with
// digest authentication). `stagelink-core` drives both through its
// backend layer.

pub mod dlm;
pub mod error;
pub mod http;

pub use dlm::DlmClient;
pub use error::Error;
pub use http::{DigestClient, HttpResponse};
