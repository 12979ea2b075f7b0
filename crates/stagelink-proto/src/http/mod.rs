// JSON-over-HTTP client for amplifier/processor units, with transparent
// digest authentication. Embedded HTTP servers on these units are slow
// and fragile; the client keeps timeouts short and never retries on its
// own beyond the single auth re-issue.

pub mod client;
pub mod digest;

pub use client::{DigestClient, HttpResponse};
pub use digest::DigestChallenge;
