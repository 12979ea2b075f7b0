// DLM: the binary UDP messaging protocol spoken by loudspeaker-management
// units. Commands are ASCII strings carried in length-prefixed frames; the
// unit acknowledges every frame and answers queries with a second data frame.

pub mod client;
pub mod commands;
pub mod frame;

pub use client::DlmClient;
pub use frame::{Ack, DataResponse, HEADER_LEN, decode_ack, decode_response, encode_command};
