// DLM wire frames
//
// Layout: [type u16 BE] [flags u16 BE] [message id u32 BE] [payload length
// u32 BE] [ASCII command, zero-padded to a 4-byte boundary]. The length
// field counts the command bytes only, never the padding.
//
// The two leading 16-bit fields are carried exactly as the vendor tooling
// writes them; their meaning is unverified against hardware captures, so
// the 12-byte layout is the contract here and nothing more.

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 12;

const FRAME_TYPE: u16 = 0x0100;
const FLAG_REQUIRE_ACK: u16 = 0x0001;

/// A zero-length frame: the unit acknowledging a message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub msg_id: u32,
}

/// A data frame answering a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataResponse {
    pub msg_id: u32,
    /// Payload text with embedded zero bytes stripped.
    pub payload: String,
}

/// Encode a command string into a complete frame.
pub fn encode_command(command: &str, msg_id: u32) -> Vec<u8> {
    let payload = command.as_bytes();
    let padded_len = payload.len().div_ceil(4) * 4;

    let mut buf = Vec::with_capacity(HEADER_LEN + padded_len);
    buf.extend_from_slice(&FRAME_TYPE.to_be_bytes());
    buf.extend_from_slice(&FLAG_REQUIRE_ACK.to_be_bytes());
    buf.extend_from_slice(&msg_id.to_be_bytes());
    buf.extend_from_slice(&u32::try_from(payload.len()).unwrap_or(u32::MAX).to_be_bytes());
    buf.extend_from_slice(payload);
    buf.resize(HEADER_LEN + padded_len, 0);
    buf
}

/// Parse the common header, returning `(msg_id, declared_len)`.
fn header(frame: &[u8]) -> Option<(u32, usize)> {
    if frame.len() < HEADER_LEN {
        return None;
    }
    let msg_id = u32::from_be_bytes(frame[4..8].try_into().ok()?);
    let len = u32::from_be_bytes(frame[8..12].try_into().ok()?);
    Some((msg_id, usize::try_from(len).ok()?))
}

/// Try to decode a frame as an acknowledgement.
///
/// Only zero-length frames qualify; anything else must go through
/// [`decode_response`]. Frames without a discriminator mean both decoders
/// are tried on every inbound datagram.
pub fn decode_ack(frame: &[u8]) -> Option<Ack> {
    let (msg_id, len) = header(frame)?;
    (len == 0).then_some(Ack { msg_id })
}

/// Try to decode a frame as a data response.
///
/// Returns `None` for short, zero-length, or truncated frames; such
/// datagrams are dropped silently and the requester times out instead.
pub fn decode_response(frame: &[u8]) -> Option<DataResponse> {
    let (msg_id, len) = header(frame)?;
    if len == 0 {
        return None;
    }
    let end = HEADER_LEN.checked_add(len)?;
    if frame.len() < end {
        return None;
    }
    let payload = frame[HEADER_LEN..end]
        .iter()
        .filter(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect();
    Some(DataResponse { msg_id, payload })
}
