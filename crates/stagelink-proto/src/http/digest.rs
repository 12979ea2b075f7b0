// HTTP digest authentication (RFC 2617, with RFC 2069 fallback when the
// challenge carries no qop directive).

use md5::{Digest, Md5};

/// A parsed `WWW-Authenticate: Digest` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
}

/// Parse a `WWW-Authenticate` header value into a digest challenge.
///
/// Returns `None` for non-digest schemes or challenges missing the
/// mandatory `realm`/`nonce` directives.
pub fn parse_challenge(header: &str) -> Option<DigestChallenge> {
    let header = header.trim();
    if header.len() < 6 || !header[..6].eq_ignore_ascii_case("digest") {
        return None;
    }

    let mut realm = None;
    let mut nonce = None;
    let mut qop = None;
    let mut opaque = None;

    for part in header[6..].split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_owned();
        match key.trim().to_ascii_lowercase().as_str() {
            "realm" => realm = Some(value),
            "nonce" => nonce = Some(value),
            "qop" => qop = Some(value),
            "opaque" => opaque = Some(value),
            _ => {}
        }
    }

    Some(DigestChallenge {
        realm: realm?,
        nonce: nonce?,
        qop,
        opaque,
    })
}

/// Build the `Authorization` header answering a challenge.
///
/// `nc` is the per-client request counter; `cnonce` the client-generated
/// nonce. Both only appear in the header when the challenge carries a qop
/// directive (first token wins when the server offers several).
#[allow(clippy::too_many_arguments)]
pub fn authorization_header(
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    challenge: &DigestChallenge,
    cnonce: &str,
    nc: u32,
) -> String {
    let qop = challenge
        .qop
        .as_deref()
        .and_then(|q| q.split(',').next())
        .map(str::trim);
    let nc_hex = format!("{nc:08x}");

    let response = response_digest(
        username,
        password,
        method,
        uri,
        &challenge.realm,
        &challenge.nonce,
        qop,
        &nc_hex,
        cnonce,
    );

    let mut params = vec![
        format!("username=\"{username}\""),
        format!("realm=\"{}\"", challenge.realm),
        format!("nonce=\"{}\"", challenge.nonce),
        format!("uri=\"{uri}\""),
        format!("response=\"{response}\""),
    ];
    if let Some(opaque) = &challenge.opaque {
        params.push(format!("opaque=\"{opaque}\""));
    }
    if let Some(qop) = qop {
        params.push(format!("qop={qop}"));
        params.push(format!("nc={nc_hex}"));
        params.push(format!("cnonce=\"{cnonce}\""));
    }
    format!("Digest {}", params.join(", "))
}

/// The response digest itself: HA1 over the credentials, HA2 over the
/// request line, combined per RFC 2617 (or RFC 2069 without qop).
#[allow(clippy::too_many_arguments)]
fn response_digest(
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    realm: &str,
    nonce: &str,
    qop: Option<&str>,
    nc_hex: &str,
    cnonce: &str,
) -> String {
    let ha1 = md5_hex(&format!("{username}:{realm}:{password}"));
    let ha2 = md5_hex(&format!("{method}:{uri}"));
    match qop {
        Some(qop) => md5_hex(&format!("{ha1}:{nonce}:{nc_hex}:{cnonce}:{qop}:{ha2}")),
        None => md5_hex(&format!("{ha1}:{nonce}:{ha2}")),
    }
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}
