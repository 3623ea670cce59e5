//! SIP Digest authentication (RFC 2617), MD5 only — the scheme in
//! universal deployment for SIP registrars. No qop=auth-int support:
//! this bridge only ever REGISTERs, never sends a body that needs
//! integrity protection.

use md5::{Digest, Md5};

pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub qop: Option<String>,
}

/// Parse a `WWW-Authenticate: Digest ...` header value into its
/// component parts.
pub fn parse_challenge(header_value: &str) -> Option<DigestChallenge> {
    let rest = header_value.trim().strip_prefix("Digest ")?;
    let mut realm = None;
    let mut nonce = None;
    let mut opaque = None;
    let mut qop = None;

    for part in split_params(rest) {
        let (key, value) = part.split_once('=')?;
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "realm" => realm = Some(value.to_string()),
            "nonce" => nonce = Some(value.to_string()),
            "opaque" => opaque = Some(value.to_string()),
            "qop" => qop = Some(value.to_string()),
            _ => {}
        }
    }

    Some(DigestChallenge {
        realm: realm?,
        nonce: nonce?,
        opaque,
        qop,
    })
}

fn split_params(rest: &str) -> Vec<&str> {
    // Parameter values may themselves contain commas only inside
    // quotes; SIP digest params in practice never do, so a plain split
    // on top-level commas is sufficient here.
    rest.split(',').collect()
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Compute the `response` value for an Authorization header, per
/// RFC 2617 §3.2.2.1 (qop unspecified / "auth" only).
pub fn compute_response(
    username: &str,
    realm: &str,
    password: &str,
    method: &str,
    uri: &str,
    nonce: &str,
) -> String {
    let ha1 = md5_hex(&format!("{username}:{realm}:{password}"));
    let ha2 = md5_hex(&format!("{method}:{uri}"));
    md5_hex(&format!("{ha1}:{nonce}:{ha2}"))
}

/// Build the full `Authorization` header value for a REGISTER retry.
pub fn build_authorization_header(
    username: &str,
    challenge: &DigestChallenge,
    password: &str,
    method: &str,
    uri: &str,
) -> String {
    let response = compute_response(username, &challenge.realm, password, method, uri, &challenge.nonce);
    let mut header = format!(
        "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", response=\"{response}\"",
        challenge.realm, challenge.nonce
    );
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{opaque}\""));
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_digest_challenge() {
        let header = r#"Digest realm="sip.example.com", nonce="abc123", opaque="xyz""#;
        let challenge = parse_challenge(header).unwrap();
        assert_eq!(challenge.realm, "sip.example.com");
        assert_eq!(challenge.nonce, "abc123");
        assert_eq!(challenge.opaque.as_deref(), Some("xyz"));
    }

    #[test]
    fn compute_response_is_deterministic_and_32_hex_chars() {
        let response = compute_response("alice", "realm", "secret", "REGISTER", "sip:registrar.example.com", "n0nce");
        assert_eq!(response.len(), 32);
        assert!(response.chars().all(|c| c.is_ascii_hexdigit()));

        let response2 = compute_response("alice", "realm", "secret", "REGISTER", "sip:registrar.example.com", "n0nce");
        assert_eq!(response, response2);
    }

    #[test]
    fn different_passwords_produce_different_responses() {
        let r1 = compute_response("alice", "realm", "secret1", "REGISTER", "sip:x", "n");
        let r2 = compute_response("alice", "realm", "secret2", "REGISTER", "sip:x", "n");
        assert_ne!(r1, r2);
    }
}
