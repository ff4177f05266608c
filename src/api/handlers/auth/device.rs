//! Device identity: fingerprints and session tokens.
//!
//! The fingerprint is a digest over user-agent + client IP. Both inputs are
//! spoofable and shared behind NAT/corporate proxies; this matches the
//! storefront's existing client contract and is a documented weak point, not
//! an oversight.

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

/// Sentinel used when no client address can be resolved at all.
const LOOPBACK_SENTINEL: &str = "127.0.0.1";

/// Bytes of the SHA-256 digest kept in the fingerprint (32 hex chars).
const FINGERPRINT_BYTES: usize = 16;

/// Compute the device fingerprint for a user-agent/IP pairing.
///
/// Pure and deterministic: the same inputs always produce the same digest,
/// across calls and process restarts.
#[must_use]
pub fn fingerprint(user_agent: &str, client_ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(b"|");
    hasher.update(client_ip.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest[..FINGERPRINT_BYTES])
}

/// Create a new session token.
/// The raw value is only returned to set the cookie; it is a bearer secret.
pub fn new_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Short digest of a session token, safe for audit events and logs.
#[must_use]
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest[..8])
}

/// Extract the best-effort originating client IP.
///
/// Prefers the first `x-forwarded-for` hop, then `x-real-ip`, then the
/// transport peer address, and finally a loopback sentinel. Never fails.
#[must_use]
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map_or_else(|| LOOPBACK_SENTINEL.to_string(), |addr| addr.ip().to_string())
}

/// Extract the request user-agent, defaulting to an empty string.
#[must_use]
pub fn resolve_user_agent(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::new(), |mut acc, byte| {
        let _ = write!(acc, "{byte:02x}");
        acc
    })
}
