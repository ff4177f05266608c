//! # Keystand (storefront session authority)
//!
//! `keystand` is the authentication backend of the Keystand license-key
//! storefront. It owns logins, server-side sessions, and the device binding
//! that ties each regular user to a single browser/device at a time.
//!
//! ## Device binding
//!
//! Every regular login mints a session token and a device fingerprint
//! (a digest over user-agent + client IP). The fingerprint is bound to the
//! session; subsequent requests recompute it and must match. A newer login
//! supersedes the previous binding, so sharing credentials across devices
//! kicks the older device out on its next request.
//!
//! - **Admin exemption:** the admin sentinel subject is never
//!   fingerprint-checked; operational staff legitimately use several machines.
//! - **Passive expiry:** sessions carry a hard 7-day cap fixed at creation.
//!   Expiry is re-checked on every read; there is no eviction sweep.
//! - **Recovery:** a session record that lost its subject marker but still
//!   carries the admin marker can be repaired on admin routes only. The
//!   repair is narrowly scoped and always audit-logged.
//!
//! ## Known weak points
//!
//! The fingerprint is derived only from user-agent and IP, both spoofable and
//! shared behind NAT/proxies. This mirrors the storefront's contract with its
//! clients and is deliberately not strengthened here.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
