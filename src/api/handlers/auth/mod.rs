//! Session and device-binding auth.
//!
//! This module ties a logical login to a single physical device: a login
//! mints a session token, fingerprints the device, and records both on the
//! user. Every authenticated request re-derives its decision from the
//! session store; nothing is cached in-process.
//!
//! ## Device binding
//!
//! Regular users hold at most one live session. A new login invalidates the
//! previous one and repoints the binding. The admin sentinel is exempt and
//! may operate from any number of devices concurrently.
//!
//! ## Recovery
//!
//! A session record can lose its subject marker while keeping the secondary
//! admin marker (the backing store writes fields independently). Admin
//! routes repair such records in place; everything else rejects them.

pub(crate) mod audit;
pub(crate) mod device;
pub(crate) mod directory;
mod error;
pub(crate) mod gate;
pub(crate) mod login;
pub(crate) mod session;
pub(crate) mod session_store;
mod state;
pub(crate) mod subject;
pub(crate) mod types;
pub(crate) mod verifier;

pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use directory::{
    CreateOutcome, DeviceBinding, MemoryUserDirectory, PgUserDirectory, UserDirectory, UserRecord,
};
pub use error::AuthError;
pub use session_store::{
    MemorySessionStore, NewSession, PgSessionStore, SessionRecord, SessionStore, StoreError,
};
pub use state::{AuthConfig, AuthState};
pub use subject::SubjectId;
pub use verifier::AdminCredentials;
