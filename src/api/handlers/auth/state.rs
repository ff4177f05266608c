//! Auth configuration and shared state.

use std::sync::Arc;

use super::audit::AuditSink;
use super::directory::UserDirectory;
use super::session_store::SessionStore;
use super::verifier::AdminCredentials;

/// Hard cap of 7 days, fixed at creation. Activity updates
/// `last_activity_at` but never extends the expiry.
const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

/// Everything the auth handlers need, injected at construction.
///
/// The stores are trait objects so the whole layer runs unchanged against
/// Postgres or the in-memory fakes.
pub struct AuthState {
    config: AuthConfig,
    admin: AdminCredentials,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditSink>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        admin: AdminCredentials,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            admin,
            sessions,
            users,
            audit,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn admin(&self) -> &AdminCredentials {
        &self.admin
    }

    #[must_use]
    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    #[must_use]
    pub fn users(&self) -> &dyn UserDirectory {
        self.users.as_ref()
    }

    pub(crate) fn audit(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }
}
