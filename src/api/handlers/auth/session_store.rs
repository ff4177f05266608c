//! Server-side session records and their storage.
//!
//! The store is the single source of truth for sessions; the gate only reads
//! and requests mutations through it. Expiry is passive: expired rows are not
//! evicted eagerly, readers must treat them as absent.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use sqlx::{Connection, PgPool, Row};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{Instrument, error};

use super::device::{new_session_token, token_digest};
use super::subject::SubjectId;

/// Current wall-clock time as unix seconds.
#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// The backing store could not be reached; a 500-class failure, never to be
/// conflated with "no session".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

impl StoreError {
    pub(crate) fn unavailable(err: impl Into<anyhow::Error>) -> Self {
        Self::Unavailable(err.into())
    }
}

/// One logical login bound to a device fingerprint.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub token: String,
    /// `None` models the corrupted "subject marker missing" state the
    /// recovery branch may repair.
    pub subject: Option<SubjectId>,
    /// Secondary admin marker; survives subject-marker corruption and is the
    /// corroborating evidence consulted during recovery.
    pub admin_marker: bool,
    pub fingerprint: String,
    pub user_agent: String,
    pub ip: String,
    pub created_at_unix: i64,
    pub last_activity_unix: i64,
    /// Hard cap fixed at creation; activity does not extend it.
    pub expires_at_unix: i64,
    pub active: bool,
    pub logout_at_unix: Option<i64>,
}

impl SessionRecord {
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at_unix <= now
    }

    /// Active and unexpired.
    #[must_use]
    pub fn is_live(&self, now: i64) -> bool {
        self.active && !self.is_expired(now)
    }
}

/// Inputs for minting a new session.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub subject: SubjectId,
    pub fingerprint: String,
    pub user_agent: String,
    pub ip: String,
    pub ttl_seconds: i64,
}

/// Keyed storage for sessions.
///
/// `create` only inserts; invalidating a user's previous session is the login
/// flow's responsibility, not the store's.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, new: NewSession) -> Result<SessionRecord, StoreError>;

    /// Raw lookup; returns expired or corrupt records as stored. The gate
    /// interprets them.
    async fn find_by_token(&self, token: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Only live (active and unexpired) sessions; conceptually-expired rows
    /// are treated as absent even if still physically stored.
    async fn find_active_by_subject(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Best-effort `last_activity` bump; failures are logged, never raised.
    async fn touch(&self, token: &str);

    /// Mark inactive and record the logout time. Idempotent.
    async fn invalidate(&self, token: &str) -> Result<(), StoreError>;

    /// Recovery-branch repair: re-attach a subject to a corrupted record.
    async fn restore_subject(&self, token: &str, subject: SubjectId) -> Result<(), StoreError>;

    /// All live sessions, for the admin overview.
    async fn active_sessions(&self) -> Result<Vec<SessionRecord>, StoreError>;

    /// Backend reachability probe for `/health`.
    async fn ping(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

const SESSION_COLUMNS: &str = r"
    token,
    subject,
    admin_marker,
    fingerprint,
    user_agent,
    ip,
    EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix,
    EXTRACT(EPOCH FROM last_activity_at)::BIGINT AS last_activity_unix,
    EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at_unix,
    active,
    EXTRACT(EPOCH FROM logout_at)::BIGINT AS logout_at_unix
";

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> SessionRecord {
    let subject: Option<String> = row.get("subject");
    SessionRecord {
        token: row.get("token"),
        subject: subject.as_deref().and_then(SubjectId::parse),
        admin_marker: row.get("admin_marker"),
        fingerprint: row.get("fingerprint"),
        user_agent: row.get("user_agent"),
        ip: row.get("ip"),
        created_at_unix: row.get("created_at_unix"),
        last_activity_unix: row.get("last_activity_unix"),
        expires_at_unix: row.get("expires_at_unix"),
        active: row.get("active"),
        logout_at_unix: row.get("logout_at_unix"),
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, new: NewSession) -> Result<SessionRecord, StoreError> {
        let query = format!(
            r"
            INSERT INTO sessions
                (token, subject, admin_marker, fingerprint, user_agent, ip, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW() + ($7 * INTERVAL '1 second'))
            RETURNING {SESSION_COLUMNS}
        "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = "INSERT INTO sessions"
        );

        // Token collisions are astronomically unlikely but cheap to retry on.
        for _ in 0..3 {
            let token = new_session_token().map_err(StoreError::unavailable)?;
            let result = sqlx::query(&query)
                .bind(&token)
                .bind(new.subject.as_string())
                .bind(new.subject.is_admin())
                .bind(&new.fingerprint)
                .bind(&new.user_agent)
                .bind(&new.ip)
                .bind(new.ttl_seconds)
                .fetch_one(&self.pool)
                .instrument(span.clone())
                .await;

            match result {
                Ok(row) => return Ok(row_to_record(&row)),
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => {
                    return Err(StoreError::unavailable(
                        anyhow::Error::new(err).context("failed to insert session"),
                    ));
                }
            }
        }

        Err(StoreError::Unavailable(anyhow!(
            "failed to generate unique session token"
        )))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SessionRecord>, StoreError> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token = $1 LIMIT 1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = "SELECT FROM sessions WHERE token"
        );
        let row = sqlx::query(&query)
            .bind(token)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                StoreError::unavailable(anyhow::Error::new(err).context("failed to lookup session"))
            })?;

        Ok(row.as_ref().map(row_to_record))
    }

    async fn find_active_by_subject(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let query = format!(
            r"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE subject = $1
              AND active
              AND expires_at > NOW()
            ORDER BY created_at DESC
            LIMIT 1
        "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = "SELECT FROM sessions WHERE subject"
        );
        let row = sqlx::query(&query)
            .bind(subject.as_string())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                StoreError::unavailable(
                    anyhow::Error::new(err).context("failed to lookup session by subject"),
                )
            })?;

        Ok(row.as_ref().map(row_to_record))
    }

    async fn touch(&self, token: &str) {
        let query = "UPDATE sessions SET last_activity_at = NOW() WHERE token = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        if let Err(err) = sqlx::query(query)
            .bind(token)
            .execute(&self.pool)
            .instrument(span)
            .await
        {
            error!(
                token = token_digest(token),
                "Failed to touch session: {err}"
            );
        }
    }

    async fn invalidate(&self, token: &str) -> Result<(), StoreError> {
        // Idempotent; it's fine if no rows match.
        let query = "UPDATE sessions SET active = FALSE, logout_at = NOW() WHERE token = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                StoreError::unavailable(
                    anyhow::Error::new(err).context("failed to invalidate session"),
                )
            })?;
        Ok(())
    }

    async fn restore_subject(&self, token: &str, subject: SubjectId) -> Result<(), StoreError> {
        let query = "UPDATE sessions SET subject = $2 WHERE token = $1 AND subject IS NULL";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token)
            .bind(subject.as_string())
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                StoreError::unavailable(
                    anyhow::Error::new(err).context("failed to restore session subject"),
                )
            })?;
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let query = format!(
            r"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE active AND expires_at > NOW()
            ORDER BY created_at DESC
        "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = "SELECT FROM sessions WHERE active"
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                StoreError::unavailable(
                    anyhow::Error::new(err).context("failed to list active sessions"),
                )
            })?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let span = tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|err| {
                StoreError::unavailable(
                    anyhow::Error::new(err).context("failed to acquire connection"),
                )
            })?;
        conn.ping().instrument(span).await.map_err(|err| {
            StoreError::unavailable(anyhow::Error::new(err).context("failed to ping database"))
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (development mode and tests)
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record verbatim, bypassing `create`. Lets tests stage expired
    /// or corrupted records the way a desynced backend would leave them.
    pub async fn insert_raw(&self, record: SessionRecord) {
        self.sessions
            .write()
            .await
            .insert(record.token.clone(), record);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, new: NewSession) -> Result<SessionRecord, StoreError> {
        let token = new_session_token().map_err(StoreError::unavailable)?;
        let now = now_unix();
        let record = SessionRecord {
            token: token.clone(),
            subject: Some(new.subject),
            admin_marker: new.subject.is_admin(),
            fingerprint: new.fingerprint,
            user_agent: new.user_agent,
            ip: new.ip,
            created_at_unix: now,
            last_activity_unix: now,
            expires_at_unix: now + new.ttl_seconds,
            active: true,
            logout_at_unix: None,
        };
        self.sessions.write().await.insert(token, record.clone());
        Ok(record)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.read().await.get(token).cloned())
    }

    async fn find_active_by_subject(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let now = now_unix();
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|record| record.subject.as_ref() == Some(subject) && record.is_live(now))
            .max_by_key(|record| record.created_at_unix)
            .cloned())
    }

    async fn touch(&self, token: &str) {
        if let Some(record) = self.sessions.write().await.get_mut(token) {
            record.last_activity_unix = now_unix();
        }
    }

    async fn invalidate(&self, token: &str) -> Result<(), StoreError> {
        if let Some(record) = self.sessions.write().await.get_mut(token) {
            record.active = false;
            record.logout_at_unix = Some(now_unix());
        }
        Ok(())
    }

    async fn restore_subject(&self, token: &str, subject: SubjectId) -> Result<(), StoreError> {
        if let Some(record) = self.sessions.write().await.get_mut(token) {
            if record.subject.is_none() {
                record.subject = Some(subject);
            }
        }
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let now = now_unix();
        let mut sessions: Vec<SessionRecord> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|record| record.is_live(now))
            .cloned()
            .collect();
        sessions.sort_by_key(|record| std::cmp::Reverse(record.created_at_unix));
        Ok(sessions)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use uuid::Uuid;

    fn new_session(subject: SubjectId) -> NewSession {
        NewSession {
            subject,
            fingerprint: "fp".to_string(),
            user_agent: "ua".to_string(),
            ip: "203.0.113.9".to_string(),
            ttl_seconds: 60,
        }
    }

    #[tokio::test]
    async fn create_then_find_round_trips() -> Result<()> {
        let store = MemorySessionStore::new();
        let subject = SubjectId::User(Uuid::new_v4());
        let record = store.create(new_session(subject)).await?;

        let found = store
            .find_by_token(&record.token)
            .await?
            .context("session should exist")?;
        assert_eq!(found.subject, Some(subject));
        assert!(found.active);
        assert!(!found.admin_marker);
        Ok(())
    }

    #[tokio::test]
    async fn admin_sessions_carry_admin_marker() -> Result<()> {
        let store = MemorySessionStore::new();
        let record = store.create(new_session(SubjectId::Admin)).await?;
        assert!(record.admin_marker);
        Ok(())
    }

    #[tokio::test]
    async fn expired_sessions_are_absent_by_subject() -> Result<()> {
        let store = MemorySessionStore::new();
        let subject = SubjectId::User(Uuid::new_v4());
        let record = store.create(new_session(subject)).await?;

        // Backdate the expiry without deleting the row.
        let mut expired = record.clone();
        expired.expires_at_unix = now_unix() - 1;
        store.insert_raw(expired).await;

        assert!(store.find_active_by_subject(&subject).await?.is_none());
        // The raw row is still physically present.
        assert!(store.find_by_token(&record.token).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_clears_active_and_sets_logout() -> Result<()> {
        let store = MemorySessionStore::new();
        let subject = SubjectId::User(Uuid::new_v4());
        let record = store.create(new_session(subject)).await?;

        store.invalidate(&record.token).await?;
        let found = store
            .find_by_token(&record.token)
            .await?
            .context("session should exist")?;
        assert!(!found.active);
        assert!(found.logout_at_unix.is_some());
        assert!(store.find_active_by_subject(&subject).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn restore_subject_only_fills_missing_marker() -> Result<()> {
        let store = MemorySessionStore::new();
        let user = SubjectId::User(Uuid::new_v4());
        let record = store.create(new_session(user)).await?;

        // A healthy record keeps its subject.
        store.restore_subject(&record.token, SubjectId::Admin).await?;
        let found = store
            .find_by_token(&record.token)
            .await?
            .context("session should exist")?;
        assert_eq!(found.subject, Some(user));

        // A corrupted record gets repaired.
        let mut corrupt = record.clone();
        corrupt.token = "corrupt-token".to_string();
        corrupt.subject = None;
        store.insert_raw(corrupt).await;
        store
            .restore_subject("corrupt-token", SubjectId::Admin)
            .await?;
        let repaired = store
            .find_by_token("corrupt-token")
            .await?
            .context("session should exist")?;
        assert_eq!(repaired.subject, Some(SubjectId::Admin));
        Ok(())
    }

    #[tokio::test]
    async fn active_sessions_skips_dead_rows() -> Result<()> {
        let store = MemorySessionStore::new();
        let live = store
            .create(new_session(SubjectId::User(Uuid::new_v4())))
            .await?;
        let dead = store
            .create(new_session(SubjectId::User(Uuid::new_v4())))
            .await?;
        store.invalidate(&dead.token).await?;

        let sessions = store.active_sessions().await?;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].token, live.token);
        Ok(())
    }
}
