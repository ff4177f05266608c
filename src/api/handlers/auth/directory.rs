//! Narrow interface to the storefront's user store.
//!
//! User CRUD, wallets, and purchases live elsewhere; the auth layer only
//! needs lookup, the device binding, and the balance field the admin panel
//! adjusts. Both a Postgres implementation and an in-memory one exist so the
//! gate can be exercised without a database.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::Instrument;
use uuid::Uuid;

use super::session_store::StoreError;

/// The single-device binding recorded on a user at login time.
///
/// `session_token` identifies the one session allowed to act for this user;
/// `fingerprint` pins that session to the device it was minted on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceBinding {
    pub session_token: String,
    pub fingerprint: String,
}

#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub is_blocked: bool,
    pub is_deleted: bool,
    pub balance_cents: i64,
    pub binding: Option<DeviceBinding>,
}

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(UserRecord),
    Conflict,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn create(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<CreateOutcome, StoreError>;
    /// Overwrite (or clear) the user's device binding.
    async fn set_binding(
        &self,
        id: Uuid,
        binding: Option<DeviceBinding>,
    ) -> Result<(), StoreError>;
    /// Set the wallet balance, returning the previous value, or `None` when
    /// the user does not exist. Ledger arithmetic happens elsewhere.
    async fn set_balance(&self, id: Uuid, balance_cents: i64)
        -> Result<Option<i64>, StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

const USER_COLUMNS: &str = r"
    id,
    username,
    password_hash,
    is_admin,
    is_blocked,
    is_deleted,
    balance_cents,
    binding_session_token,
    binding_fingerprint
";

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> UserRecord {
    let token: Option<String> = row.get("binding_session_token");
    let fingerprint: Option<String> = row.get("binding_fingerprint");
    let binding = match (token, fingerprint) {
        (Some(session_token), Some(fingerprint)) => Some(DeviceBinding {
            session_token,
            fingerprint,
        }),
        _ => None,
    };
    UserRecord {
        id: row.get("id"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        is_admin: row.get("is_admin"),
        is_blocked: row.get("is_blocked"),
        is_deleted: row.get("is_deleted"),
        balance_cents: row.get("balance_cents"),
        binding,
    }
}

fn unavailable(err: sqlx::Error, what: &'static str) -> StoreError {
    StoreError::Unavailable(anyhow::Error::new(err).context(what))
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 LIMIT 1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = "SELECT FROM users WHERE id"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| unavailable(err, "failed to lookup user by id"))?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1 LIMIT 1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = "SELECT FROM users WHERE username"
        );
        let row = sqlx::query(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| unavailable(err, "failed to lookup user by username"))?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn create(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<CreateOutcome, StoreError> {
        let query = format!(
            r"
            INSERT INTO users (username, password_hash)
            VALUES ($1, $2)
            RETURNING {USER_COLUMNS}
        "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = "INSERT INTO users"
        );
        let result = sqlx::query(&query)
            .bind(username)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(row) => Ok(CreateOutcome::Created(row_to_user(&row))),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().is_some_and(|code| code.as_ref() == "23505") =>
            {
                Ok(CreateOutcome::Conflict)
            }
            Err(err) => Err(unavailable(err, "failed to insert user")),
        }
    }

    async fn set_binding(
        &self,
        id: Uuid,
        binding: Option<DeviceBinding>,
    ) -> Result<(), StoreError> {
        let query = r"
            UPDATE users
            SET binding_session_token = $2,
                binding_fingerprint = $3
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = "UPDATE users SET binding"
        );
        let (token, fingerprint) = match binding {
            Some(binding) => (Some(binding.session_token), Some(binding.fingerprint)),
            None => (None, None),
        };
        sqlx::query(query)
            .bind(id)
            .bind(token)
            .bind(fingerprint)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| unavailable(err, "failed to update device binding"))?;
        Ok(())
    }

    async fn set_balance(
        &self,
        id: Uuid,
        balance_cents: i64,
    ) -> Result<Option<i64>, StoreError> {
        // RETURNING the old value needs a self-join; a CTE keeps it one round trip.
        let query = r"
            WITH previous AS (
                SELECT balance_cents FROM users WHERE id = $1
            )
            UPDATE users
            SET balance_cents = $2
            FROM previous
            WHERE users.id = $1
            RETURNING previous.balance_cents AS previous_cents
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = "UPDATE users SET balance_cents"
        );
        let row = sqlx::query(query)
            .bind(id)
            .bind(balance_cents)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| unavailable(err, "failed to update balance"))?;
        Ok(row.map(|row| row.get("previous_cents")))
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (development mode and tests)
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<Uuid, UserRecord>>,
}

impl MemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record verbatim; lets tests stage blocked or deleted users.
    pub async fn insert_raw(&self, user: UserRecord) {
        self.users.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn create(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<CreateOutcome, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|user| user.username == username) {
            return Ok(CreateOutcome::Conflict);
        }
        let user = UserRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            is_admin: false,
            is_blocked: false,
            is_deleted: false,
            balance_cents: 0,
            binding: None,
        };
        users.insert(user.id, user.clone());
        Ok(CreateOutcome::Created(user))
    }

    async fn set_binding(
        &self,
        id: Uuid,
        binding: Option<DeviceBinding>,
    ) -> Result<(), StoreError> {
        match self.users.write().await.get_mut(&id) {
            Some(user) => {
                user.binding = binding;
                Ok(())
            }
            None => Err(StoreError::Unavailable(anyhow!("unknown user: {id}"))),
        }
    }

    async fn set_balance(
        &self,
        id: Uuid,
        balance_cents: i64,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self.users.write().await.get_mut(&id).map(|user| {
            let previous = user.balance_cents;
            user.balance_cents = balance_cents;
            previous
        }))
    }
}
