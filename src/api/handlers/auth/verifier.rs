//! Credential verification for the two login paths.
//!
//! Admin credentials are a fixed username/password pair configured out of
//! band; they are compared exactly, with no stored hash. This mirrors the
//! storefront's operator setup and is a documented weak point. User passwords
//! are Argon2id PHC hashes.
//!
//! Verification never writes sessions; minting happens in the login flow.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use super::directory::{UserDirectory, UserRecord};
use super::error::AuthError;

/// Fixed admin panel credentials.
pub struct AdminCredentials {
    username: String,
    password: SecretString,
}

impl AdminCredentials {
    #[must_use]
    pub fn new(username: String, password: SecretString) -> Self {
        Self { username, password }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Exact-string match, compared as digests to keep timing uniform.
    #[must_use]
    pub fn matches(&self, username: &str, password: &str) -> bool {
        let username_ok = digest(username) == digest(&self.username);
        let password_ok = digest(password) == digest(self.password.expose_secret());
        username_ok && password_ok
    }
}

fn digest(value: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}

/// Hash a plaintext password using Argon2id with a random salt.
///
/// Returns the PHC-formatted hash string.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a plaintext password against a stored PHC-formatted hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed_hash = PasswordHash::new(hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Outcome of a user-path login attempt, with the internal distinction the
/// audit log wants but the HTTP response must not leak.
#[derive(Debug)]
pub struct UserLoginFailure {
    pub error: AuthError,
    pub username_known: bool,
}

/// Validate a user-path login attempt.
///
/// Unknown usernames, deleted accounts, and wrong passwords all map to the
/// same generic `InvalidCredentials`; blocked accounts get `Forbidden`.
///
/// # Errors
/// Returns `UserLoginFailure` carrying the outward error plus audit detail.
pub async fn verify_user(
    directory: &dyn UserDirectory,
    username: &str,
    password: &str,
) -> Result<UserRecord, UserLoginFailure> {
    let found = directory.find_by_username(username).await.map_err(|err| {
        UserLoginFailure {
            error: AuthError::from(err),
            username_known: false,
        }
    })?;

    let Some(user) = found.filter(|user| !user.is_deleted) else {
        return Err(UserLoginFailure {
            error: AuthError::InvalidCredentials,
            username_known: false,
        });
    };

    match verify_password(password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return Err(UserLoginFailure {
                error: AuthError::InvalidCredentials,
                username_known: true,
            });
        }
        Err(err) => {
            // A malformed stored hash is a server-side defect, not a bad login.
            return Err(UserLoginFailure {
                error: AuthError::StoreUnavailable(anyhow::anyhow!(
                    "invalid stored password hash: {err}"
                )),
                username_known: true,
            });
        }
    }

    if user.is_blocked {
        return Err(UserLoginFailure {
            error: AuthError::Forbidden,
            username_known: true,
        });
    }

    Ok(user)
}
