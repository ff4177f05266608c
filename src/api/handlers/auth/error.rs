//! Auth failure taxonomy and its HTTP mapping.
//!
//! Every rejection the gate or the credential verifier can produce is one of
//! these variants. Callers never see raw store errors; `StoreUnavailable` is
//! the only 500-class variant and is kept distinct from "no session".

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use super::session_store::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    /// No session identifier in the request.
    #[error("Authentication required")]
    NoSession,
    /// Session is gone, inactive, expired, or never completed its binding.
    #[error("Session expired, please sign in again")]
    SessionExpired,
    /// Presented token superseded by a newer login, or fingerprint changed.
    #[error("Session is no longer valid for this device")]
    DeviceMismatch,
    /// Session points at a user that no longer exists.
    #[error("Session expired, please sign in again")]
    UserNotFound,
    /// Account is blocked or deleted.
    #[error("Account is disabled")]
    Forbidden,
    /// Login failure; deliberately identical for unknown user and bad password.
    #[error("Invalid username or password")]
    InvalidCredentials,
    /// Backing store unreachable; not an authentication decision.
    #[error("Session storage unavailable")]
    StoreUnavailable(#[source] anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable code; clients hard-logout on the 401 codes.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::SessionExpired => "session_expired",
            Self::DeviceMismatch => "device_mismatch",
            Self::UserNotFound => "user_not_found",
            Self::Forbidden => "forbidden",
            Self::InvalidCredentials => "invalid_credentials",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NoSession
            | Self::SessionExpired
            | Self::DeviceMismatch
            | Self::UserNotFound
            | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        let StoreError::Unavailable(inner) = err;
        Self::StoreUnavailable(inner)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::StoreUnavailable(ref err) = self {
            tracing::error!("Session store unavailable: {err}");
        }
        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::AuthError;
    use axum::http::StatusCode;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(AuthError::NoSession.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::SessionExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::DeviceMismatch.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::UserNotFound.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AuthError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::StoreUnavailable(anyhow::anyhow!("down")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn credential_failure_message_is_generic() {
        // Unknown user and wrong password must be indistinguishable.
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "Invalid username or password"
        );
    }
}
