//! Session check and logout endpoints, plus the cookie contract.

use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, InvalidHeaderValue, SET_COOKIE},
    },
    response::IntoResponse,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

use super::audit::{AuditEvent, AuditSink};
use super::directory::UserDirectory;
use super::gate::{RouteClass, authenticate};
use super::session_store::SessionStore;
use super::state::AuthState;
use super::subject::SubjectId;
use super::types::SessionResponse;

const SESSION_COOKIE_NAME: &str = "keystand_session";

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is valid", body = SessionResponse),
        (status = 401, description = "No valid session", body = super::types::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    // The check route never repairs corrupted records; it only reports.
    match authenticate(&headers, peer, RouteClass::Check, &auth_state).await {
        Ok(subject) => {
            let response = SessionResponse {
                subject: subject.id.as_string(),
                is_admin: subject.is_admin,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        match auth_state.sessions().find_by_token(&token).await {
            Ok(Some(record)) => {
                // Clear the device binding only when it still points at this
                // session; a newer login elsewhere keeps its own binding.
                if let Some(SubjectId::User(user_id)) = record.subject {
                    match auth_state.users().find_by_id(user_id).await {
                        Ok(Some(user))
                            if user
                                .binding
                                .as_ref()
                                .is_some_and(|binding| binding.session_token == token) =>
                        {
                            if let Err(err) = auth_state.users().set_binding(user_id, None).await {
                                error!("Failed to clear device binding on logout: {err}");
                            }
                        }
                        Ok(_) => {}
                        Err(err) => {
                            error!("Failed to lookup user on logout: {err}");
                        }
                    }
                }
                if let Err(err) = auth_state.sessions().invalidate(&token).await {
                    error!("Failed to invalidate session on logout: {err}");
                } else {
                    auth_state.audit().record(AuditEvent::SessionInvalidated {
                        subject: record
                            .subject
                            .map_or_else(|| "unknown".to_string(), |subject| subject.as_string()),
                        reason: "logout",
                    });
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!("Failed to lookup session on logout: {err}");
            }
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

/// Build a secure `HttpOnly` cookie for the session token.
pub(super) fn session_cookie(
    auth_state: &AuthState,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = auth_state.config().session_ttl_seconds();
    // Only mark cookies secure when the frontend is served over HTTPS.
    let secure = auth_state.config().session_cookie_secure();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(
    auth_config: &super::state::AuthConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = auth_config.session_cookie_secure();
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Pull the session token from the `Authorization: Bearer` header or the
/// session cookie, in that order.
pub(super) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        if let Some((key, val)) = pair.trim().split_once('=') {
            if key.trim() == SESSION_COOKIE_NAME {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::audit::MemoryAuditSink;
    use crate::api::handlers::auth::directory::MemoryUserDirectory;
    use crate::api::handlers::auth::session_store::MemorySessionStore;
    use crate::api::handlers::auth::state::AuthConfig;
    use crate::api::handlers::auth::verifier::AdminCredentials;
    use secrecy::SecretString;

    fn state(frontend: &str) -> AuthState {
        AuthState::new(
            AuthConfig::new(frontend.to_string()),
            AdminCredentials::new("admin".to_string(), SecretString::from("hunter2")),
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryUserDirectory::new()),
            Arc::new(MemoryAuditSink::new()),
        )
    }

    #[test]
    fn cookie_is_secure_only_over_https() {
        let https = state("https://keystand.dev");
        let cookie = session_cookie(&https, "tok").expect("cookie");
        let value = cookie.to_str().expect("ascii");
        assert!(value.contains("keystand_session=tok"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Secure"));

        let http = state("http://localhost:5173");
        let cookie = session_cookie(&http, "tok").expect("cookie");
        assert!(!cookie.to_str().expect("ascii").contains("Secure"));
    }

    #[test]
    fn clear_cookie_zeroes_max_age() {
        let config = AuthConfig::new("https://keystand.dev".to_string());
        let cookie = clear_session_cookie(&config).expect("cookie");
        let value = cookie.to_str().expect("ascii");
        assert!(value.contains("keystand_session=;"));
        assert!(value.contains("Max-Age=0"));
    }

    #[test]
    fn extract_prefers_bearer_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-auth"));
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("keystand_session=from-cookie"),
        );
        assert_eq!(
            extract_session_token(&headers),
            Some("from-auth".to_string())
        );
    }

    #[test]
    fn extract_finds_cookie_among_many() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark; consent; keystand_session=tok; lang=en"),
        );
        assert_eq!(extract_session_token(&headers), Some("tok".to_string()));
    }

    #[test]
    fn extract_rejects_empty_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_session_token(&headers), None);
    }
}
