//! Registration and the two login paths.
//!
//! A successful user login replaces the previous device binding outright:
//! the old session is marked inactive and the user record points at the new
//! token/fingerprint pair. Admin logins mint sessions without any binding,
//! so several admin devices can be live at once.

use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use regex::Regex;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

use super::audit::{AuditEvent, AuditSink};
use super::device::{fingerprint, resolve_client_ip, resolve_user_agent};
use super::directory::{CreateOutcome, DeviceBinding, UserDirectory, UserRecord};
use super::error::AuthError;
use super::session::session_cookie;
use super::session_store::{NewSession, SessionRecord, SessionStore};
use super::state::AuthState;
use super::subject::SubjectId;
use super::types::{LoginRequest, LoginResponse, MeResponse, RegisterRequest};
use super::verifier::{hash_password, verify_user};

fn valid_username(username: &str) -> bool {
    Regex::new(r"^[a-zA-Z0-9_.-]{3,32}$").is_ok_and(|regex| regex.is_match(username))
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = MeResponse),
        (status = 400, description = "Invalid username or password"),
        (status = 409, description = "Username already taken")
    ),
    tag = "auth"
)]
pub async fn register(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<RegisterRequest>,
) -> impl IntoResponse {
    let username = request.username.trim();
    if !valid_username(username) || request.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_request",
                "message": "username must be 3-32 characters; password must not be empty"
            })),
        )
            .into_response();
    }

    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match auth_state.users().create(username, &password_hash).await {
        Ok(CreateOutcome::Created(user)) => {
            let response = MeResponse {
                id: user.id.to_string(),
                username: user.username,
                balance_cents: user.balance_cents,
                is_admin: user.is_admin,
            };
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Ok(CreateOutcome::Conflict) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": "username_taken",
                "message": "username already taken"
            })),
        )
            .into_response(),
        Err(err) => AuthError::from(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = super::types::ErrorResponse),
        (status = 403, description = "Account blocked", body = super::types::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    let user = match verify_user(auth_state.users(), &request.username, &request.password).await {
        Ok(user) => user,
        Err(failure) => {
            auth_state.audit().record(AuditEvent::LoginFailed {
                admin_path: false,
                username_known: failure.username_known,
            });
            return failure.error.into_response();
        }
    };

    match bind_user_session(&headers, peer, &auth_state, &user).await {
        Ok(record) => {
            auth_state.audit().record(AuditEvent::LoginSucceeded {
                subject: SubjectId::User(user.id).as_string(),
                admin_path: false,
            });
            login_response(&auth_state, SubjectId::User(user.id), false, &record)
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/admin/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = super::types::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn admin_login(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    if !auth_state
        .admin()
        .matches(&request.username, &request.password)
    {
        auth_state.audit().record(AuditEvent::LoginFailed {
            admin_path: true,
            username_known: false,
        });
        // Same generic message as the user path; no admin-specific hints.
        return AuthError::InvalidCredentials.into_response();
    }

    let device = RequestDevice::resolve(&headers, peer);
    let minted = auth_state
        .sessions()
        .create(NewSession {
            subject: SubjectId::Admin,
            fingerprint: device.fingerprint,
            user_agent: device.user_agent,
            ip: device.ip,
            ttl_seconds: auth_state.config().session_ttl_seconds(),
        })
        .await;

    match minted {
        Ok(record) => {
            auth_state.audit().record(AuditEvent::LoginSucceeded {
                subject: SubjectId::Admin.as_string(),
                admin_path: true,
            });
            login_response(&auth_state, SubjectId::Admin, true, &record)
        }
        Err(err) => AuthError::from(err).into_response(),
    }
}

struct RequestDevice {
    fingerprint: String,
    user_agent: String,
    ip: String,
}

impl RequestDevice {
    fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let user_agent = resolve_user_agent(headers);
        let ip = resolve_client_ip(headers, peer);
        Self {
            fingerprint: fingerprint(&user_agent, &ip),
            user_agent,
            ip,
        }
    }
}

/// Mint a session for a verified user and repoint the device binding at it,
/// invalidating whatever session held the binding before.
async fn bind_user_session(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    auth_state: &AuthState,
    user: &UserRecord,
) -> Result<SessionRecord, AuthError> {
    let subject = SubjectId::User(user.id);

    // The store never invalidates on its own; replacing the previous login
    // is this flow's job.
    if let Some(previous) = auth_state.sessions().find_active_by_subject(&subject).await? {
        auth_state.sessions().invalidate(&previous.token).await?;
        auth_state.audit().record(AuditEvent::SessionInvalidated {
            subject: subject.as_string(),
            reason: "superseded by new login",
        });
    }

    let device = RequestDevice::resolve(headers, peer);
    let record = auth_state
        .sessions()
        .create(NewSession {
            subject,
            fingerprint: device.fingerprint.clone(),
            user_agent: device.user_agent,
            ip: device.ip,
            ttl_seconds: auth_state.config().session_ttl_seconds(),
        })
        .await?;

    auth_state
        .users()
        .set_binding(
            user.id,
            Some(DeviceBinding {
                session_token: record.token.clone(),
                fingerprint: device.fingerprint,
            }),
        )
        .await?;

    Ok(record)
}

fn login_response(
    auth_state: &AuthState,
    subject: SubjectId,
    is_admin: bool,
    record: &SessionRecord,
) -> axum::response::Response {
    let body = LoginResponse {
        subject: subject.as_string(),
        is_admin,
        token: record.token.clone(),
        expires_at_unix: record.expires_at_unix,
    };
    let mut response_headers = HeaderMap::new();
    match session_cookie(auth_state, &record.token) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
        }
    }
    (StatusCode::OK, response_headers, Json(body)).into_response()
}
