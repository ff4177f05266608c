//! Admin panel endpoints: session overview and balance adjustment.

use axum::{
    Json,
    extract::{ConnectInfo, Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::auth::audit::AuditEvent;
use super::auth::device::token_digest;
use super::auth::gate::require_admin;
use super::auth::types::{BalanceRequest, BalanceResponse, SessionListResponse, SessionSummary};
use super::auth::{AuditSink, AuthState, SessionRecord, SessionStore, UserDirectory};

// Raw user-agents, IPs, and tokens stay out of the overview; only digests
// and timestamps leave the store.
fn summarize(record: &SessionRecord) -> SessionSummary {
    SessionSummary {
        token_digest: token_digest(&record.token),
        subject: record.subject.map(|subject| subject.as_string()),
        is_admin: record.admin_marker,
        fingerprint: record.fingerprint.clone(),
        created_at_unix: record.created_at_unix,
        last_activity_unix: record.last_activity_unix,
        expires_at_unix: record.expires_at_unix,
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/sessions",
    responses(
        (status = 200, description = "All live sessions.", body = SessionListResponse),
        (status = 401, description = "Missing or invalid session.", body = super::auth::types::ErrorResponse),
        (status = 403, description = "Not an admin.", body = super::auth::types::ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    if let Err(err) = require_admin(&headers, peer, &auth_state).await {
        return err.into_response();
    }

    match auth_state.sessions().active_sessions().await {
        Ok(records) => {
            let response = SessionListResponse {
                sessions: records.iter().map(summarize).collect(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => {
            error!("Failed to list sessions: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/admin/users/{id}/balance",
    params(("id" = String, Path, description = "User id")),
    request_body = BalanceRequest,
    responses(
        (status = 200, description = "Balance updated.", body = BalanceResponse),
        (status = 400, description = "Invalid user id or amount."),
        (status = 401, description = "Missing or invalid session.", body = super::auth::types::ErrorResponse),
        (status = 403, description = "Not an admin.", body = super::auth::types::ErrorResponse),
        (status = 404, description = "User not found."),
    ),
    tag = "admin"
)]
pub async fn set_balance(
    Path(id): Path<String>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<BalanceRequest>,
) -> impl IntoResponse {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    if let Err(err) = require_admin(&headers, peer, &auth_state).await {
        return err.into_response();
    }

    let Ok(user_id) = Uuid::parse_str(id.trim()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if request.balance_cents < 0 {
        return StatusCode::BAD_REQUEST.into_response();
    }

    match auth_state
        .users()
        .set_balance(user_id, request.balance_cents)
        .await
    {
        Ok(Some(previous_cents)) => {
            auth_state.audit().record(AuditEvent::BalanceAdjusted {
                user: user_id,
                previous_cents,
                new_cents: request.balance_cents,
            });
            let response = BalanceResponse {
                user_id: user_id.to_string(),
                previous_cents,
                balance_cents: request.balance_cents,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to set balance: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
