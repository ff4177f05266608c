//! Authenticated self-service endpoint.

use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

use super::auth::gate::require_user;
use super::auth::subject::SubjectId;
use super::auth::types::MeResponse;
use super::auth::{AuthError, AuthState, UserDirectory};

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Return the authenticated user profile.", body = MeResponse),
        (status = 401, description = "Missing or invalid session.", body = super::auth::types::ErrorResponse),
    ),
    tag = "me"
)]
pub async fn get_me(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    let subject = match require_user(&headers, peer, &auth_state).await {
        Ok(subject) => subject,
        Err(err) => return err.into_response(),
    };

    match subject.id {
        SubjectId::Admin => {
            // The sentinel has no user row; synthesize a minimal profile.
            let response = MeResponse {
                id: subject.id.as_string(),
                username: auth_state.admin().username().to_string(),
                balance_cents: 0,
                is_admin: true,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        SubjectId::User(user_id) => match auth_state.users().find_by_id(user_id).await {
            Ok(Some(user)) => {
                let response = MeResponse {
                    id: user.id.to_string(),
                    username: user.username,
                    balance_cents: user.balance_cents,
                    is_admin: user.is_admin,
                };
                (StatusCode::OK, Json(response)).into_response()
            }
            // The gate already vouched for the user; a miss here is a race.
            Ok(None) => AuthError::UserNotFound.into_response(),
            Err(err) => {
                error!("Failed to fetch /me profile: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
    }
}
