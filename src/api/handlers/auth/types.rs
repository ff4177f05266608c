//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Returned by login and register; the session token itself travels in the
/// cookie (and is echoed for bearer-style clients).
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub subject: String,
    pub is_admin: bool,
    pub token: String,
    pub expires_at_unix: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub subject: String,
    pub is_admin: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub id: String,
    pub username: String,
    pub balance_cents: i64,
    pub is_admin: bool,
}

/// One row of the admin session overview: fingerprint and token digests plus
/// timestamps. Raw tokens, user-agents, and IPs never leave the store.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionSummary {
    pub token_digest: String,
    pub subject: Option<String>,
    pub is_admin: bool,
    pub fingerprint: String,
    pub created_at_unix: i64,
    pub last_activity_unix: i64,
    pub expires_at_unix: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct BalanceRequest {
    pub balance_cents: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct BalanceResponse {
    pub user_id: String,
    pub previous_cents: i64,
    pub balance_cents: i64,
}

/// Error envelope shared by all auth rejections.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
