use axum::{http::StatusCode, response::IntoResponse};

/// Undocumented root; returns the service name so load balancers have
/// something cheap to poke.
pub async fn root() -> impl IntoResponse {
    (StatusCode::OK, env!("CARGO_PKG_NAME"))
}
