use crate::api::{self, StoreBackend, handlers::auth::AdminCredentials};
use anyhow::Result;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub memory_store: bool,
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub admin_username: String,
    pub admin_password: SecretString,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the storage backend is misconfigured or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let backend = match (args.memory_store, args.dsn) {
        (true, _) => StoreBackend::Memory,
        (false, Some(dsn)) => StoreBackend::Postgres { dsn },
        (false, None) => {
            return Err(anyhow::anyhow!(
                "a database DSN is required unless --memory-store is set"
            ));
        }
    };

    let auth_config = api::handlers::auth::AuthConfig::new(args.frontend_base_url)
        .with_session_ttl_seconds(args.session_ttl_seconds);

    let admin = AdminCredentials::new(args.admin_username, args.admin_password);

    api::new(args.port, backend, auth_config, admin).await
}
