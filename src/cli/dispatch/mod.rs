//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_MEMORY_STORE, ARG_PORT};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    // Validate storage backend arguments before anything else
    crate::cli::commands::validate(matches).map_err(|e| anyhow::anyhow!(e))?;

    let memory_store = matches.get_flag(ARG_MEMORY_STORE);
    let dsn = matches.get_one::<String>(ARG_DSN).cloned();

    let frontend_base_url = matches
        .get_one::<String>("frontend-base-url")
        .cloned()
        .context("missing required argument: --frontend-base-url")?;

    let session_ttl_seconds = matches
        .get_one::<i64>("session-ttl-seconds")
        .copied()
        .unwrap_or(604_800);

    let admin_username = matches
        .get_one::<String>("admin-username")
        .cloned()
        .context("missing required argument: --admin-username")?;

    let admin_password = matches
        .get_one::<String>("admin-password")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --admin-password")?;

    Ok(Action::Server(Args {
        port,
        dsn,
        memory_store,
        frontend_base_url,
        session_ttl_seconds,
        admin_username,
        admin_password,
    }))
}
