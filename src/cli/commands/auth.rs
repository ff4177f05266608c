use clap::{Arg, Command};

pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    with_admin_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL, used for CORS and cookie security")
                .env("KEYSTAND_FRONTEND_BASE_URL")
                .default_value("https://keystand.dev"),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session TTL in seconds, fixed at creation (not rolling)")
                .env("KEYSTAND_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_admin_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("admin-username")
                .long("admin-username")
                .help("Fixed admin panel username")
                .env("KEYSTAND_ADMIN_USERNAME")
                .default_value("admin"),
        )
        .arg(
            Arg::new("admin-password")
                .long("admin-password")
                .help("Fixed admin panel password")
                .env("KEYSTAND_ADMIN_PASSWORD")
                .hide_env_values(true),
        )
}
