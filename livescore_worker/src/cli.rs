use std::{env, env::VarError};

use crate::database_url::DatabaseUrl;

/// Variables listed by `--help`. `LSW_DATABASE_URL` is handled separately, since it carries credentials.
const DISPLAY_ENVS: [&str; 13] = [
    "RUST_LOG",
    "LSW_DB_MAX_CONNECTIONS",
    "LSW_DB_ACQUIRE_TIMEOUT_SECS",
    "LSW_POOL_WARN_THRESHOLD",
    "LSW_POOL_CRITICAL_THRESHOLD",
    "LSW_POOL_SAMPLE_SECS",
    "LSW_WATCHDOG_INTERVAL_SECS",
    "LSW_WATCHDOG_STALE_MINUTES",
    "LSW_MINUTE_ENGINE_INTERVAL_SECS",
    "LSW_JOB_HISTORY_RETENTION_DAYS",
    "LSW_DISABLED_JOBS",
    "LSW_SKIP_MIGRATIONS",
    "LSW_TEST_DATABASE_URL",
];

/// The worker takes no arguments. Any argument prints the help text and the current configuration.
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        println!("\n{}\n", include_str!("./cli-help.txt"));
        println!("Current environment values (passwords masked):");
        for (name, value) in current_env() {
            println!("  {name:<35} {value}");
        }
    }
    has_cli_args
}

fn current_env() -> Vec<(&'static str, String)> {
    let database_url = describe_database_url(env::var("LSW_DATABASE_URL"));
    let mut values = vec![("LSW_DATABASE_URL", database_url)];
    values.extend(DISPLAY_ENVS.iter().map(|&name| (name, describe(env::var(name)))));
    values
}

fn describe(value: Result<String, VarError>) -> String {
    match value {
        Ok(s) => s,
        Err(VarError::NotPresent) => "Not set".into(),
        Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
    }
}

fn describe_database_url(value: Result<String, VarError>) -> String {
    match value {
        Ok(raw) => match DatabaseUrl::parse(&raw) {
            Ok(url) => url.redacted(),
            Err(_) => "Invalid value (hidden)".into(),
        },
        Err(VarError::NotPresent) => "Not set".into(),
        Err(VarError::NotUnicode(_)) => "Invalid value (hidden)".into(),
    }
}
