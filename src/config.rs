//! Process configuration, loaded from the environment.
//!
//! Kept as a plain struct with a `from_env` constructor, in the teacher's
//! style of avoiding a heavyweight config-file framework for a handful of
//! environment-driven knobs.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub log_level: String,
    pub worker_count: usize,
    pub worker_poll_interval: Duration,
    pub job_lease_threshold: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string()),
            log_level: env::var("LOG_LEVEL").or_else(|_| env::var("RUST_LOG")).unwrap_or_else(|_| "info".to_string()),
            worker_count: env::var("WORKER_COUNT").ok().and_then(|v| v.parse().ok()).unwrap_or(4),
            worker_poll_interval: Duration::from_millis(
                env::var("WORKER_POLL_INTERVAL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(500),
            ),
            job_lease_threshold: Duration::from_secs(
                env::var("JOB_LEASE_THRESHOLD_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(900),
            ),
        }
    }
}

/// Whether color output should be enabled: `NO_COLOR` is unset and stderr
/// is attached to a TTY.
pub fn color_output_enabled() -> bool {
    use std::io::IsTerminal;
    env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal()
}
