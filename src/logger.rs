//! Tracing subscriber bootstrap.
//!
//! A single `init()` entrypoint rather than the teacher's `Logger` trait
//! object: the teacher's engine threads a `Box<dyn Logger>` through
//! long-lived task handles so its CLI frontend can swap log sinks at
//! runtime; this crate has one process-wide subscriber installed once at
//! startup, so a plain function is enough.

use tracing_subscriber::EnvFilter;

use crate::config::color_output_enabled;

pub fn init(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(color_output_enabled())
        .with_target(true)
        .init();
}
