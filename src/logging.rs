//! Structured logging to stderr. Stdout carries the IPC protocol.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "MARKINGD_LOG";
const LOG_FORMAT_ENV: &str = "MARKINGD_LOG_FORMAT";
const DEFAULT_LEVEL: &str = "info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

pub fn init() {
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter());
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(false),
            )
            .try_init()
    };
    if result.is_ok() {
        tracing::info!(version = env!("CARGO_PKG_VERSION"), json, "logging initialized");
    }
}
