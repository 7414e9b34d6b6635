//! Tracing setup shared by the CLI and the daemon (feature `tracing-init`).
//!
//! The filter comes from `ZEKE_LOG_LEVEL` (falling back to `RUST_LOG`, then
//! `info`). `init_tracing_with_file` adds a daily-rolling file layer under
//! the state directory for daemon runs; the returned guard must be held for
//! the process lifetime or buffered lines are lost.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter() -> EnvFilter {
    let level = std::env::var("ZEKE_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Stderr-only tracing for one-shot CLI commands.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// Stderr plus rolling file under `dir` (used by `zeke serve`). Returns the
/// appender guard; drop it only at process exit.
pub fn init_tracing_with_file(dir: &std::path::Path) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, "zeke.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init();
    Ok(guard)
}
