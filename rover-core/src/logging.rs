//! Logging setup shared by every binary: an `EnvFilter`-driven stderr layer
//! plus a rotating, append-only file layer under `log_dir`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing for a binary. `default_directive` is used when
/// `RUST_LOG` is unset (e.g. `"rover_orchestratord=info"`).
///
/// The returned guard must be kept alive for the process lifetime — dropping
/// it stops the background writer thread that flushes the rotating log file.
pub fn init(component: &str, log_dir: &str, default_directive: &str) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let file_appender = tracing_appender::rolling::daily(log_dir, format!("{component}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    guard
}
