//! Diagnostic log sink, installed only when `--logging` is passed.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "typecast.log";
const DEFAULT_DIRECTIVE: &str = "typecast=debug";

/// Filter from `RUST_LOG`, falling back to debug output for this crate.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Log to `dir/typecast.log` (truncated on start) and stderr.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the background writer. Returns `None` if a global
/// subscriber was already installed.
pub fn init(dir: &Path) -> Option<WorkerGuard> {
    let log_path = dir.join(LOG_FILE);
    if log_path.exists() {
        let _ = std::fs::remove_file(&log_path);
    }

    let file_appender = tracing_appender::rolling::never(dir, LOG_FILE);
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(nb_writer.and(std::io::stderr))
        .try_init()
        .ok()
        .map(|()| guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_targets_this_crate() {
        // RUST_LOG may be set by the harness; only check the fallback parses.
        let filter = EnvFilter::new(DEFAULT_DIRECTIVE);
        assert!(filter.to_string().contains("typecast=debug"));
    }
}
