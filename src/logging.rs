use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_RETENTION_DAYS: u64 = 7;
const LOG_FILE_PREFIX: &str = "skillgate";

/// Initialise tracing: compact stdout layer (suppressed for hook commands,
/// whose stdout/stderr are part of the exit-code contract) plus a daily
/// rolling file layer under `~/.skillgate/logs/`. Stale rolled files are
/// swept once the subscriber is up, so sweep failures land in the log.
pub fn setup_tracing(level: Option<&str>, with_stdout: bool) -> Result<PathBuf> {
    let log_dir = crate::paths::logs_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD
        .set(guard)
        .map_err(|_| anyhow!("Logging already initialized. Cannot setup logging multiple times."))?;

    // Second-level timestamp precision to keep logs readable.
    let time_format = ChronoUtc::new("%Y-%m-%dT%H:%M:%S".to_string());

    let stdout_layer = if with_stdout {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .compact()
                .with_timer(time_format.clone())
                .boxed(),
        )
    } else {
        None
    };

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .compact()
        .with_timer(time_format);

    let default_filter = || {
        let base = level.unwrap_or("info");
        EnvFilter::new(format!("skillgate={level},sgate={level}", level = base))
    };

    // When level is explicitly set, override RUST_LOG; otherwise, use RUST_LOG first, then default.
    let filter = if let Some(level) = level {
        EnvFilter::try_new(format!("skillgate={level},sgate={level}"))
            .unwrap_or_else(|_| default_filter())
    } else {
        match EnvFilter::try_from_default_env() {
            Ok(env_filter) => env_filter,
            Err(_) => default_filter(),
        }
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    match sweep_stale_logs(&log_dir, DEFAULT_RETENTION_DAYS) {
        Ok(0) => {}
        Ok(removed) => debug!(removed, "swept stale log files"),
        Err(e) => warn!("log sweep failed for {}: {e}", log_dir.display()),
    }

    Ok(log_dir)
}

/// Delete rolled `skillgate.*` files whose mtime is at or past the retention
/// cutoff. Per-file failures are logged and skipped; only an unreadable
/// directory aborts the sweep. Returns how many files were removed.
fn sweep_stale_logs(log_dir: &Path, retention_days: u64) -> std::io::Result<usize> {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(60 * 60 * 24 * retention_days.max(1)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0usize;
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                warn!("log sweep: cannot stat {name}: {e}");
                continue;
            }
        };
        if modified > cutoff {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!("log sweep: cannot remove {name}: {e}"),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_removes_only_stale_prefixed_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("skillgate.2020-01-01");
        let fresh = dir.path().join("skillgate.2099-01-01");
        let other = dir.path().join("unrelated.2020-01-01");
        for p in [&stale, &fresh, &other] {
            std::fs::write(p, "log line").unwrap();
        }
        let old = SystemTime::now() - Duration::from_secs(60 * 60 * 24 * 30);
        for p in [&stale, &other] {
            let f = std::fs::File::options().write(true).open(p).unwrap();
            f.set_modified(old).unwrap();
        }

        let removed = sweep_stale_logs(dir.path(), 7).unwrap();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_sweep_missing_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sweep_stale_logs(&dir.path().join("nope"), 7).is_err());
    }
}
