//! Log setup. The terminal UI owns stdout, so logs go to a file.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` wins over the configured level.
pub fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn build_subscriber(
    log_file: File,
    default_level: &str,
) -> impl tracing::Subscriber + Send + Sync {
    let fmt_layer = fmt::layer()
        .with_writer(Arc::new(log_file))
        .with_ansi(false);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(build_filter(default_level))
}

pub fn init(log_path: &Path, default_level: &str) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let log_file = File::options()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("opening log file {:?}", log_path))?;
    build_subscriber(log_file, default_level)
        .try_init()
        .context("installing log subscriber")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn writes_events_at_or_above_level() {
        let log_file = NamedTempFile::new().unwrap();
        let subscriber = build_subscriber(log_file.reopen().unwrap(), "warn");
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("quiet message");
            tracing::warn!("loud message");
        });
        let contents = fs::read_to_string(log_file.path()).unwrap();
        assert!(contents.contains("loud message"));
        if std::env::var("RUST_LOG").is_err() {
            assert!(!contents.contains("quiet message"));
        }
    }
}
