// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::LogConfig;

/// Initialize global tracing output from the resolved log configuration.
///
/// The `level`/`path` fields already reflect the env-over-file precedence
/// applied by [`crate::load`] (`SCRIPTSCHNELL_LOG_LEVEL` /
/// `SCRIPTSCHNELL_LOG_PATH`).  When no level is configured, `RUST_LOG` is
/// honoured with a fallback of `warn`.  When a path is configured, output is
/// appended to that file with ANSI colours disabled; front-ends that own the
/// terminal (a TUI) rely on this to keep stderr clean.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(log: &LogConfig) {
    let filter = match &log.level {
        Some(level) => EnvFilter::new(level.clone()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    if let Some(path) = &log.path {
        use std::sync::Mutex;
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            let _ = tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .with(filter)
                .try_init();
            return;
        }
    }

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        let cfg = LogConfig {
            level: Some("warn".into()),
            path: None,
        };
        init_logging(&cfg);
        // A second call must not panic even though a subscriber is installed.
        init_logging(&cfg);
    }

    #[test]
    fn init_logging_with_file_path_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schnell.log");
        let cfg = LogConfig {
            level: Some("debug".into()),
            path: Some(path.to_string_lossy().into_owned()),
        };
        init_logging(&cfg);
        assert!(path.exists());
    }
}
