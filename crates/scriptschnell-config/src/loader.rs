// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority.  Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/scriptschnell/config.yaml"));
    paths.push(PathBuf::from("/etc/scriptschnell/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/scriptschnell/config.yaml"));
        paths.push(home.join(".config/scriptschnell/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("scriptschnell/config.yaml"));
        paths.push(cfg.join("scriptschnell/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".scriptschnell/config.yaml"));
    paths.push(PathBuf::from(".scriptschnell/config.yml"));
    paths.push(PathBuf::from(".scriptschnell.yaml"));
    paths.push(PathBuf::from(".scriptschnell.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files, then applying
/// environment overrides.  The `extra` argument may provide an explicit path
/// supplied by the host application.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Environment variables take precedence over any config file value.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(level) = std::env::var("SCRIPTSCHNELL_LOG_LEVEL") {
        if !level.is_empty() {
            config.log.level = Some(level);
        }
    }
    if let Ok(path) = std::env::var("SCRIPTSCHNELL_LOG_PATH") {
        if !path.is_empty() {
            config.log.path = Some(path);
        }
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x: 1");
        let src = val("x: 2");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val("a: 1\nb: 2");
        let src = val("b: 99");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["a"].as_i64(), Some(1));
        assert_eq!(dst["b"].as_i64(), Some(99));
    }

    #[test]
    fn merge_nested_tables() {
        let mut dst = val("model:\n  provider: openai\n  name: gpt-4o");
        let src = val("model:\n  name: gpt-4o-mini");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["model"]["provider"].as_str(), Some("openai"));
        assert_eq!(dst["model"]["name"].as_str(), Some("gpt-4o-mini"));
    }

    #[test]
    fn load_returns_error_when_explicit_path_missing() {
        let result = load(Some(Path::new("/tmp/scriptschnell_no_such_config.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "model:\n  provider: anthropic\n  name: test-model").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.model.provider, "anthropic");
        assert_eq!(cfg.model.name, "test-model");
    }

    #[test]
    fn env_log_level_beats_config_file() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "log:\n  level: warn").unwrap();
        std::env::set_var("SCRIPTSCHNELL_LOG_LEVEL", "trace");
        let cfg = load(Some(f.path())).unwrap();
        std::env::remove_var("SCRIPTSCHNELL_LOG_LEVEL");
        assert_eq!(cfg.log.level.as_deref(), Some("trace"));
    }

    #[test]
    fn empty_env_var_does_not_clear_config_value() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "log:\n  path: /var/log/scriptschnell.log").unwrap();
        std::env::set_var("SCRIPTSCHNELL_LOG_PATH", "");
        let cfg = load(Some(f.path())).unwrap();
        std::env::remove_var("SCRIPTSCHNELL_LOG_PATH");
        assert_eq!(cfg.log.path.as_deref(), Some("/var/log/scriptschnell.log"));
    }
}
