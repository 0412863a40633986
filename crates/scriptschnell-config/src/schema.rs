// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so a named function is required for enabled-by-default
/// fields.
fn default_true() -> bool {
    true
}

fn default_max_turns() -> u32 {
    128
}

fn default_investigator_max_turns() -> u32 {
    64
}

fn default_summarization_trigger_ratio() -> f32 {
    0.75
}

fn default_auto_save_interval_secs() -> u64 {
    30
}

fn default_max_concurrent_saves() -> usize {
    1
}

fn default_cache_ttl_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Primary model used for the orchestration role.
    #[serde(default)]
    pub model: ModelConfig,
    /// Cheap, fast model used for summarization and the investigator.
    /// Falls back to `model` when not set.
    #[serde(default)]
    pub summarize_model: Option<ModelConfig>,
    /// Optional model for the planning role.
    #[serde(default)]
    pub planning_model: Option<ModelConfig>,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Optional client-side rate limiting applied to every provider call.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Named provider configurations.
    ///
    /// Define custom endpoints, local models, or additional accounts here and
    /// reference them by name:
    ///
    /// ```yaml
    /// providers:
    ///   my_ollama:
    ///     provider: openai-compatible
    ///     base_url: http://localhost:11434/v1
    ///     name: llama3.2
    /// ```
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "openai" | "anthropic" | "groq" | "mistral" |
    /// "kimi" | "openrouter" | "cerebras" | "ollama" | "openai-compatible"
    pub provider: String,
    /// Model name forwarded to the provider API.  May be left empty; each
    /// provider substitutes a sensible default.
    #[serde(default)]
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local servers and gateways.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).  Ignored for models that do not
    /// support temperature; those always receive 1.
    pub temperature: Option<f32>,
    /// Ask the provider to cache the stable prompt prefix when it supports
    /// explicit cache control.
    #[serde(default = "default_true")]
    pub enable_caching: bool,
    /// Cache TTL in seconds for providers with an explicit TTL tier.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: String::new(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
            enable_caching: true,
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum orchestrator iterations per user turn.
    #[serde(default = "default_max_turns")]
    pub max_orchestrator_turns: u32,
    /// Fraction of the context window at which auto-summarization triggers.
    #[serde(default = "default_summarization_trigger_ratio")]
    pub summarization_trigger_ratio: f32,
    /// Turn budget for the codebase investigator.
    #[serde(default = "default_investigator_max_turns")]
    pub investigator_max_turns: u32,
    /// Stream assistant output token-by-token instead of waiting for the
    /// full completion.
    #[serde(default = "default_true")]
    pub stream: bool,
    /// Extra directories whose content the investigator may search.
    #[serde(default)]
    pub context_dirs: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_orchestrator_turns: default_max_turns(),
            summarization_trigger_ratio: default_summarization_trigger_ratio(),
            investigator_max_turns: default_investigator_max_turns(),
            stream: true,
            context_dirs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Interval between auto-save ticks, in seconds.  0 disables auto-save.
    #[serde(default = "default_auto_save_interval_secs")]
    pub auto_save_interval_secs: u64,
    /// Maximum saves in flight at once.  Ticks that arrive while the cap is
    /// reached are skipped.
    #[serde(default = "default_max_concurrent_saves")]
    pub max_concurrent_saves: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_save_interval_secs: default_auto_save_interval_secs(),
            max_concurrent_saves: default_max_concurrent_saves(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter, e.g. "warn", "debug", "scriptschnell_core=trace".
    /// Overridden by SCRIPTSCHNELL_LOG_LEVEL.
    pub level: Option<String>,
    /// File to append log output to.  Overridden by SCRIPTSCHNELL_LOG_PATH.
    /// When unset, logs go to stderr.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum milliseconds between provider calls.
    #[serde(default)]
    pub min_interval_ms: u64,
    /// Tokens-per-minute budget estimated from request payloads.  0 means
    /// unlimited.
    #[serde(default)]
    pub tokens_per_minute: u64,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
