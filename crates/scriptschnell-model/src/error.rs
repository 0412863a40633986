// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Client-layer error taxonomy.
//!
//! The turn loop needs structured errors to decide retries: transient
//! failures are retried once with jittered backoff, auth failures never,
//! and the tool-use auto-heal fires only on its exact precondition.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network timeout, 5xx, or rate limit.  Retried at most once at the
    /// client layer; surfaced otherwise.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// 401/403.  Never retried; blocks further calls with this provider
    /// until the key is updated.
    #[error("invalid API key: {0}")]
    Auth(String),

    /// Malformed JSON or an unknown stream event.  Fatal to the current
    /// turn; the assistant message so far is preserved by the caller.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The provider rejected a tools-carrying request with its
    /// "no endpoints found ... tool use" 4xx.  Recovered silently by one
    /// retry with tools stripped.
    #[error("model does not support tool use: {0}")]
    ToolUseUnsupported(String),

    /// The caller cancelled the request.  No user-visible error.
    #[error("request cancelled")]
    Cancelled,

    /// Anything else the provider returned that fits no category above.
    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Classify an HTTP error response by status code and body.
    pub fn from_status(status: u16, body: &str) -> Self {
        if status == 401 || status == 403 {
            return ProviderError::Auth(format!("status {status}: {body}"));
        }
        if is_tool_use_unsupported_body(status, body) {
            return ProviderError::ToolUseUnsupported(format!("status {status}: {body}"));
        }
        if status == 429 || status >= 500 {
            return ProviderError::Transient(format!("status {status}: {body}"));
        }
        ProviderError::Other(format!("status {status}: {body}"))
    }

    /// Map a transport-level failure.  Timeouts and connection errors are
    /// transient; anything else is surfaced as-is.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ProviderError::Transient(err.to_string())
        } else {
            ProviderError::Other(err.to_string())
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub fn is_tool_use_unsupported(&self) -> bool {
        matches!(self, ProviderError::ToolUseUnsupported(_))
    }
}

/// The auto-heal precondition: a 4xx whose body contains both
/// "no endpoints found" and "tool use", case-insensitive.
pub fn is_tool_use_unsupported_body(status: u16, body: &str) -> bool {
    if !(400..500).contains(&status) {
        return false;
    }
    let lower = body.to_lowercase();
    lower.contains("no endpoints found") && lower.contains("tool use")
}

/// Jittered backoff delay before the single transient retry.
pub fn retry_backoff() -> Duration {
    use rand::Rng;
    let jitter_ms: u64 = rand::thread_rng().gen_range(0..500);
    Duration::from_millis(500 + jitter_ms)
}

/// Result of an API-key validation probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    Valid,
    InvalidKey,
    Network,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
