// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use crate::authorize::AuthKind;

/// A single tool invocation as decoded from the model: the raw argument
/// JSON string is parsed by the executor, not here, so unrecognized fields
/// survive round trips through providers that echo tool calls verbatim.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Opaque identifier returned by the model (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

impl ToolInvocation {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// The result of executing a tool: either a result payload or an error
/// message.  Tool errors are non-fatal to the turn — the model sees them
/// and may adjust.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub result: String,
    pub error: Option<String>,
    /// Set when secret redaction replaced part of the result.
    pub redacted: bool,
}

impl ToolResult {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            error: None,
            redacted: false,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            result: String::new(),
            error: Some(msg.into()),
            redacted: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The text recorded on the tool message: the error when present,
    /// otherwise the result.
    pub fn text(&self) -> &str {
        self.error.as_deref().unwrap_or(&self.result)
    }
}

/// Trait that every built-in and host-registered tool implements.
///
/// Tools never reference the orchestrator; runtime dependencies (filesystem,
/// HTTP) are bound at construction by the registering code.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    /// The authorization gate for this call, if any: the kind and subject
    /// to present to the authorizer (e.g. the command line, the domain).
    fn authorization(&self, _params: &Value) -> Option<(AuthKind, String)> {
        None
    }
    /// Execute with parsed parameters.  Failures are reported through
    /// [`ToolResult::err`], not panics.
    async fn execute(&self, params: &Value) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
