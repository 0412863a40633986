// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

/// A single message in the conversation history.
///
/// Exactly one of the role-specific attribute sets is populated:
/// `tool_calls` only appears on assistant messages, `tool_id`/`tool_name`
/// only on tool messages (echoing the call that produced them).
/// `native_format` carries a provider-verbatim copy of the message, used
/// when a later turn is sent back to the same provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Hidden chain-of-thought text, when the model exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_format: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_provider: Option<String>,
}

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            tool_id: None,
            tool_name: None,
            timestamp: Utc::now(),
            native_format: None,
            native_provider: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::base(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::base(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::base(Role::Assistant, text)
    }

    pub fn assistant_with_tool_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut m = Self::base(Role::Assistant, text);
        m.tool_calls = calls;
        m
    }

    /// Construct the tool-result message replying to the call `id` produced
    /// by tool `name`.
    pub fn tool_result(
        id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut m = Self::base(Role::Tool, content);
        m.tool_id = Some(id.into());
        m.tool_name = Some(name.into());
        m
    }

    /// Approximate token count used for context management
    /// (4-chars-per-token heuristic, minimum 1).
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.len();
        if let Some(r) = &self.reasoning {
            chars += r.len();
        }
        for tc in &self.tool_calls {
            chars += tc.function.name.len() + tc.function.arguments.len();
        }
        (chars / 4).max(1)
    }
}

// ─── Tool calls ───────────────────────────────────────────────────────────────

fn default_call_type() -> String {
    "function".into()
}

/// A structured tool invocation emitted by the model.
///
/// `id` is unique within one assistant message and reused verbatim on the
/// tool-reply message.  `call_id` mirrors `id` for the responses-API wire
/// format, which names the field differently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            call_id: if id.is_empty() { None } else { Some(id.clone()) },
            id,
            call_type: default_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, preserved verbatim so unrecognized
    /// fields survive round trips through providers that echo tool calls.
    pub arguments: String,
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

// ─── Requests and responses ───────────────────────────────────────────────────

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// System prompt, sent in the provider's native system slot.  Messages
    /// with `Role::System` inside `messages` are also honoured; this field
    /// exists so callers can keep the prompt out of the persisted history.
    pub system_prompt: Option<String>,
    /// Ask the provider to cache the stable prompt prefix where supported.
    pub enable_caching: bool,
    /// Cache TTL in seconds for providers with explicit TTL tiers.
    pub cache_ttl_secs: u64,
}

impl CompletionRequest {
    pub fn from_prompt(prompt: &str) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            ..Default::default()
        }
    }

    /// Rough token estimate over the full request payload.  Used by the
    /// rate limiter and the context-window gate.
    pub fn approx_tokens(&self) -> usize {
        let msg_tokens: usize = self.messages.iter().map(|m| m.approx_tokens()).sum();
        let tool_tokens: usize = self
            .tools
            .iter()
            .map(|t| (t.name.len() + t.description.len() + t.parameters.to_string().len()) / 4)
            .sum();
        let sys_tokens = self.system_prompt.as_deref().map(|s| s.len() / 4).unwrap_or(0);
        msg_tokens + tool_tokens + sys_tokens
    }
}

/// Response from one completion call.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<String>,
    pub usage: Option<HashMap<String, u64>>,
    pub reasoning: Option<String>,
}

// ─── Model metadata ───────────────────────────────────────────────────────────

/// Metadata for a single model, as surfaced by provider discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Provider-scoped model identifier (e.g. "gpt-4o", "claude-opus-4-6")
    pub id: String,
    /// Human-readable display name
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub description: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub supports_tool_calling: bool,
    #[serde(default)]
    pub supports_streaming: bool,
    #[serde(default)]
    pub owned_by: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hello");
        assert!(m.tool_calls.is_empty());
        assert!(m.tool_id.is_none());
    }

    #[test]
    fn message_tool_result_echoes_call_identity() {
        let m = Message::tool_result("call_1", "read_file", "output");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_id.as_deref(), Some("call_1"));
        assert_eq!(m.tool_name.as_deref(), Some("read_file"));
        assert_eq!(m.content, "output");
    }

    #[test]
    fn assistant_with_tool_calls_populates_calls_only() {
        let m = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new("c1", "shell", "{}")],
        );
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.tool_calls.len(), 1);
        assert!(m.tool_id.is_none(), "assistant must not carry tool_id");
    }

    #[test]
    fn approx_tokens_text_divides_by_four() {
        let m = Message::user("12345678");
        assert_eq!(m.approx_tokens(), 2);
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        assert_eq!(Message::user("").approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_counts_tool_call_name_and_args() {
        let m = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new("id", "aaaa", "bbbbbbbb")], // 4 + 8 chars
        );
        assert_eq!(m.approx_tokens(), 3);
    }

    #[test]
    fn tool_call_new_mirrors_id_into_call_id() {
        let tc = ToolCall::new("call_x", "glob", "{}");
        assert_eq!(tc.call_id.as_deref(), Some("call_x"));
        assert_eq!(tc.call_type, "function");
    }

    #[test]
    fn tool_call_blank_id_leaves_call_id_unset() {
        let tc = ToolCall::new("", "glob", "{}");
        assert!(tc.call_id.is_none());
    }

    #[test]
    fn message_serialises_and_deserialises() {
        let original = Message::tool_result("c9", "grep", "match");
        let json = serde_json::to_string(&original).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.role, Role::Tool);
        assert_eq!(decoded.tool_id.as_deref(), Some("c9"));
    }

    #[test]
    fn tool_call_deserialises_with_missing_type() {
        let json = r#"{"id":"c1","function":{"name":"f","arguments":"{}"}}"#;
        let tc: ToolCall = serde_json::from_str(json).unwrap();
        assert_eq!(tc.call_type, "function");
    }

    #[test]
    fn request_from_prompt_is_single_user_message() {
        let req = CompletionRequest::from_prompt("hi");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
    }

    #[test]
    fn request_approx_tokens_includes_tools_and_system() {
        let req = CompletionRequest {
            messages: vec![Message::user("12345678")], // 2 tokens
            tools: vec![ToolSchema {
                name: "abcd".into(),
                description: "efgh".into(),
                parameters: serde_json::json!({}),
            }],
            system_prompt: Some("x".repeat(40)), // 10 tokens
            ..Default::default()
        };
        assert!(req.approx_tokens() >= 12);
    }
}
