// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared client for OpenAI-compatible chat completion APIs.
//!
//! Most hosted providers (OpenAI, Groq, Mistral, Kimi, OpenRouter, Cerebras,
//! plus any self-hosted OpenAI-compatible server) speak the same
//! `/chat/completions` wire format.  This module provides the single client
//! that each driver configures with its own defaults (URL, auth style,
//! headers).
//!
//! # Auth styles
//! - `Bearer` — `Authorization: Bearer <key>` (most providers)
//! - `ApiKeyHeader` — `api-key: <key>`
//! - `None` — no authentication (local servers)

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::{effective_temperature, Client, OnChunk};
use crate::error::{retry_backoff, ProviderError};
use crate::normalize::{normalize, normalize_tool_call_ids};
use crate::{CompletionRequest, CompletionResponse, FunctionCall, Message, Role, ToolCall};

/// How to send the API key in HTTP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    Bearer,
    ApiKeyHeader,
    None,
}

/// Chat-completions client used by every OpenAI-compatible driver.
pub struct ChatCompletionsClient {
    provider: String,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    max_tokens: u32,
    http: reqwest::Client,
    extra_headers: Vec<(String, String)>,
    auth_style: AuthStyle,
}

impl ChatCompletionsClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: Option<u32>,
        extra_headers: Vec<(String, String)>,
        auth_style: AuthStyle,
        request_timeout: Duration,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: max_tokens.unwrap_or(4096),
            http: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .unwrap_or_default(),
            extra_headers,
            auth_style,
        }
    }

    fn build_body(&self, req: &CompletionRequest, stream: bool, strip_tools: bool) -> Value {
        let messages = build_chat_messages(
            &normalize(&self.provider, &req.messages),
            req.system_prompt.as_deref(),
        );

        // OpenAI renamed the output-token cap for its newer models; the
        // compatible gateways still use the classic key.
        let max_tokens_key = if self.provider == "openai" {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
            max_tokens_key: req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": effective_temperature(&self.model, req.temperature),
        });
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if !strip_tools && !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        body
    }

    fn apply_auth(&self, mut req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ProviderError> {
        req = match self.auth_style {
            AuthStyle::Bearer => {
                let key = self.api_key.as_deref().ok_or_else(|| {
                    ProviderError::Auth("API key not set for this provider".into())
                })?;
                req.bearer_auth(key)
            }
            AuthStyle::ApiKeyHeader => {
                let key = self.api_key.as_deref().ok_or_else(|| {
                    ProviderError::Auth("API key not set for this provider".into())
                })?;
                req.header("api-key", key)
            }
            AuthStyle::None => req,
        };
        for (name, val) in &self.extra_headers {
            req = req.header(name.as_str(), val.as_str());
        }
        Ok(req)
    }

    /// POST `body` once, plus one retry on a transient failure.
    async fn post_with_retry(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let mut attempt = 0u8;
        loop {
            attempt += 1;
            match self.post_once(body).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() && attempt == 1 => {
                    warn!(provider = %self.provider, error = %e, "transient failure, retrying once");
                    tokio::time::sleep(retry_backoff()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let req = self.apply_auth(self.http.post(&self.chat_url).json(body))?;
        let resp = req.send().await.map_err(ProviderError::from_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        Ok(resp)
    }

    /// Issue the request, applying the tool-use auto-heal: when a
    /// tools-carrying request bounces with the provider's
    /// "no endpoints found … tool use" 4xx, retry once with tools stripped.
    async fn post_with_heal(
        &self,
        req: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let body = self.build_body(req, stream, false);
        debug!(
            provider = %self.provider,
            model = %self.model,
            tool_count = req.tools.len(),
            message_count = req.messages.len(),
            stream,
            "sending completion request"
        );
        match self.post_with_retry(&body).await {
            Err(e) if e.is_tool_use_unsupported() && !req.tools.is_empty() => {
                warn!(
                    provider = %self.provider,
                    model = %self.model,
                    "model endpoint rejects tool use; retrying without tools"
                );
                let healed = self.build_body(req, stream, true);
                self.post_with_retry(&healed).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl Client for ChatCompletionsClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_request(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let resp = self.post_with_heal(req, false).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Protocol(format!("invalid response body: {e}")))?;
        parse_chat_response(&v)
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
        on_chunk: OnChunk<'_>,
    ) -> Result<CompletionResponse, ProviderError> {
        let resp = self.post_with_heal(req, true).await?;

        let mut byte_stream = resp.bytes_stream();
        let mut buf = String::new();
        let mut acc = StreamAccumulator::default();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| ProviderError::Transient(e.to_string()))?;
            buf.push_str(&String::from_utf8_lossy(&bytes));
            for event in drain_complete_sse_lines(&mut buf)? {
                if acc.apply(event, &mut *on_chunk)? {
                    return Ok(acc.finish());
                }
            }
        }
        Ok(acc.finish())
    }
}

// ─── SSE stream parsing ───────────────────────────────────────────────────────

/// One decoded chunk from the chat-completions SSE stream.
#[derive(Debug, Clone)]
pub(crate) enum ChatEvent {
    TextDelta(String),
    ReasoningDelta(String),
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    Usage(HashMap<String, u64>),
    FinishReason(String),
    Done,
}

/// Accumulates stream events into the final [`CompletionResponse`].
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    reasoning: String,
    pending: HashMap<u32, PendingToolCall>,
    usage: Option<HashMap<String, u64>>,
    stop_reason: Option<String>,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl StreamAccumulator {
    /// Apply one event.  Returns `true` when the stream terminated.
    fn apply(&mut self, event: ChatEvent, on_chunk: OnChunk<'_>) -> Result<bool, ProviderError> {
        match event {
            ChatEvent::TextDelta(delta) if !delta.is_empty() => {
                on_chunk(&delta)
                    .map_err(|e| ProviderError::Other(format!("stream callback: {e}")))?;
                self.content.push_str(&delta);
            }
            ChatEvent::TextDelta(_) => {}
            ChatEvent::ReasoningDelta(delta) => self.reasoning.push_str(&delta),
            ChatEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let ptc = self.pending.entry(index).or_default();
                if !id.is_empty() {
                    ptc.id = id;
                }
                if !name.is_empty() {
                    ptc.name = name;
                }
                ptc.args_buf.push_str(&arguments);
            }
            ChatEvent::Usage(u) => self.usage = Some(u),
            ChatEvent::FinishReason(r) => self.stop_reason = Some(r),
            ChatEvent::Done => return Ok(true),
        }
        Ok(false)
    }

    fn finish(self) -> CompletionResponse {
        let mut pending: Vec<(u32, PendingToolCall)> = self.pending.into_iter().collect();
        pending.sort_by_key(|(idx, _)| *idx);

        let mut tool_calls: Vec<ToolCall> = Vec::with_capacity(pending.len());
        for (_, ptc) in pending {
            if ptc.name.is_empty() {
                warn!(
                    tool_call_id = %ptc.id,
                    "dropping streamed tool call with empty name; cannot dispatch"
                );
                continue;
            }
            tool_calls.push(ToolCall {
                id: ptc.id,
                call_type: "function".into(),
                function: FunctionCall {
                    name: ptc.name,
                    arguments: repair_arguments(&ptc.args_buf),
                },
                call_id: None,
            });
        }
        normalize_tool_call_ids(&mut tool_calls);

        CompletionResponse {
            content: self.content,
            tool_calls,
            stop_reason: self.stop_reason,
            usage: self.usage,
            reasoning: if self.reasoning.is_empty() {
                None
            } else {
                Some(self.reasoning)
            },
        }
    }
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// An SSE event may be split across TCP packets, so any trailing incomplete
/// line stays in `buf` to be extended by the next chunk.  Malformed JSON in
/// a data line is a fatal stream error.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Result<Vec<ChatEvent>, ProviderError> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line)? {
            events.push(ev);
        }
    }
    Ok(events)
}

fn parse_sse_data_line(line: &str) -> Result<Option<ChatEvent>, ProviderError> {
    let Some(data) = line.strip_prefix("data: ") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(ChatEvent::Done));
    }
    let v: Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Protocol(format!("malformed stream chunk: {e}")))?;
    Ok(Some(parse_sse_chunk(&v)))
}

fn parse_sse_chunk(v: &Value) -> ChatEvent {
    // Usage-only chunk (emitted when stream_options.include_usage = true).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return ChatEvent::Usage(usage_map(usage));
    }

    let choice = &v["choices"][0];

    if let Some(reason) = choice["finish_reason"].as_str() {
        return ChatEvent::FinishReason(reason.to_string());
    }

    let delta = &choice["delta"];

    if let Some(tool_calls) = delta.get("tool_calls") {
        if let Some(tc) = tool_calls.get(0) {
            return ChatEvent::ToolCallDelta {
                index: tc["index"].as_u64().unwrap_or(0) as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
            };
        }
    }

    // Chain-of-thought: `reasoning_content` (llama.cpp, DeepSeek) or
    // `reasoning` (OpenRouter).
    let reasoning = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(r) = reasoning {
        if !r.is_empty() {
            return ChatEvent::ReasoningDelta(r.to_string());
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        return ChatEvent::TextDelta(text.to_string());
    }

    ChatEvent::TextDelta(String::new())
}

// ─── Non-streaming response parsing ───────────────────────────────────────────

pub(crate) fn parse_chat_response(v: &Value) -> Result<CompletionResponse, ProviderError> {
    let choice = v
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ProviderError::Protocol("response has no choices".into()))?;
    let message = &choice["message"];

    let mut tool_calls: Vec<ToolCall> = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for tc in calls {
            let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
            if name.is_empty() {
                continue;
            }
            tool_calls.push(ToolCall {
                id: tc["id"].as_str().unwrap_or("").to_string(),
                call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                function: FunctionCall {
                    name,
                    arguments: tc["function"]["arguments"]
                        .as_str()
                        .unwrap_or("{}")
                        .to_string(),
                },
                call_id: None,
            });
        }
    }
    normalize_tool_call_ids(&mut tool_calls);

    let reasoning = message
        .get("reasoning_content")
        .and_then(|r| r.as_str())
        .or_else(|| message.get("reasoning").and_then(|r| r.as_str()))
        .filter(|r| !r.is_empty())
        .map(String::from);

    Ok(CompletionResponse {
        content: message["content"].as_str().unwrap_or("").to_string(),
        tool_calls,
        stop_reason: choice["finish_reason"].as_str().map(String::from),
        usage: v.get("usage").filter(|u| !u.is_null()).map(usage_map),
        reasoning,
    })
}

fn usage_map(usage: &Value) -> HashMap<String, u64> {
    let mut map = HashMap::new();
    if let Some(obj) = usage.as_object() {
        for (k, val) in obj {
            if let Some(n) = val.as_u64() {
                map.insert(k.clone(), n);
            }
        }
    }
    map
}

// ─── Wire message building ────────────────────────────────────────────────────

/// Convert messages to the chat-completions wire array.  The optional
/// `system_prompt` is prepended; assistant tool calls are carried in the
/// message's `tool_calls` array; tool replies reference their call id.
pub(crate) fn build_chat_messages(messages: &[Message], system_prompt: Option<&str>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len() + 1);
    if let Some(sys) = system_prompt {
        if !sys.is_empty() {
            out.push(json!({ "role": "system", "content": sys }));
        }
    }
    for m in messages {
        match m.role {
            Role::Assistant if !m.tool_calls.is_empty() => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": tc.call_type,
                            "function": {
                                "name": tc.function.name,
                                "arguments": tc.function.arguments,
                            }
                        })
                    })
                    .collect();
                let content = if m.content.is_empty() {
                    Value::Null
                } else {
                    json!(m.content)
                };
                out.push(json!({
                    "role": "assistant",
                    "content": content,
                    "tool_calls": calls,
                }));
            }
            Role::Tool => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": m.tool_id.as_deref().unwrap_or(""),
                    "content": m.content,
                }));
            }
            _ => {
                out.push(json!({ "role": m.role.to_string(), "content": m.content }));
            }
        }
    }
    out
}

// ─── Argument repair ──────────────────────────────────────────────────────────

/// Best-effort repair of tool-call argument JSON streamed from the model.
/// Invalid escapes are re-escaped and truncated objects closed; when every
/// repair fails the raw buffer is returned so the tool layer reports the
/// parse error.
fn repair_arguments(raw: &str) -> String {
    if raw.is_empty() {
        return "{}".into();
    }
    if serde_json::from_str::<Value>(raw).is_ok() {
        return raw.to_string();
    }
    let fixed = fix_invalid_json_escapes(raw);
    if serde_json::from_str::<Value>(&fixed).is_ok() {
        warn!("repaired invalid escape sequences in tool-call arguments");
        return fixed;
    }
    if !fixed.trim_end().ends_with('}') {
        let mut completed = fixed.clone();
        if fixed.chars().filter(|&c| c == '"').count() % 2 == 1 {
            completed.push('"');
        }
        completed.push('}');
        if serde_json::from_str::<Value>(&completed).is_ok() {
            warn!("closed truncated tool-call argument object");
            return completed;
        }
    }
    raw.to_string()
}

/// Replace invalid escape sequences inside string values with `\\X`.
/// Valid JSON escapes are `"` `\` `/` `b` `f` `n` `r` `t` `u`.
fn fix_invalid_json_escapes(json_str: &str) -> String {
    let mut result = String::with_capacity(json_str.len() + 16);
    let mut chars = json_str.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next)
                        if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
                    {
                        result.push('\\');
                        result.push(next);
                    }
                    Some(next) => {
                        result.push('\\');
                        result.push('\\');
                        result.push(next);
                    }
                    None => result.push('\\'),
                },
                '"' => {
                    in_string = false;
                    result.push('"');
                }
                _ => result.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
        }
    }
    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
