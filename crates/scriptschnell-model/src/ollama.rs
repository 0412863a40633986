// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Ollama `/api/chat` client.
//!
//! Local models are slow to load, so the request timeout is 2 minutes.
//! The stream is newline-delimited JSON: one object per line, terminated
//! by an object with `"done": true`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::client::{effective_temperature, Client, OnChunk};
use crate::error::{retry_backoff, ProviderError};
use crate::normalize::normalize_tool_call_ids;
use crate::{CompletionRequest, CompletionResponse, FunctionCall, Message, Role, ToolCall};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

pub struct OllamaClient {
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl OllamaClient {
    pub fn new(model: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            model: model.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.into())
                .trim_end_matches('/')
                .to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        }
    }

    fn build_body(&self, req: &CompletionRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::with_capacity(req.messages.len() + 1);
        if let Some(sys) = &req.system_prompt {
            if !sys.is_empty() {
                messages.push(json!({ "role": "system", "content": sys }));
            }
        }
        for m in &req.messages {
            match m.role {
                Role::Assistant if !m.tool_calls.is_empty() => {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            let args: Value = serde_json::from_str(&tc.function.arguments)
                                .unwrap_or_else(|_| json!({}));
                            json!({ "function": { "name": tc.function.name, "arguments": args } })
                        })
                        .collect();
                    messages.push(json!({
                        "role": "assistant",
                        "content": m.content,
                        "tool_calls": calls,
                    }));
                }
                Role::Tool => {
                    messages.push(json!({ "role": "tool", "content": m.content }));
                }
                _ => {
                    messages.push(json!({ "role": m.role.to_string(), "content": m.content }));
                }
            }
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
            "options": {
                "temperature": effective_temperature(&self.model, req.temperature),
            },
        });
        if let Some(max) = req.max_tokens {
            body["options"]["num_predict"] = json!(max);
        }
        if !req.tools.is_empty() {
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

    async fn post_once(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        Ok(resp)
    }

    async fn post_with_retry(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        match self.post_once(body).await {
            Err(e) if e.is_transient() => {
                tokio::time::sleep(retry_backoff()).await;
                self.post_once(body).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl Client for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_request(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        debug!(model = %self.model, "sending ollama chat request");
        let body = self.build_body(req, false);
        let resp = self.post_with_retry(&body).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Protocol(format!("invalid response body: {e}")))?;
        parse_ollama_message(&v)
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
        on_chunk: OnChunk<'_>,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = self.build_body(req, true);
        let resp = self.post_with_retry(&body).await?;

        let mut byte_stream = resp.bytes_stream();
        let mut buf = String::new();
        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut usage: HashMap<String, u64> = HashMap::new();
        let mut stop_reason = None;

        'outer: while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| ProviderError::Transient(e.to_string()))?;
            buf.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(nl_pos) = buf.find('\n') {
                let line = buf[..nl_pos].trim_end_matches('\r').to_string();
                buf = buf[nl_pos + 1..].to_string();
                if line.trim().is_empty() {
                    continue;
                }
                let v: Value = serde_json::from_str(&line)
                    .map_err(|e| ProviderError::Protocol(format!("malformed stream line: {e}")))?;

                let delta = v["message"]["content"].as_str().unwrap_or("");
                if !delta.is_empty() {
                    on_chunk(delta)
                        .map_err(|e| ProviderError::Other(format!("stream callback: {e}")))?;
                    content.push_str(delta);
                }
                collect_tool_calls(&v["message"], &mut tool_calls);

                if v["done"].as_bool() == Some(true) {
                    if let Some(n) = v["prompt_eval_count"].as_u64() {
                        usage.insert("prompt_tokens".into(), n);
                    }
                    if let Some(n) = v["eval_count"].as_u64() {
                        usage.insert("completion_tokens".into(), n);
                    }
                    stop_reason = v["done_reason"].as_str().map(String::from);
                    break 'outer;
                }
            }
        }

        normalize_tool_call_ids(&mut tool_calls);
        Ok(CompletionResponse {
            content,
            tool_calls,
            stop_reason,
            usage: if usage.is_empty() { None } else { Some(usage) },
            reasoning: None,
        })
    }
}

/// Decode a non-streaming `/api/chat` response.
pub(crate) fn parse_ollama_message(v: &Value) -> Result<CompletionResponse, ProviderError> {
    let message = v
        .get("message")
        .ok_or_else(|| ProviderError::Protocol("response has no message".into()))?;

    let mut tool_calls: Vec<ToolCall> = Vec::new();
    collect_tool_calls(message, &mut tool_calls);
    normalize_tool_call_ids(&mut tool_calls);

    let mut usage: HashMap<String, u64> = HashMap::new();
    if let Some(n) = v["prompt_eval_count"].as_u64() {
        usage.insert("prompt_tokens".into(), n);
    }
    if let Some(n) = v["eval_count"].as_u64() {
        usage.insert("completion_tokens".into(), n);
    }

    Ok(CompletionResponse {
        content: message["content"].as_str().unwrap_or("").to_string(),
        tool_calls,
        stop_reason: v["done_reason"].as_str().map(String::from),
        usage: if usage.is_empty() { None } else { Some(usage) },
        reasoning: None,
    })
}

/// Ollama delivers tool-call arguments as a JSON object (not a string) and
/// provides no call ids; ids are synthesized by the caller.
fn collect_tool_calls(message: &Value, out: &mut Vec<ToolCall>) {
    let Some(calls) = message["tool_calls"].as_array() else {
        return;
    };
    for tc in calls {
        let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
        if name.is_empty() {
            continue;
        }
        out.push(ToolCall {
            id: String::new(),
            call_type: "function".into(),
            function: FunctionCall {
                name,
                arguments: tc["function"]["arguments"].to_string(),
            },
            call_id: None,
        });
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
