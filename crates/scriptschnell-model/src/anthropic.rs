// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic messages-API client.
//!
//! Wire shape: `POST {base}/v1/messages` with `x-api-key` and
//! `anthropic-version: 2023-06-01`.  Tool calls arrive as `tool_use`
//! content blocks; tool replies are sent back as `tool_result` blocks
//! inside a user message.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::{effective_temperature, Client, OnChunk};
use crate::error::{retry_backoff, ProviderError};
use crate::normalize::normalize_tool_call_ids;
use crate::{CompletionRequest, CompletionResponse, FunctionCall, Message, Role, ToolCall};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    http: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            max_tokens: max_tokens.unwrap_or(4096),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    fn build_body(&self, req: &CompletionRequest, stream: bool, strip_tools: bool) -> Value {
        let (system_text, messages) = build_anthropic_messages(&req.messages);

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": effective_temperature(&self.model, req.temperature),
            "stream": stream,
        });

        // System slot: explicit system_prompt first, then any system
        // messages found in the history.
        let mut system = req.system_prompt.clone().unwrap_or_default();
        if !system_text.is_empty() {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&system_text);
        }
        if !system.is_empty() {
            if req.enable_caching {
                // cache_control on the system block caches the stable prefix;
                // the 1-hour tier is selected when the requested TTL exceeds
                // the default 5-minute window.
                let cache_ctrl = if req.cache_ttl_secs > 300 {
                    json!({ "type": "ephemeral", "ttl": "1h" })
                } else {
                    json!({ "type": "ephemeral" })
                };
                body["system"] = json!([{
                    "type": "text",
                    "text": system,
                    "cache_control": cache_ctrl,
                }]);
            } else {
                body["system"] = json!(system);
            }
        }

        if !strip_tools && !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
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
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

    async fn post_with_heal(
        &self,
        req: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        debug!(model = %self.model, stream, "sending anthropic request");
        let body = self.build_body(req, stream, false);
        let mut attempt = 0u8;
        let mut current = body;
        loop {
            attempt += 1;
            match self.post_once(&current).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_tool_use_unsupported() && !req.tools.is_empty() => {
                    warn!(model = %self.model, "endpoint rejects tool use; retrying without tools");
                    current = self.build_body(req, stream, true);
                    attempt = 0;
                }
                Err(e) if e.is_transient() && attempt == 1 => {
                    tokio::time::sleep(retry_backoff()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Client for AnthropicClient {
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
        parse_anthropic_response(&v)
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
        on_chunk: OnChunk<'_>,
    ) -> Result<CompletionResponse, ProviderError> {
        let resp = self.post_with_heal(req, true).await?;

        let mut byte_stream = resp.bytes_stream();
        let mut buf = String::new();
        let mut acc = AnthropicAccumulator::default();

        'outer: while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| ProviderError::Transient(e.to_string()))?;
            buf.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(nl_pos) = buf.find('\n') {
                let line = buf[..nl_pos].trim_end_matches('\r').to_string();
                buf = buf[nl_pos + 1..].to_string();
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                let v: Value = serde_json::from_str(data.trim())
                    .map_err(|e| ProviderError::Protocol(format!("malformed stream event: {e}")))?;
                if acc.apply(&v, &mut *on_chunk)? {
                    break 'outer;
                }
            }
        }
        Ok(acc.finish())
    }
}

#[derive(Default)]
struct AnthropicAccumulator {
    content: String,
    reasoning: String,
    stop_reason: Option<String>,
    usage: HashMap<String, u64>,
    /// Streaming tool_use blocks keyed by content-block index.
    blocks: HashMap<u64, (String, String, String)>, // (id, name, partial_json)
}

impl AnthropicAccumulator {
    /// Apply one stream event.  Returns `true` on `message_stop`.
    fn apply(&mut self, v: &Value, on_chunk: OnChunk<'_>) -> Result<bool, ProviderError> {
        match v["type"].as_str().unwrap_or("") {
            "content_block_start" => {
                let block = &v["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    let index = v["index"].as_u64().unwrap_or(0);
                    self.blocks.insert(
                        index,
                        (
                            block["id"].as_str().unwrap_or("").to_string(),
                            block["name"].as_str().unwrap_or("").to_string(),
                            String::new(),
                        ),
                    );
                }
            }
            "content_block_delta" => {
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or("");
                        if !text.is_empty() {
                            on_chunk(text).map_err(|e| {
                                ProviderError::Other(format!("stream callback: {e}"))
                            })?;
                            self.content.push_str(text);
                        }
                    }
                    "thinking_delta" => {
                        self.reasoning
                            .push_str(delta["thinking"].as_str().unwrap_or(""));
                    }
                    "input_json_delta" => {
                        let index = v["index"].as_u64().unwrap_or(0);
                        if let Some((_, _, partial)) = self.blocks.get_mut(&index) {
                            partial.push_str(delta["partial_json"].as_str().unwrap_or(""));
                        }
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                if let Some(r) = v["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(r.to_string());
                }
                if let Some(obj) = v["usage"].as_object() {
                    for (k, val) in obj {
                        if let Some(n) = val.as_u64() {
                            self.usage.insert(k.clone(), n);
                        }
                    }
                }
            }
            "message_stop" => return Ok(true),
            // ping, message_start, content_block_stop carry nothing we need.
            _ => {}
        }
        Ok(false)
    }

    fn finish(self) -> CompletionResponse {
        let mut blocks: Vec<(u64, (String, String, String))> = self.blocks.into_iter().collect();
        blocks.sort_by_key(|(idx, _)| *idx);
        let mut tool_calls: Vec<ToolCall> = blocks
            .into_iter()
            .filter(|(_, (_, name, _))| !name.is_empty())
            .map(|(_, (id, name, partial))| ToolCall {
                id,
                call_type: "function".into(),
                function: FunctionCall {
                    name,
                    arguments: if partial.is_empty() { "{}".into() } else { partial },
                },
                call_id: None,
            })
            .collect();
        normalize_tool_call_ids(&mut tool_calls);

        CompletionResponse {
            content: self.content,
            tool_calls,
            stop_reason: self.stop_reason,
            usage: if self.usage.is_empty() {
                None
            } else {
                Some(self.usage)
            },
            reasoning: if self.reasoning.is_empty() {
                None
            } else {
                Some(self.reasoning)
            },
        }
    }
}

/// Split the history into (system_text, wire messages).
///
/// System messages are lifted into the system slot; assistant tool calls
/// become `tool_use` blocks; tool replies become `tool_result` blocks in a
/// user message.
pub(crate) fn build_anthropic_messages(messages: &[Message]) -> (String, Vec<Value>) {
    let mut system = String::new();
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());

    for m in messages {
        match m.role {
            Role::System => {
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(&m.content);
            }
            Role::Assistant if !m.tool_calls.is_empty() => {
                let mut content: Vec<Value> = Vec::new();
                if !m.content.is_empty() {
                    content.push(json!({ "type": "text", "text": m.content }));
                }
                for tc in &m.tool_calls {
                    // tool_use input must be an object; unparseable argument
                    // strings degrade to {}.
                    let input: Value = serde_json::from_str(&tc.function.arguments)
                        .unwrap_or_else(|_| json!({}));
                    content.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.function.name,
                        "input": input,
                    }));
                }
                out.push(json!({ "role": "assistant", "content": content }));
            }
            Role::Assistant => {
                out.push(json!({ "role": "assistant", "content": m.content }));
            }
            Role::Tool => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": m.tool_id.as_deref().unwrap_or(""),
                        "content": m.content,
                    }]
                }));
            }
            Role::User => {
                out.push(json!({ "role": "user", "content": m.content }));
            }
        }
    }
    (system, out)
}

pub(crate) fn parse_anthropic_response(v: &Value) -> Result<CompletionResponse, ProviderError> {
    let content_blocks = v
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ProviderError::Protocol("response has no content blocks".into()))?;

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in content_blocks {
        match block["type"].as_str().unwrap_or("") {
            "text" => content.push_str(block["text"].as_str().unwrap_or("")),
            "thinking" => reasoning.push_str(block["thinking"].as_str().unwrap_or("")),
            "tool_use" => {
                let name = block["name"].as_str().unwrap_or("").to_string();
                if name.is_empty() {
                    continue;
                }
                tool_calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    call_type: "function".into(),
                    function: FunctionCall {
                        name,
                        arguments: block["input"].to_string(),
                    },
                    call_id: None,
                });
            }
            _ => {}
        }
    }
    normalize_tool_call_ids(&mut tool_calls);

    let usage = v.get("usage").and_then(|u| u.as_object()).map(|obj| {
        obj.iter()
            .filter_map(|(k, val)| val.as_u64().map(|n| (k.clone(), n)))
            .collect::<HashMap<String, u64>>()
    });

    Ok(CompletionResponse {
        content,
        tool_calls,
        stop_reason: v.get("stop_reason").and_then(|s| s.as_str()).map(String::from),
        usage,
        reasoning: if reasoning.is_empty() {
            None
        } else {
            Some(reasoning)
        },
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_lifted_into_system_slot() {
        let msgs = vec![Message::system("be terse"), Message::user("hi")];
        let (system, wire) = build_anthropic_messages(&msgs);
        assert_eq!(system, "be terse");
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
    }

    #[test]
    fn tool_calls_become_tool_use_blocks() {
        let msgs = vec![Message::assistant_with_tool_calls(
            "checking",
            vec![ToolCall::new("toolu_1", "grep", r#"{"pattern":"x"}"#)],
        )];
        let (_, wire) = build_anthropic_messages(&msgs);
        let content = wire[0]["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "tool_use");
        assert_eq!(content[1]["id"], "toolu_1");
        assert_eq!(content[1]["input"]["pattern"], "x");
    }

    #[test]
    fn unparseable_tool_arguments_degrade_to_empty_object() {
        let msgs = vec![Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new("t1", "grep", "not json")],
        )];
        let (_, wire) = build_anthropic_messages(&msgs);
        assert!(wire[0]["content"][0]["input"].is_object());
    }

    #[test]
    fn tool_reply_becomes_tool_result_in_user_message() {
        let msgs = vec![Message::tool_result("toolu_1", "grep", "3 matches")];
        let (_, wire) = build_anthropic_messages(&msgs);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["content"][0]["type"], "tool_result");
        assert_eq!(wire[0]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn caching_adds_cache_control_to_system_block() {
        let c = AnthropicClient::new("claude-sonnet-4-5", "sk-ant", None, None);
        let req = CompletionRequest {
            messages: vec![Message::user("hi")],
            system_prompt: Some("stable prefix".into()),
            enable_caching: true,
            cache_ttl_secs: 300,
            ..Default::default()
        };
        let body = c.build_body(&req, false, false);
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
        assert!(body["system"][0]["cache_control"].get("ttl").is_none());
    }

    #[test]
    fn long_ttl_selects_one_hour_tier() {
        let c = AnthropicClient::new("claude-sonnet-4-5", "sk-ant", None, None);
        let req = CompletionRequest {
            messages: vec![Message::user("hi")],
            system_prompt: Some("stable".into()),
            enable_caching: true,
            cache_ttl_secs: 3600,
            ..Default::default()
        };
        let body = c.build_body(&req, false, false);
        assert_eq!(body["system"][0]["cache_control"]["ttl"], "1h");
    }

    #[test]
    fn tools_use_input_schema_key() {
        let c = AnthropicClient::new("claude-sonnet-4-5", "sk-ant", None, None);
        let req = CompletionRequest {
            messages: vec![Message::user("hi")],
            tools: vec![crate::ToolSchema {
                name: "glob".into(),
                description: "d".into(),
                parameters: json!({"type":"object"}),
            }],
            ..Default::default()
        };
        let body = c.build_body(&req, false, false);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn parse_response_collects_text_and_tool_use() {
        let v = json!({
            "content": [
                { "type": "text", "text": "let me check" },
                { "type": "tool_use", "id": "toolu_9", "name": "read_file",
                  "input": { "path": "x.rs" } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 12, "output_tokens": 8 }
        });
        let resp = parse_anthropic_response(&v).unwrap();
        assert_eq!(resp.content, "let me check");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "toolu_9");
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(resp.usage.unwrap().get("output_tokens"), Some(&8));
    }

    #[test]
    fn parse_response_without_content_is_protocol_error() {
        assert!(matches!(
            parse_anthropic_response(&json!({"type":"error"})),
            Err(ProviderError::Protocol(_))
        ));
    }

    #[test]
    fn stream_accumulator_assembles_tool_use_from_deltas() {
        let mut acc = AnthropicAccumulator::default();
        let mut sink = |_: &str| -> anyhow::Result<()> { Ok(()) };
        let events = [
            json!({ "type": "content_block_start", "index": 0,
                    "content_block": { "type": "tool_use", "id": "toolu_1", "name": "grep" } }),
            json!({ "type": "content_block_delta", "index": 0,
                    "delta": { "type": "input_json_delta", "partial_json": "{\"pattern\":" } }),
            json!({ "type": "content_block_delta", "index": 0,
                    "delta": { "type": "input_json_delta", "partial_json": "\"x\"}" } }),
            json!({ "type": "message_delta", "delta": { "stop_reason": "tool_use" },
                    "usage": { "output_tokens": 5 } }),
        ];
        for ev in &events {
            assert!(!acc.apply(ev, &mut sink).unwrap());
        }
        assert!(acc
            .apply(&json!({ "type": "message_stop" }), &mut sink)
            .unwrap());
        let resp = acc.finish();
        assert_eq!(resp.tool_calls[0].function.arguments, "{\"pattern\":\"x\"}");
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn stream_accumulator_streams_text_deltas() {
        let mut acc = AnthropicAccumulator::default();
        let mut chunks: Vec<String> = Vec::new();
        let mut cb = |d: &str| -> anyhow::Result<()> {
            chunks.push(d.to_string());
            Ok(())
        };
        acc.apply(
            &json!({ "type": "content_block_delta", "index": 0,
                     "delta": { "type": "text_delta", "text": "Hel" } }),
            &mut cb,
        )
        .unwrap();
        acc.apply(
            &json!({ "type": "content_block_delta", "index": 0,
                     "delta": { "type": "text_delta", "text": "lo" } }),
            &mut cb,
        )
        .unwrap();
        assert_eq!(chunks, vec!["Hel", "lo"]);
        assert_eq!(acc.finish().content, "Hello");
    }
}
