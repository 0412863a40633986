// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Client for the responses-API endpoint family.
//!
//! Some model families (OpenAI reasoning models, newer flagship ids) are
//! served from `/responses` instead of `/chat/completions`: the request
//! carries a typed input stream and the response is a list of typed output
//! items.  The decision to use this client over the chat client is made
//! once, at construction, by prefix match on the model id.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::{effective_temperature, Client, OnChunk};
use crate::error::{retry_backoff, ProviderError};
use crate::normalize::{build_responses_input, flatten_to_prompt, normalize_tool_call_ids};
use crate::{CompletionRequest, CompletionResponse, FunctionCall, Message, ToolCall};

/// Model-id prefixes that require the responses endpoint.
const RESPONSES_PREFIXES: &[&str] = &["o1", "o3", "o4", "gpt-5-pro", "codex"];

/// Whether `model_id` must be served from the responses endpoint.
pub fn requires_responses_endpoint(model_id: &str) -> bool {
    let bare = model_id.rsplit('/').next().unwrap_or(model_id);
    RESPONSES_PREFIXES.iter().any(|p| bare.starts_with(p))
}

pub struct ResponsesClient {
    provider: String,
    model: String,
    api_key: Option<String>,
    url: String,
    max_tokens: u32,
    http: reqwest::Client,
    /// Groq's responses variant accepts only a flat text prompt.
    flatten_input: bool,
}

impl ResponsesClient {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: Option<u32>,
    ) -> Self {
        let provider = provider.into();
        let base = base_url.trim_end_matches('/');
        Self {
            flatten_input: provider == "groq",
            provider,
            model: model.into(),
            api_key,
            url: format!("{base}/responses"),
            max_tokens: max_tokens.unwrap_or(4096),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    fn build_body(&self, req: &CompletionRequest, strip_tools: bool) -> Value {
        let mut messages: Vec<Message> = Vec::with_capacity(req.messages.len() + 1);
        if let Some(sys) = &req.system_prompt {
            if !sys.is_empty() {
                messages.push(Message::system(sys.clone()));
            }
        }
        messages.extend(req.messages.iter().cloned());

        let input: Value = if self.flatten_input {
            json!(flatten_to_prompt(&messages))
        } else {
            json!(build_responses_input(&messages))
        };

        let mut body = json!({
            "model": self.model,
            "input": input,
            "max_output_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": effective_temperature(&self.model, req.temperature),
        });
        if !strip_tools && !req.tools.is_empty() {
            // The responses API flattens the function descriptor.
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        body
    }

    async fn post_once(&self, body: &Value) -> Result<Value, ProviderError> {
        let mut req = self.http.post(&self.url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(ProviderError::from_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        resp.json()
            .await
            .map_err(|e| ProviderError::Protocol(format!("invalid response body: {e}")))
    }

    async fn send(&self, req: &CompletionRequest) -> Result<Value, ProviderError> {
        let body = self.build_body(req, false);
        debug!(
            provider = %self.provider,
            model = %self.model,
            tool_count = req.tools.len(),
            "sending responses-API request"
        );
        let mut attempt = 0u8;
        let mut current = body;
        loop {
            attempt += 1;
            match self.post_once(&current).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_tool_use_unsupported() && !req.tools.is_empty() => {
                    warn!(model = %self.model, "endpoint rejects tool use; retrying without tools");
                    current = self.build_body(req, true);
                    // The heal retry gets its own transient budget.
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
impl Client for ResponsesClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_request(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let v = self.send(req).await?;
        parse_responses_output(&v)
    }

    /// The responses models served here do not expose delta streaming in a
    /// form worth carrying; the full completion is delivered as one chunk,
    /// which keeps stream-finishing equivalent to `complete_request`.
    async fn stream(
        &self,
        req: &CompletionRequest,
        on_chunk: OnChunk<'_>,
    ) -> Result<CompletionResponse, ProviderError> {
        let resp = self.complete_request(req).await?;
        if !resp.content.is_empty() {
            on_chunk(&resp.content)
                .map_err(|e| ProviderError::Other(format!("stream callback: {e}")))?;
        }
        Ok(resp)
    }
}

/// Decode the typed output-item list into a [`CompletionResponse`].
pub(crate) fn parse_responses_output(v: &Value) -> Result<CompletionResponse, ProviderError> {
    let output = v
        .get("output")
        .and_then(|o| o.as_array())
        .ok_or_else(|| ProviderError::Protocol("response has no output items".into()))?;

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for item in output {
        match item["type"].as_str().unwrap_or("") {
            "message" => {
                if let Some(parts) = item["content"].as_array() {
                    for part in parts {
                        if part["type"].as_str() == Some("output_text") {
                            content.push_str(part["text"].as_str().unwrap_or(""));
                        }
                    }
                }
            }
            "function_call" => {
                let name = item["name"].as_str().unwrap_or("").to_string();
                if name.is_empty() {
                    continue;
                }
                let id = item["call_id"]
                    .as_str()
                    .or_else(|| item["id"].as_str())
                    .unwrap_or("")
                    .to_string();
                tool_calls.push(ToolCall {
                    id,
                    call_type: "function".into(),
                    function: FunctionCall {
                        name,
                        arguments: item["arguments"].as_str().unwrap_or("{}").to_string(),
                    },
                    call_id: None,
                });
            }
            "reasoning" => {
                if let Some(parts) = item["summary"].as_array() {
                    for part in parts {
                        reasoning.push_str(part["text"].as_str().unwrap_or(""));
                    }
                }
            }
            other => {
                debug!(item_type = other, "ignoring unknown responses output item");
            }
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
        stop_reason: v.get("status").and_then(|s| s.as_str()).map(String::from),
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
    fn reasoning_family_requires_responses_endpoint() {
        assert!(requires_responses_endpoint("o1-preview"));
        assert!(requires_responses_endpoint("o3-pro"));
        assert!(requires_responses_endpoint("gpt-5-pro"));
        assert!(requires_responses_endpoint("codex-mini-latest"));
    }

    #[test]
    fn chat_models_stay_on_chat_endpoint() {
        assert!(!requires_responses_endpoint("gpt-4o"));
        assert!(!requires_responses_endpoint("gpt-5"));
        assert!(!requires_responses_endpoint("llama-3.3-70b-versatile"));
    }

    #[test]
    fn groq_client_flattens_input_to_text() {
        let c = ResponsesClient::new("groq", "m", None, "http://x/v1", None);
        let req = CompletionRequest {
            messages: vec![Message::system("sys"), Message::user("hi")],
            ..Default::default()
        };
        let body = c.build_body(&req, false);
        let input = body["input"].as_str().expect("groq input must be a string");
        assert!(input.starts_with("System: sys"));
        assert!(input.contains("User: hi"));
    }

    #[test]
    fn openai_client_builds_typed_input() {
        let c = ResponsesClient::new("openai", "o3-mini", None, "http://x/v1", None);
        let req = CompletionRequest {
            messages: vec![Message::user("hi")],
            system_prompt: Some("be terse".into()),
            ..Default::default()
        };
        let body = c.build_body(&req, false);
        let input = body["input"].as_array().expect("typed input expected");
        assert_eq!(input[0]["role"], "system");
        assert_eq!(input[1]["role"], "user");
    }

    #[test]
    fn tools_use_flat_function_descriptors() {
        let c = ResponsesClient::new("openai", "o3-mini", None, "http://x/v1", None);
        let req = CompletionRequest {
            messages: vec![Message::user("hi")],
            tools: vec![crate::ToolSchema {
                name: "glob".into(),
                description: "d".into(),
                parameters: json!({}),
            }],
            ..Default::default()
        };
        let body = c.build_body(&req, false);
        assert_eq!(body["tools"][0]["name"], "glob");
        assert!(body["tools"][0].get("function").is_none());
    }

    #[test]
    fn parse_output_collects_text_and_function_calls() {
        let v = json!({
            "status": "completed",
            "output": [
                { "type": "reasoning", "summary": [{ "type": "summary_text", "text": "hm" }] },
                { "type": "message", "role": "assistant",
                  "content": [{ "type": "output_text", "text": "answer" }] },
                { "type": "function_call", "call_id": "call_9", "name": "grep",
                  "arguments": "{\"pattern\":\"x\"}" }
            ],
            "usage": { "input_tokens": 7, "output_tokens": 3 }
        });
        let resp = parse_responses_output(&v).unwrap();
        assert_eq!(resp.content, "answer");
        assert_eq!(resp.reasoning.as_deref(), Some("hm"));
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "call_9");
        assert_eq!(resp.stop_reason.as_deref(), Some("completed"));
        assert_eq!(resp.usage.unwrap().get("input_tokens"), Some(&7));
    }

    #[test]
    fn parse_output_synthesizes_missing_call_ids() {
        let v = json!({
            "output": [
                { "type": "function_call", "name": "read file!", "arguments": "{}" }
            ]
        });
        let resp = parse_responses_output(&v).unwrap();
        assert_eq!(resp.tool_calls[0].id, "call_read_file__1");
        assert_eq!(
            resp.tool_calls[0].call_id.as_deref(),
            Some("call_read_file__1")
        );
    }

    #[test]
    fn parse_output_without_output_is_protocol_error() {
        let v = json!({ "status": "failed" });
        assert!(matches!(
            parse_responses_output(&v),
            Err(ProviderError::Protocol(_))
        ));
    }
}
