// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{Client, OnChunk};
use crate::{CompletionRequest, CompletionResponse, Role, ToolCall};

/// Deterministic mock client for tests.  Echoes the last user message back
/// as the assistant response.
#[derive(Default)]
pub struct MockClient;

#[async_trait]
impl Client for MockClient {
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete_request(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, crate::ProviderError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("[no input]");
        Ok(CompletionResponse {
            content: format!("MOCK: {reply}"),
            stop_reason: Some("stop".into()),
            ..Default::default()
        })
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
        on_chunk: OnChunk<'_>,
    ) -> Result<CompletionResponse, crate::ProviderError> {
        let resp = self.complete_request(req).await?;
        on_chunk(&resp.content)
            .map_err(|e| crate::ProviderError::Other(format!("stream callback: {e}")))?;
        Ok(resp)
    }
}

/// A pre-scripted mock client.  Each call pops the next response from the
/// front of the queue, so tests can specify exact sequences — including
/// tool calls — without network access.
pub struct ScriptedMockClient {
    responses: Mutex<Vec<CompletionResponse>>,
    /// The last request seen, for test inspection.
    pub last_request: Mutex<Option<CompletionRequest>>,
    /// Total completion calls made (both entry points).
    pub calls: AtomicUsize,
}

impl ScriptedMockClient {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            last_request: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Convenience: a client that always returns one text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![CompletionResponse {
            content: reply.into(),
            stop_reason: Some("stop".into()),
            ..Default::default()
        }])
    }

    /// Convenience: one tool call, then a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            CompletionResponse {
                tool_calls: vec![ToolCall::new(tool_id, tool_name, args_json)],
                stop_reason: Some("tool_calls".into()),
                ..Default::default()
            },
            CompletionResponse {
                content: final_text.into(),
                stop_reason: Some("stop".into()),
                ..Default::default()
            },
        ])
    }

    fn next_response(&self, req: &CompletionRequest) -> CompletionResponse {
        self.calls.fetch_add(1, Ordering::Relaxed);
        *self.last_request.lock().unwrap() = Some(req.clone());
        let mut scripts = self.responses.lock().unwrap();
        if scripts.is_empty() {
            CompletionResponse {
                content: "[no more scripts]".into(),
                stop_reason: Some("stop".into()),
                ..Default::default()
            }
        } else {
            scripts.remove(0)
        }
    }
}

#[async_trait]
impl Client for ScriptedMockClient {
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn complete_request(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, crate::ProviderError> {
        Ok(self.next_response(req))
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
        on_chunk: OnChunk<'_>,
    ) -> Result<CompletionResponse, crate::ProviderError> {
        let resp = self.next_response(req);
        if !resp.content.is_empty() {
            on_chunk(&resp.content)
                .map_err(|e| crate::ProviderError::Other(format!("stream callback: {e}")))?;
        }
        Ok(resp)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let resp = MockClient
            .complete_request(&CompletionRequest::from_prompt("hi"))
            .await
            .unwrap();
        assert_eq!(resp.content, "MOCK: hi");
    }

    #[tokio::test]
    async fn mock_complete_returns_content_string() {
        let text = MockClient.complete("ping").await.unwrap();
        assert_eq!(text, "MOCK: ping");
    }

    #[tokio::test]
    async fn scripted_pops_responses_in_order() {
        let client = ScriptedMockClient::tool_then_text(
            "call_1",
            "shell",
            r#"{"command":"ls"}"#,
            "done",
        );
        let req = CompletionRequest::from_prompt("go");

        let first = client.complete_request(&req).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].function.name, "shell");

        let second = client.complete_request(&req).await.unwrap();
        assert_eq!(second.content, "done");
        assert_eq!(client.calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn scripted_fallback_when_scripts_exhausted() {
        let client = ScriptedMockClient::new(vec![]);
        let resp = client
            .complete_request(&CompletionRequest::from_prompt("hi"))
            .await
            .unwrap();
        assert!(resp.content.contains("no more scripts"));
    }

    #[tokio::test]
    async fn scripted_records_last_request() {
        let client = ScriptedMockClient::always_text("ok");
        let req = CompletionRequest {
            messages: vec![Message::user("inspect me")],
            ..Default::default()
        };
        client.complete_request(&req).await.unwrap();
        let seen = client.last_request.lock().unwrap();
        assert_eq!(seen.as_ref().unwrap().messages[0].content, "inspect me");
    }

    #[tokio::test]
    async fn scripted_stream_delivers_content_chunk() {
        let client = ScriptedMockClient::always_text("streamed");
        let mut chunks: Vec<String> = Vec::new();
        let mut cb = |d: &str| -> anyhow::Result<()> {
            chunks.push(d.to_string());
            Ok(())
        };
        let resp = client
            .stream(&CompletionRequest::from_prompt("hi"), &mut cb)
            .await
            .unwrap();
        assert_eq!(chunks, vec!["streamed"]);
        assert_eq!(resp.content, "streamed");
    }
}
