// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The main conversation driver: per user prompt, loop model calls and
//! tool dispatch until the model stops calling tools or the turn budget
//! is hit.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use scriptschnell_config::AgentConfig;
use scriptschnell_model::{
    Client, CompletionRequest, CompletionResponse, Message, ProviderError, ToolSchema,
};
use scriptschnell_tools::{cancel_pair, CancelHandle, CancelToken, ExecCallbacks, ToolInvocation, ToolRegistry};

use crate::events::{emit, ProgressCallback, ProgressUpdate};
use crate::session::SharedSession;
use crate::summarize::{over_budget, summarize_oldest_block};

pub struct Orchestrator {
    session: SharedSession,
    /// Primary "orchestration" model.
    client: Arc<dyn Client>,
    /// Cheap "summarize" model, also used for context compression.
    summarize_client: Arc<dyn Client>,
    /// Optional "planning" model, used while the session plans.
    planning_client: Option<Arc<dyn Client>>,
    tools: Arc<ToolRegistry>,
    config: Arc<AgentConfig>,
    progress: Option<ProgressCallback>,
    system_prompt: String,
    context_window: usize,
    /// Cancellation handle for the active turn, if one is running.
    active_cancel: Mutex<Option<CancelHandle>>,
}

impl Orchestrator {
    pub fn new(
        session: SharedSession,
        client: Arc<dyn Client>,
        summarize_client: Arc<dyn Client>,
        tools: Arc<ToolRegistry>,
        config: Arc<AgentConfig>,
        system_prompt: impl Into<String>,
        context_window: usize,
    ) -> Self {
        Self {
            session,
            client,
            summarize_client,
            planning_client: None,
            tools,
            config,
            progress: None,
            system_prompt: system_prompt.into(),
            context_window,
            active_cancel: Mutex::new(None),
        }
    }

    pub fn with_planning_client(mut self, client: Arc<dyn Client>) -> Self {
        self.planning_client = Some(client);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Cancel the active turn, if any.  The turn stops before its next
    /// model call; an in-flight request is aborted at the next await
    /// point.  Already-appended messages are never rolled back.
    pub fn cancel_active_turn(&self) {
        if let Some(handle) = self.active_cancel.lock().unwrap().as_ref() {
            handle.cancel();
        }
    }

    /// Run one user turn to completion.
    pub async fn submit(&self, user_input: &str) -> anyhow::Result<()> {
        let (handle, token) = cancel_pair();
        *self.active_cancel.lock().unwrap() = Some(handle);
        let result = self.run_turn(user_input, &token).await;
        *self.active_cancel.lock().unwrap() = None;
        result
    }

    async fn run_turn(&self, user_input: &str, cancel: &CancelToken) -> anyhow::Result<()> {
        {
            let mut session = self.session.write().await;
            if session.title.is_empty() {
                session.title = truncate(user_input.lines().next().unwrap_or(""), 60);
            }
            session.push(Message::user(user_input));
        }

        for turn in 0..self.config.max_orchestrator_turns {
            self.ensure_fits_context().await;

            if cancel.is_cancelled() {
                debug!(turn, "turn cancelled before model call");
                return Ok(());
            }

            let req = self.compose_request().await;
            let response = match self.call_model(&req, cancel).await {
                Ok(Some(resp)) => resp,
                // Cancelled mid-call: partial state is already committed.
                Ok(None) => return Ok(()),
                Err(e) => return Err(self.classify_turn_error(e)),
            };

            let had_tool_calls = !response.tool_calls.is_empty();
            {
                let mut session = self.session.write().await;
                let mut msg = Message::assistant_with_tool_calls(
                    response.content.clone(),
                    response.tool_calls.clone(),
                );
                msg.reasoning = response.reasoning.clone();
                session.push(msg);
            }

            if !had_tool_calls {
                emit(&self.progress, ProgressUpdate::status("turn complete"));
                return Ok(());
            }

            for tc in &response.tool_calls {
                self.dispatch_tool_call(tc, cancel).await;
            }
        }

        warn!(
            limit = self.config.max_orchestrator_turns,
            "turn budget exhausted"
        );
        emit(
            &self.progress,
            ProgressUpdate::status("turn budget exhausted"),
        );
        Ok(())
    }

    /// Execute one tool call through the registry pipeline and append the
    /// tool reply to the session.
    async fn dispatch_tool_call(
        &self,
        tc: &scriptschnell_model::ToolCall,
        cancel: &CancelToken,
    ) {
        emit(
            &self.progress,
            ProgressUpdate::both(describe_call(&tc.function.name, &tc.function.arguments))
                .ephemeral(),
        );

        let progress = self.progress.clone();
        let progress_hook = move |msg: &str| {
            emit(&progress, ProgressUpdate::status(msg));
        };
        let result_progress = self.progress.clone();
        let result_hook = move |name: &str, result: &scriptschnell_tools::ToolResult| {
            let line = if result.is_error() {
                format!("{name} failed: {}", truncate(result.text(), 120))
            } else {
                format!("{name} done")
            };
            emit(&result_progress, ProgressUpdate::both(line));
        };
        let callbacks = ExecCallbacks {
            progress: Some(&progress_hook),
            tool_call: None,
            tool_result: Some(&result_hook),
        };

        let invocation = ToolInvocation::new(&tc.id, &tc.function.name, &tc.function.arguments);
        let result = self
            .tools
            .execute_with_callbacks(&invocation, &callbacks, false, cancel)
            .await;

        self.session.write().await.push(Message::tool_result(
            &tc.id,
            &tc.function.name,
            result.text(),
        ));
    }

    /// One model call, streaming when configured.  Returns `Ok(None)` when
    /// the turn was cancelled mid-call; buffered streamed text is committed
    /// to the session as a partial assistant message first.
    async fn call_model(
        &self,
        req: &CompletionRequest,
        cancel: &CancelToken,
    ) -> Result<Option<CompletionResponse>, ProviderError> {
        let client = self.client_for_turn().await;

        if !self.config.stream {
            return tokio::select! {
                biased;
                _ = cancel.cancelled() => Ok(None),
                resp = client.complete_request(req) => resp.map(Some),
            };
        }

        let buffer: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
        let stream_result = {
            let buffer = Arc::clone(&buffer);
            let progress = self.progress.clone();
            let mut on_chunk = move |delta: &str| -> anyhow::Result<()> {
                buffer.lock().unwrap().push_str(delta);
                emit(&progress, ProgressUpdate::stream(delta));
                Ok(())
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                resp = client.stream(req, &mut on_chunk) => Some(resp),
            }
        };

        match stream_result {
            None => {
                // Cancelled mid-stream: keep what already streamed.
                let partial = buffer.lock().unwrap().clone();
                if !partial.is_empty() {
                    self.session.write().await.push(Message::assistant(partial));
                }
                Ok(None)
            }
            Some(Ok(resp)) => Ok(Some(resp)),
            Some(Err(e)) => {
                // Fatal stream error: preserve the assistant text so far.
                let partial = buffer.lock().unwrap().clone();
                if !partial.is_empty() {
                    self.session.write().await.push(Message::assistant(partial));
                }
                Err(e)
            }
        }
    }

    async fn compose_request(&self) -> CompletionRequest {
        let session = self.session.read().await;
        CompletionRequest {
            messages: session.messages.clone(),
            tools: self.tool_schemas(),
            temperature: None,
            max_tokens: None,
            system_prompt: Some(self.system_prompt.clone()),
            enable_caching: true,
            cache_ttl_secs: 300,
        }
    }

    async fn client_for_turn(&self) -> &Arc<dyn Client> {
        let planning = self.session.read().await.planning_active;
        match (&self.planning_client, planning) {
            (Some(planner), true) => planner,
            _ => &self.client,
        }
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }

    /// Auto-summarization gate: when the estimated history exceeds the
    /// configured fraction of the context window, replace the oldest
    /// tool-exchange block with a synthetic summary.  Failures are logged
    /// and retried on a later turn rather than aborting this one.
    async fn ensure_fits_context(&self) {
        let needs_compaction = {
            let session = self.session.read().await;
            over_budget(
                &session.messages,
                self.context_window,
                self.config.summarization_trigger_ratio,
            )
        };
        if !needs_compaction {
            return;
        }

        let mut messages = self.session.read().await.messages.clone();
        match summarize_oldest_block(self.summarize_client.as_ref(), &mut messages).await {
            Ok(true) => {
                let mut session = self.session.write().await;
                session.messages = messages;
                session.touch();
                emit(&self.progress, ProgressUpdate::status("context summarized"));
            }
            Ok(false) => {
                debug!("context over budget but nothing compactable");
            }
            Err(e) => {
                warn!(error = %e, "auto-summarization failed");
            }
        }
    }

    fn classify_turn_error(&self, e: ProviderError) -> anyhow::Error {
        if matches!(e, ProviderError::Auth(_)) {
            anyhow::Error::new(e)
                .context("invalid API key; update the provider credentials before retrying")
        } else if matches!(e, ProviderError::Protocol(_)) {
            anyhow::Error::new(e).context("provider protocol error ended the turn")
        } else {
            anyhow::Error::new(e)
        }
    }
}

/// Short human-readable description of a tool call for the status line.
fn describe_call(name: &str, arguments: &str) -> String {
    format!("{name}({})", truncate(arguments, 80))
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}

// Unit tests for the turn loop live in crate::tests, where the scripted
// mock client and tool fixtures are shared.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_call_truncates_long_arguments() {
        let described = describe_call("read_file", &"x".repeat(200));
        assert!(described.starts_with("read_file("));
        assert!(described.len() < 120);
        assert!(described.contains('…'));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "äää"; // 2 bytes per char
        let out = truncate(text, 3);
        assert!(out.starts_with('ä'));
    }
}
