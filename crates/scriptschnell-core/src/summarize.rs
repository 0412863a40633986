// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context compression.
//!
//! Two consumers: the orchestrator replaces the oldest contiguous block of
//! tool-exchange messages with one synthetic assistant summary when the
//! session approaches the context window, and the investigator compresses
//! oversized answers down to its output budget.

use std::ops::Range;

use anyhow::Context;
use tracing::{debug, warn};

use scriptschnell_model::{Client, CompletionRequest, Message, Role};

/// 4-chars-per-token heuristic used throughout context accounting.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// Find the oldest contiguous run of tool-exchange messages: assistant
/// messages carrying tool calls and the tool replies that follow them.
/// Plain conversation (user prompts, final assistant answers) is never
/// summarized away.
pub(crate) fn find_oldest_tool_block(messages: &[Message]) -> Option<Range<usize>> {
    let is_tool_exchange =
        |m: &Message| m.role == Role::Tool || (m.role == Role::Assistant && !m.tool_calls.is_empty());

    let start = messages.iter().position(is_tool_exchange)?;
    let mut end = start;
    while end < messages.len() && is_tool_exchange(&messages[end]) {
        end += 1;
    }
    Some(start..end)
}

/// Replace the oldest tool-exchange block with one synthetic assistant
/// summary produced by the summarize model.  Returns `false` when there is
/// nothing to compact.
pub(crate) async fn summarize_oldest_block(
    client: &dyn Client,
    messages: &mut Vec<Message>,
) -> anyhow::Result<bool> {
    let Some(range) = find_oldest_tool_block(messages) else {
        return Ok(false);
    };
    if range.len() < 2 {
        // A lone message is not worth a model call.
        return Ok(false);
    }

    let mut transcript = String::new();
    for m in &messages[range.clone()] {
        match m.role {
            Role::Assistant => {
                for tc in &m.tool_calls {
                    transcript.push_str(&format!(
                        "call {}({})\n",
                        tc.function.name, tc.function.arguments
                    ));
                }
                if !m.content.is_empty() {
                    transcript.push_str(&m.content);
                    transcript.push('\n');
                }
            }
            Role::Tool => {
                transcript.push_str(&format!(
                    "result from {}: {}\n",
                    m.tool_name.as_deref().unwrap_or("tool"),
                    m.content
                ));
            }
            _ => {}
        }
    }

    let prompt = format!(
        "Summarize the following tool activity from an earlier part of this \
         coding session. Keep file paths, key findings, and decisions; drop \
         raw file contents. Be concise.\n\n{transcript}"
    );
    let summary = client
        .complete(&prompt)
        .await
        .context("summarization model call failed")?;
    if summary.trim().is_empty() {
        anyhow::bail!("summarization model returned an empty summary");
    }

    debug!(
        replaced = range.len(),
        "compacted oldest tool-exchange block"
    );
    let synthetic = Message::assistant(format!("[Earlier tool activity, summarized]\n{summary}"));
    messages.splice(range, [synthetic]);
    Ok(true)
}

/// Compress `text` down to `budget_tokens` by chunked summarization.
///
/// Each round splits the text into chunks, summarizes each, and joins the
/// summaries.  When a round fails to shrink the text the model has refused
/// to compress further; the oversized text is returned with an explicit
/// note so callers can tell refusal from success.
pub async fn chunked_summarize(
    client: &dyn Client,
    text: &str,
    budget_tokens: usize,
) -> anyhow::Result<String> {
    const MAX_ROUNDS: usize = 3;

    let mut current = text.to_string();
    for _ in 0..MAX_ROUNDS {
        if estimate_tokens(&current) <= budget_tokens {
            return Ok(current);
        }

        let chunk_chars = (budget_tokens * 4).max(512);
        let mut summaries: Vec<String> = Vec::new();
        for chunk in split_chunks(&current, chunk_chars * 2) {
            let prompt = format!(
                "Condense the following notes to roughly half their length, \
                 keeping every concrete fact, path, and identifier:\n\n{chunk}"
            );
            summaries.push(client.complete(&prompt).await?);
        }
        let next = summaries.join("\n");

        if next.len() >= current.len() {
            warn!("summarization made no progress; returning oversized answer");
            return Ok(format!(
                "{current}\n[note: could not be compressed below the output budget]"
            ));
        }
        current = next;
    }

    if estimate_tokens(&current) > budget_tokens {
        return Ok(format!(
            "{current}\n[note: could not be compressed below the output budget]"
        ));
    }
    Ok(current)
}

/// Split on char boundaries into pieces of at most `max_chars`.
fn split_chunks(text: &str, max_chars: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max_chars {
        let mut cut = max_chars;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        chunks.push(&rest[..cut]);
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

/// Whether the history has outgrown the configured fraction of the
/// context window.
pub(crate) fn over_budget(messages: &[Message], context_window: usize, ratio: f32) -> bool {
    if context_window == 0 {
        return false;
    }
    let total: usize = messages.iter().map(|m| m.approx_tokens()).sum();
    (total as f32) > (context_window as f32) * ratio
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use scriptschnell_model::{ScriptedMockClient, ToolCall};

    fn tool_exchange() -> Vec<Message> {
        vec![
            Message::user("find the bug"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c1", "read_file", r#"{"path":"a.rs"}"#)],
            ),
            Message::tool_result("c1", "read_file", "L1:fn main() {}"),
            Message::assistant("the bug is on line 1"),
            Message::user("ok fix it"),
        ]
    }

    #[test]
    fn oldest_tool_block_spans_calls_and_results() {
        let msgs = tool_exchange();
        let range = find_oldest_tool_block(&msgs).unwrap();
        assert_eq!(range, 1..3);
    }

    #[test]
    fn no_tool_messages_means_no_block() {
        let msgs = vec![Message::user("hi"), Message::assistant("hello")];
        assert!(find_oldest_tool_block(&msgs).is_none());
    }

    #[tokio::test]
    async fn summarize_replaces_block_with_one_assistant_message() {
        let client = ScriptedMockClient::always_text("read a.rs; found the bug on line 1");
        let mut msgs = tool_exchange();
        let compacted = summarize_oldest_block(&client, &mut msgs).await.unwrap();
        assert!(compacted);
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[1].role, Role::Assistant);
        assert!(msgs[1].content.contains("summarized"));
        assert!(msgs[1].tool_calls.is_empty());
        // Surrounding conversation is untouched.
        assert_eq!(msgs[0].content, "find the bug");
        assert_eq!(msgs[3].content, "ok fix it");
    }

    #[tokio::test]
    async fn summarize_skips_plain_conversation() {
        let client = ScriptedMockClient::always_text("unused");
        let mut msgs = vec![Message::user("hi"), Message::assistant("hello")];
        let compacted = summarize_oldest_block(&client, &mut msgs).await.unwrap();
        assert!(!compacted);
        assert_eq!(msgs.len(), 2);
    }

    #[tokio::test]
    async fn empty_summary_is_an_error() {
        let client = ScriptedMockClient::always_text("");
        let mut msgs = tool_exchange();
        assert!(summarize_oldest_block(&client, &mut msgs).await.is_err());
    }

    #[tokio::test]
    async fn chunked_summarize_returns_short_text_unchanged() {
        let client = ScriptedMockClient::new(vec![]);
        let out = chunked_summarize(&client, "already short", 100).await.unwrap();
        assert_eq!(out, "already short");
    }

    #[tokio::test]
    async fn chunked_summarize_compresses_long_text() {
        // Every chunk summarizes to a short string, so one round lands
        // under budget.
        let client = ScriptedMockClient::new(vec![
            scriptschnell_model::CompletionResponse {
                content: "short".into(),
                ..Default::default()
            };
            8
        ]);
        let long = "x".repeat(4000); // ~1000 tokens
        let out = chunked_summarize(&client, &long, 50).await.unwrap();
        assert!(estimate_tokens(&out) <= 50);
    }

    #[tokio::test]
    async fn refusal_to_compress_is_explicitly_noted() {
        // The mock echoes long text back, so no round makes progress.
        let long = "y".repeat(2000);
        let client = ScriptedMockClient::new(vec![
            scriptschnell_model::CompletionResponse {
                content: "z".repeat(4000),
                ..Default::default()
            };
            4
        ]);
        let out = chunked_summarize(&client, &long, 10).await.unwrap();
        assert!(out.contains("could not be compressed"));
    }

    #[test]
    fn over_budget_uses_ratio_of_window() {
        let msgs = vec![Message::user(&"x".repeat(3200))]; // ~800 tokens
        assert!(over_budget(&msgs, 1000, 0.75));
        assert!(!over_budget(&msgs, 10_000, 0.75));
        assert!(!over_budget(&msgs, 0, 0.75), "zero window disables the check");
    }

    #[test]
    fn split_chunks_respects_char_boundaries() {
        let text = "äöü".repeat(100); // multi-byte
        let chunks = split_chunks(&text, 7);
        assert!(chunks.iter().all(|c| c.len() <= 7));
        let rejoined: String = chunks.concat();
        assert_eq!(rejoined, text);
    }
}
