// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-provider conversation rewriting.
//!
//! `normalize` is a pure function: it clones its input and never mutates.
//! For most providers it is the identity; Mistral's chat endpoint rejects
//! consecutive assistant messages and trailing assistant turns, so its
//! conversation is rewritten before sending.

use serde_json::{json, Value};

use crate::{Message, Role, ToolCall};

/// Rewrite `messages` into the shape `provider` accepts.
pub fn normalize(provider: &str, messages: &[Message]) -> Vec<Message> {
    match provider {
        "mistral" => normalize_mistral(messages),
        _ => messages.to_vec(),
    }
}

/// Mistral rewrite: trim trailing messages while the last role is neither
/// `user` nor `tool`, then merge consecutive assistant messages into one
/// (contents joined with `\n`, tool_calls concatenated).
fn normalize_mistral(messages: &[Message]) -> Vec<Message> {
    let mut msgs = messages.to_vec();

    while let Some(last) = msgs.last() {
        if matches!(last.role, Role::User | Role::Tool) {
            break;
        }
        msgs.pop();
    }

    let mut out: Vec<Message> = Vec::with_capacity(msgs.len());
    for m in msgs {
        if m.role == Role::Assistant {
            if let Some(prev) = out.last_mut().filter(|p| p.role == Role::Assistant) {
                if !m.content.is_empty() {
                    if prev.content.is_empty() {
                        prev.content = m.content;
                    } else {
                        prev.content.push('\n');
                        prev.content.push_str(&m.content);
                    }
                }
                prev.tool_calls.extend(m.tool_calls);
                continue;
            }
        }
        out.push(m);
    }
    out
}

// ─── Responses-API input building ─────────────────────────────────────────────

/// Convert a message list to the responses-API typed input stream.
///
/// system/developer/assistant/user map to message items; a `tool` message
/// becomes a `function_call_output` item keyed by its `tool_id` (dropped
/// when the id is blank); assistant tool_calls become `function_call` items,
/// synthesizing a `call_<name>` id when the model left it blank.
pub fn build_responses_input(messages: &[Message]) -> Vec<Value> {
    let mut items: Vec<Value> = Vec::with_capacity(messages.len());
    for m in messages {
        match m.role {
            Role::Tool => {
                let id = m.tool_id.as_deref().unwrap_or("");
                if id.is_empty() {
                    continue;
                }
                items.push(json!({
                    "type": "function_call_output",
                    "call_id": id,
                    "output": m.content,
                }));
            }
            Role::Assistant if !m.tool_calls.is_empty() => {
                if !m.content.is_empty() {
                    items.push(json!({
                        "type": "message",
                        "role": "assistant",
                        "content": m.content,
                    }));
                }
                for tc in &m.tool_calls {
                    let call_id = if tc.id.is_empty() {
                        format!("call_{}", sanitize_name(&tc.function.name))
                    } else {
                        tc.id.clone()
                    };
                    items.push(json!({
                        "type": "function_call",
                        "call_id": call_id,
                        "name": tc.function.name,
                        "arguments": tc.function.arguments,
                    }));
                }
            }
            _ => {
                items.push(json!({
                    "type": "message",
                    "role": m.role.to_string(),
                    "content": m.content,
                }));
            }
        }
    }
    items
}

/// Groq responses variant: collapse the whole message list into one
/// plain-text prompt with role prefixes.
pub fn flatten_to_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for m in messages {
        let prefix = match m.role {
            Role::System => "System: ",
            Role::User => "User: ",
            Role::Assistant => "Assistant: ",
            Role::Tool => "User: ",
        };
        if !prompt.is_empty() {
            prompt.push('\n');
        }
        prompt.push_str(prefix);
        prompt.push_str(&m.content);
    }
    prompt
}

// ─── Tool-call id normalization ───────────────────────────────────────────────

/// After decoding any response, assign `call_<sanitized_name>_<1-based-index>`
/// to every tool call with a missing or blank id, mirroring the value into
/// `call_id`.  The assembled id is trimmed of leading/trailing underscores.
pub fn normalize_tool_call_ids(calls: &mut [ToolCall]) {
    for (i, tc) in calls.iter_mut().enumerate() {
        if tc.id.trim().is_empty() {
            let id = format!("call_{}_{}", sanitize_name(&tc.function.name), i + 1);
            tc.id = id.trim_matches('_').to_string();
        }
        tc.call_id = Some(tc.id.clone());
    }
}

/// Keep ASCII letters, digits, `_` and `-`; everything else becomes `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FunctionCall;

    fn tc(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: "{}".into(),
            },
            call_id: None,
        }
    }

    // ── Identity providers ────────────────────────────────────────────────────

    #[test]
    fn normalize_is_identity_for_openai() {
        let msgs = vec![Message::user("hi"), Message::assistant("yo")];
        let out = normalize("openai", &msgs);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].content, "yo");
    }

    // ── Mistral merge ─────────────────────────────────────

    #[test]
    fn mistral_merges_consecutive_assistants() {
        let msgs = vec![
            Message::user("hi"),
            Message::assistant("a"),
            Message::assistant_with_tool_calls("b", vec![tc("tc1", "read_file")]),
            Message::tool_result("tc1", "read_file", "t"),
        ];
        let out = normalize("mistral", &msgs);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].role, Role::Assistant);
        assert_eq!(out[1].content, "a\nb");
        assert_eq!(out[1].tool_calls.len(), 1);
        assert_eq!(out[1].tool_calls[0].id, "tc1");
    }

    #[test]
    fn mistral_trims_trailing_assistant() {
        let msgs = vec![
            Message::user("hi"),
            Message::assistant("partial"),
        ];
        let out = normalize("mistral", &msgs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::User);
    }

    #[test]
    fn mistral_trims_trailing_system() {
        let msgs = vec![
            Message::user("hi"),
            Message::assistant("a"),
            Message::system("dangling"),
        ];
        let out = normalize("mistral", &msgs);
        assert!(matches!(out.last().map(|m| m.role), Some(Role::User)));
    }

    #[test]
    fn mistral_keeps_trailing_tool() {
        let msgs = vec![
            Message::user("hi"),
            Message::assistant_with_tool_calls("", vec![tc("c1", "glob")]),
            Message::tool_result("c1", "glob", "out"),
        ];
        let out = normalize("mistral", &msgs);
        assert_eq!(out.len(), 3);
        assert_eq!(out.last().unwrap().role, Role::Tool);
    }

    #[test]
    fn mistral_output_has_no_consecutive_assistants() {
        let msgs = vec![
            Message::assistant("1"),
            Message::assistant("2"),
            Message::assistant("3"),
            Message::user("end"),
        ];
        let out = normalize("mistral", &msgs);
        for pair in out.windows(2) {
            assert!(
                !(pair[0].role == Role::Assistant && pair[1].role == Role::Assistant),
                "consecutive assistant messages survived normalization"
            );
        }
        assert_eq!(out[0].content, "1\n2\n3");
    }

    #[test]
    fn mistral_normalization_is_idempotent() {
        let msgs = vec![
            Message::user("hi"),
            Message::assistant(""),
            Message::assistant_with_tool_calls("b", vec![tc("tc1", "grep")]),
            Message::tool_result("tc1", "grep", "t"),
            Message::assistant("dangling"),
        ];
        let once = normalize("mistral", &msgs);
        let twice = normalize("mistral", &once);
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.role, b.role);
            assert_eq!(a.content, b.content);
            assert_eq!(a.tool_calls, b.tool_calls);
        }
    }

    #[test]
    fn mistral_empty_input_yields_empty_output() {
        assert!(normalize("mistral", &[]).is_empty());
    }

    #[test]
    fn mistral_does_not_mutate_input() {
        let msgs = vec![Message::user("hi"), Message::assistant("a")];
        let _ = normalize("mistral", &msgs);
        assert_eq!(msgs.len(), 2, "input must be untouched");
    }

    #[test]
    fn mistral_merge_skips_empty_content() {
        let msgs = vec![
            Message::user("hi"),
            Message::assistant("a"),
            Message::assistant(""),
            Message::user("next"),
        ];
        let out = normalize("mistral", &msgs);
        assert_eq!(out[1].content, "a", "empty content must not add a newline");
    }

    // ── Responses input ───────────────────────────────────────────────────────

    #[test]
    fn responses_input_maps_roles_to_message_items() {
        let msgs = vec![Message::system("sys"), Message::user("u")];
        let items = build_responses_input(&msgs);
        assert_eq!(items[0]["type"], "message");
        assert_eq!(items[0]["role"], "system");
        assert_eq!(items[1]["role"], "user");
    }

    #[test]
    fn responses_input_tool_message_becomes_function_call_output() {
        let msgs = vec![Message::tool_result("call_7", "grep", "hits")];
        let items = build_responses_input(&msgs);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["type"], "function_call_output");
        assert_eq!(items[0]["call_id"], "call_7");
        assert_eq!(items[0]["output"], "hits");
    }

    #[test]
    fn responses_input_drops_tool_message_with_blank_id() {
        let mut m = Message::tool_result("", "grep", "hits");
        m.tool_id = Some(String::new());
        let items = build_responses_input(&[m]);
        assert!(items.is_empty());
    }

    #[test]
    fn responses_input_assistant_tool_calls_become_function_call_items() {
        let msgs = vec![Message::assistant_with_tool_calls(
            "thinking out loud",
            vec![tc("call_1", "read_file"), tc("", "search files")],
        )];
        let items = build_responses_input(&msgs);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["type"], "message");
        assert_eq!(items[1]["type"], "function_call");
        assert_eq!(items[1]["call_id"], "call_1");
        // blank id → synthesized from the sanitized tool name
        assert_eq!(items[2]["call_id"], "call_search_files");
    }

    #[test]
    fn flatten_to_prompt_uses_role_prefixes() {
        let msgs = vec![
            Message::system("be terse"),
            Message::user("hello"),
            Message::assistant("hi"),
        ];
        let prompt = flatten_to_prompt(&msgs);
        assert_eq!(prompt, "System: be terse\nUser: hello\nAssistant: hi");
    }

    // ── Id sanitization ───────────────────────────────────

    #[test]
    fn blank_id_synthesized_from_sanitized_name_and_index() {
        let mut calls = vec![tc("", "read file!")];
        normalize_tool_call_ids(&mut calls);
        assert_eq!(calls[0].id, "call_read_file__1");
        assert_eq!(calls[0].call_id.as_deref(), Some("call_read_file__1"));
    }

    #[test]
    fn existing_ids_are_preserved_and_mirrored() {
        let mut calls = vec![tc("call_keep", "grep")];
        normalize_tool_call_ids(&mut calls);
        assert_eq!(calls[0].id, "call_keep");
        assert_eq!(calls[0].call_id.as_deref(), Some("call_keep"));
    }

    #[test]
    fn index_is_one_based_per_position() {
        let mut calls = vec![tc("", "a"), tc("have_id", "b"), tc("", "c")];
        normalize_tool_call_ids(&mut calls);
        assert_eq!(calls[0].id, "call_a_1");
        assert_eq!(calls[1].id, "have_id");
        assert_eq!(calls[2].id, "call_c_3");
    }

    #[test]
    fn sanitize_keeps_ascii_word_chars_and_dash() {
        assert_eq!(sanitize_name("read_file-2"), "read_file-2");
        assert_eq!(sanitize_name("läs fil"), "l_s_fil");
        assert_eq!(sanitize_name("a.b/c"), "a_b_c");
    }

    #[test]
    fn whitespace_only_id_is_treated_as_blank() {
        let mut calls = vec![tc("   ", "glob")];
        normalize_tool_call_ids(&mut calls);
        assert_eq!(calls[0].id, "call_glob_1");
    }
}
