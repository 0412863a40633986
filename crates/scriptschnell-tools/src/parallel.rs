// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The `parallel_tools` meta tool.
//!
//! Accepts an array of `{name, parameters}` sub-calls, runs them
//! concurrently, and returns every result in input order — a sub-call
//! failure never short-circuits the batch.  Sub-calls are dispatched
//! unapproved, so each one re-faces the authorizer; a
//! dangerously-allow-all session passes them through because its
//! authorizer allows everything.

use std::sync::Weak;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::registry::ToolRegistry;
use crate::tool::{Tool, ToolInvocation, ToolResult};

pub struct ParallelTool {
    registry: Weak<ToolRegistry>,
}

impl ParallelTool {
    pub(crate) fn new(registry: Weak<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for ParallelTool {
    fn name(&self) -> &str {
        "parallel_tools"
    }

    fn description(&self) -> &str {
        "Run several tool calls concurrently and return all results. \
         Each entry names a registered tool and its parameters object. \
         Results are returned in input order; a failing sub-call reports \
         its error without aborting the others."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "calls": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string", "description": "Registered tool name" },
                            "parameters": { "type": "object", "description": "Arguments for the tool" }
                        },
                        "required": ["name"]
                    }
                }
            },
            "required": ["calls"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: &Value) -> ToolResult {
        let Some(calls) = params.get("calls").and_then(|c| c.as_array()) else {
            return ToolResult::err("missing 'calls' array");
        };
        if calls.is_empty() {
            return ToolResult::err("'calls' must not be empty");
        }
        let Some(registry) = self.registry.upgrade() else {
            return ToolResult::err("tool registry is gone");
        };

        debug!(count = calls.len(), "parallel_tools fan-out");

        // Concurrent but joined on this task: when the outer execution is
        // cancelled, dropping this future drops every in-flight sub-call.
        let futures: Vec<_> = calls
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let registry = &registry;
                async move {
                    let name = entry.get("name").and_then(|n| n.as_str()).unwrap_or("");
                    if name.is_empty() {
                        return (String::new(), ToolResult::err("sub-call missing 'name'"));
                    }
                    if name == "parallel_tools" {
                        return (
                            name.to_string(),
                            ToolResult::err("parallel_tools cannot nest"),
                        );
                    }
                    let arguments = entry
                        .get("parameters")
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "{}".into());
                    let invocation =
                        ToolInvocation::new(format!("parallel_{}", i + 1), name, arguments);
                    // Unapproved: sub-calls never inherit the parent's grant.
                    let result = registry.execute(&invocation, &CancelToken::never()).await;
                    (name.to_string(), result)
                }
            })
            .collect();

        let results = futures::future::join_all(futures).await;

        let summary: Vec<Value> = results
            .iter()
            .map(|(name, r)| {
                if let Some(err) = &r.error {
                    json!({ "name": name, "ok": false, "error": err })
                } else {
                    json!({ "name": name, "ok": true, "result": r.result })
                }
            })
            .collect();

        ToolResult::ok(
            serde_json::to_string_pretty(&json!({ "results": summary }))
                .unwrap_or_else(|_| "{}".into()),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
