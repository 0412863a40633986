// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::authorize::{Authorizer, Decision};
use crate::cancel::CancelToken;
use crate::redact::redact_secrets;
use crate::tool::{Tool, ToolInvocation, ToolResult};

/// Descriptor of one registered tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Progress hooks observed during one tool execution.  Missing callbacks
/// silently drop their events.
#[derive(Default)]
pub struct ExecCallbacks<'a> {
    pub progress: Option<&'a (dyn Fn(&str) + Send + Sync)>,
    pub tool_call: Option<&'a (dyn Fn(&str, &Value) + Send + Sync)>,
    pub tool_result: Option<&'a (dyn Fn(&str, &ToolResult) + Send + Sync)>,
}

impl<'a> ExecCallbacks<'a> {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Central registry holding all available tools.  Immutable after
/// construction; tool instances carry their own internal locks.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    authorizer: Arc<dyn Authorizer>,
}

impl ToolRegistry {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            tools: HashMap::new(),
            authorizer,
        }
    }

    /// Register a tool.  Names must be unique.
    pub fn register(&mut self, tool: impl Tool + 'static) -> anyhow::Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            anyhow::bail!("tool already registered: {name}");
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    /// Register a tool under an externally-supplied descriptor.  The
    /// factory binds runtime dependencies and produces the implementation;
    /// the spec controls what the model sees.
    pub fn register_spec(
        &mut self,
        spec: ToolSpec,
        factory: impl FnOnce() -> Box<dyn Tool>,
    ) -> anyhow::Result<()> {
        if self.tools.contains_key(&spec.name) {
            anyhow::bail!("tool already registered: {}", spec.name);
        }
        let inner = factory();
        self.tools
            .insert(spec.name.clone(), Arc::new(SpecTool { spec, inner }));
        Ok(())
    }

    /// Convert the registry into a shared handle with the `parallel_tools`
    /// meta tool installed.  The meta tool dispatches back into this same
    /// registry, so it can only be wired once the registry is complete.
    pub fn into_shared_with_parallel(mut self) -> Arc<ToolRegistry> {
        Arc::new_cyclic(|weak: &std::sync::Weak<ToolRegistry>| {
            let parallel = crate::parallel::ParallelTool::new(weak.clone());
            self.tools
                .insert(parallel.name().to_string(), Arc::new(parallel));
            self
        })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Descriptors for all registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// The sequence of function-tool descriptors suitable for the LLM.
    pub fn to_json_schema(&self) -> Vec<Value> {
        self.schemas()
            .into_iter()
            .map(|s| {
                json!({
                    "type": "function",
                    "function": {
                        "name": s.name,
                        "description": s.description,
                        "parameters": s.parameters,
                    }
                })
            })
            .collect()
    }

    /// Execute one call through the full pipeline: lookup, argument parse,
    /// authorization gate, progress events, cancellable execution, secret
    /// redaction.  Every failure path returns a `ToolResult` error — tool
    /// failures never abort the turn.
    pub async fn execute_with_callbacks(
        &self,
        call: &ToolInvocation,
        callbacks: &ExecCallbacks<'_>,
        approved: bool,
        cancel: &CancelToken,
    ) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult::err(format!("unknown tool: {}", call.name));
        };

        let params: Value = if call.arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(v) => v,
                Err(e) => {
                    return ToolResult::err(format!("invalid tool arguments: {e}"));
                }
            }
        };

        if !approved {
            if let Some((kind, subject)) = tool.authorization(&params) {
                if let Some(cb) = callbacks.progress {
                    cb(&format!("authorizing {kind} for {subject}"));
                }
                match self.authorizer.authorize(kind, &subject).await {
                    Decision::Allow => {}
                    Decision::Deny | Decision::Ask => {
                        debug!(tool = %call.name, %kind, subject = %subject, "authorization denied");
                        return ToolResult::err("not authorized");
                    }
                }
            }
        }

        if let Some(cb) = callbacks.tool_call {
            cb(&call.name, &params);
        }

        let mut result = tokio::select! {
            biased;
            _ = cancel.cancelled() => ToolResult::err("context canceled"),
            result = tool.execute(&params) => result,
        };

        if let Some(cb) = callbacks.tool_result {
            cb(&call.name, &result);
        }

        if let Some(redacted) = redact_secrets(&result.result) {
            result.result = redacted;
            result.result.push_str("\n[secret detected and redacted]");
            result.redacted = true;
        }

        result
    }

    /// Execute without callbacks, unapproved, with an inherited cancel
    /// token.  Used by `parallel_tools` sub-dispatch and by tests.
    pub async fn execute(&self, call: &ToolInvocation, cancel: &CancelToken) -> ToolResult {
        self.execute_with_callbacks(call, &ExecCallbacks::none(), false, cancel)
            .await
    }
}

/// Wrapper pairing a host-supplied descriptor with a factory-built tool.
struct SpecTool {
    spec: ToolSpec,
    inner: Box<dyn Tool>,
}

#[async_trait::async_trait]
impl Tool for SpecTool {
    fn name(&self) -> &str {
        &self.spec.name
    }
    fn description(&self) -> &str {
        &self.spec.description
    }
    fn parameters_schema(&self) -> Value {
        self.spec.parameters.clone()
    }
    fn authorization(&self, params: &Value) -> Option<(crate::AuthKind, String)> {
        self.inner.authorization(params)
    }
    async fn execute(&self, params: &Value) -> ToolResult {
        self.inner.execute(params).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
