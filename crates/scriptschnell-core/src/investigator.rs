// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The codebase investigator: a self-contained read-only sub-agent that
//! answers a question about the workspace using a bounded turn budget and
//! a restricted tool set.
//!
//! The orchestrator reaches the investigator only through the
//! `codebase_investigator` tool wired at construction; the tool never
//! imports the orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use scriptschnell_model::{Client, CompletionRequest, Message, ToolSchema};
use scriptschnell_tools::{
    Authorizer, CancelToken, Filesystem, ReadFileTool, SearchFileContentTool, SearchFilesTool,
    Tool, ToolInvocation, ToolRegistry, ToolResult, WebFetchTool,
};

use crate::loop_detector::LoopDetector;
use crate::session::SessionState;
use crate::summarize::{chunked_summarize, estimate_tokens};

/// Fraction of the context window the final answer may occupy.
const ANSWER_BUDGET_RATIO: f32 = 0.2;

/// Directory-tree limits for the system prompt.
const TREE_MAX_DEPTH: usize = 3;
const TREE_MAX_ENTRIES: usize = 200;

const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    ".next",
    "dist",
    "build",
    "__pycache__",
    ".cache",
];

pub struct Investigator {
    client: Arc<dyn Client>,
    tools: Arc<ToolRegistry>,
    workspace: PathBuf,
    max_turns: u32,
    context_window: usize,
    cache_ttl_secs: u64,
}

impl Investigator {
    /// Build an investigator with the read-only tool subset: read_file,
    /// search_files, search_file_content, an authorizer-constrained
    /// web_fetch, and the parallel_tools meta tool.  When context
    /// directories are configured, three context-search tools are added
    /// on top.
    pub fn new(
        client: Arc<dyn Client>,
        fs: Arc<dyn Filesystem>,
        authorizer: Arc<dyn Authorizer>,
        workspace: impl Into<PathBuf>,
        context_dirs: &[PathBuf],
        max_turns: u32,
        context_window: usize,
    ) -> anyhow::Result<Self> {
        let workspace = workspace.into();
        let mut registry = ToolRegistry::new(authorizer);
        registry.register(ReadFileTool::new(fs))?;
        registry.register(SearchFilesTool::new(&workspace))?;
        registry.register(SearchFileContentTool::new(&workspace))?;
        registry.register(WebFetchTool::new())?;
        if !context_dirs.is_empty() {
            let dirs = context_dirs.to_vec();
            registry.register(ContextSearchFilesTool { dirs: dirs.clone() })?;
            registry.register(ContextSearchContentTool { dirs: dirs.clone() })?;
            registry.register(ContextReadFileTool { dirs })?;
        }
        Ok(Self {
            client,
            tools: registry.into_shared_with_parallel(),
            workspace,
            max_turns,
            context_window,
            cache_ttl_secs: 300,
        })
    }

    /// Answer one objective.  Returns the extracted answer, a partial
    /// summary when a tool loop was detected, or "investigation timed out"
    /// when the turn budget is exhausted.
    pub async fn investigate(
        &self,
        objective: &str,
        cancel: &CancelToken,
    ) -> anyhow::Result<String> {
        let mut session = SessionState::new(&self.workspace);
        session.push(Message::user(format!("Investigation Objective: {objective}")));
        let system_prompt = self.system_prompt();
        let tool_schemas = self.tool_schemas();
        let mut detector = LoopDetector::new();
        let answer_budget =
            ((self.context_window as f32) * ANSWER_BUDGET_RATIO).max(1.0) as usize;

        for turn in 0..self.max_turns {
            if cancel.is_cancelled() {
                anyhow::bail!("investigation cancelled");
            }

            let req = CompletionRequest {
                messages: session.messages.clone(),
                tools: tool_schemas.clone(),
                temperature: Some(0.0),
                max_tokens: None,
                system_prompt: Some(system_prompt.clone()),
                enable_caching: true,
                cache_ttl_secs: self.cache_ttl_secs,
            };

            let resp = tokio::select! {
                biased;
                _ = cancel.cancelled() => anyhow::bail!("investigation cancelled"),
                resp = self.client.complete_request(&req) => resp?,
            };

            if resp.tool_calls.is_empty() {
                let answer = extract_answer(&resp.content);
                if estimate_tokens(&answer) > answer_budget {
                    return chunked_summarize(self.client.as_ref(), &answer, answer_budget).await;
                }
                return Ok(answer);
            }

            // Loop check before execution: a stuck model would otherwise
            // burn the whole turn budget on the same call.
            for tc in &resp.tool_calls {
                let args: Value =
                    serde_json::from_str(&tc.function.arguments).unwrap_or_else(|_| json!({}));
                if detector.record_and_check(&tc.function.name, &args) {
                    warn!(
                        tool = %tc.function.name,
                        turn,
                        "tool-call loop detected; returning partial results"
                    );
                    return self.partial_summary(objective, &mut session).await;
                }
            }

            debug!(turn, calls = resp.tool_calls.len(), "investigator tool round");
            session.push(Message::assistant_with_tool_calls(
                resp.content.clone(),
                resp.tool_calls.clone(),
            ));
            for tc in &resp.tool_calls {
                let invocation =
                    ToolInvocation::new(&tc.id, &tc.function.name, &tc.function.arguments);
                let result = self.tools.execute(&invocation, cancel).await;
                session.push(Message::tool_result(
                    &tc.id,
                    &tc.function.name,
                    result.text(),
                ));
            }
        }

        Ok("investigation timed out".into())
    }

    /// Run several objectives concurrently.  Results come back in input
    /// order; each slot carries its own outcome so partial results survive
    /// a failing sibling.
    pub async fn investigate_all(
        &self,
        objectives: &[String],
        cancel: &CancelToken,
    ) -> Vec<anyhow::Result<String>> {
        let futures: Vec<_> = objectives
            .iter()
            .map(|objective| self.investigate(objective, cancel))
            .collect();
        futures::future::join_all(futures).await
    }

    /// One final tool-free turn asking the model what it learned so far.
    /// The output is labelled with the objective and carries no answer
    /// tags, marking it as partial.
    async fn partial_summary(
        &self,
        objective: &str,
        session: &mut SessionState,
    ) -> anyhow::Result<String> {
        session.push(Message::user(
            "Stop investigating. Summarize what you have learned so far in \
             plain text, without calling any tools.",
        ));
        let req = CompletionRequest {
            messages: session.messages.clone(),
            tools: vec![],
            temperature: Some(0.0),
            system_prompt: Some(self.system_prompt()),
            enable_caching: true,
            cache_ttl_secs: self.cache_ttl_secs,
            ..Default::default()
        };
        let text = match self.client.complete_request(&req).await {
            Ok(resp) => strip_answer_tags(&extract_answer(&resp.content)),
            Err(e) => {
                warn!(error = %e, "final summarization failed after loop detection");
                String::new()
            }
        };
        Ok(format!(
            "Partial results for objective \"{objective}\" (stopped after \
             repeated identical tool calls):\n{text}"
        ))
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

    fn system_prompt(&self) -> String {
        let tree = workspace_tree(&self.workspace);
        let project = detect_project(&self.workspace);
        format!(
            "You are a codebase investigator. Answer the stated objective by \
             reading and searching the workspace; never modify anything. \
             When you know the answer, reply with it wrapped in \
             <answer>...</answer> tags and stop calling tools.\n\n\
             Project: {project}\n\nWorkspace tree (depth {TREE_MAX_DEPTH}):\n{tree}"
        )
    }
}

// ─── Workspace description ────────────────────────────────────────────────────

/// Render the workspace tree, depth- and entry-limited, with noisy
/// directories skipped.
fn workspace_tree(workspace: &Path) -> String {
    let mut lines: Vec<String> = Vec::new();
    let walker = walkdir::WalkDir::new(workspace)
        .min_depth(1)
        .max_depth(TREE_MAX_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        });
    for entry in walker.flatten() {
        if lines.len() >= TREE_MAX_ENTRIES {
            lines.push("...".into());
            break;
        }
        let rel = entry
            .path()
            .strip_prefix(workspace)
            .unwrap_or(entry.path());
        let suffix = if entry.file_type().is_dir() { "/" } else { "" };
        lines.push(format!("{}{}", rel.display(), suffix));
    }
    lines.join("\n")
}

/// Best-effort project language/framework detection from marker files.
fn detect_project(workspace: &Path) -> String {
    let has = |name: &str| workspace.join(name).exists();
    if has("Cargo.toml") {
        return "Rust (cargo)".into();
    }
    if has("package.json") {
        if has("next.config.js") || has("next.config.ts") {
            return "TypeScript/JavaScript (Next.js)".into();
        }
        return "TypeScript/JavaScript (node)".into();
    }
    if has("go.mod") {
        return "Go (modules)".into();
    }
    if has("pyproject.toml") || has("requirements.txt") {
        return "Python".into();
    }
    if has("pom.xml") || has("build.gradle") {
        return "Java (JVM build)".into();
    }
    if has("CMakeLists.txt") || has("Makefile") {
        return "C/C++".into();
    }
    "unknown".into()
}

// ─── Answer extraction ────────────────────────────────────────────────────────

/// Pull the final answer out of a model reply: `<think>` wrappers are
/// dropped, then the `<answer>...</answer>` payload is extracted; replies
/// without tags pass through trimmed.
pub(crate) fn extract_answer(text: &str) -> String {
    let without_think = strip_think_blocks(text);
    if let Some(start) = without_think.find("<answer>") {
        let after = &without_think[start + "<answer>".len()..];
        let inner = match after.find("</answer>") {
            Some(end) => &after[..end],
            None => after,
        };
        return inner.trim().to_string();
    }
    without_think.trim().to_string()
}

fn strip_think_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end_rel) => {
                rest = &rest[start + end_rel + "</think>".len()..];
            }
            None => {
                // Unclosed block: everything after the tag is reasoning.
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn strip_answer_tags(text: &str) -> String {
    text.replace("<answer>", "").replace("</answer>", "")
}

// ─── Context-directory tools ──────────────────────────────────────────────────
//
// Hosts can point the investigator at extra documentation or knowledge
// directories outside the workspace.  These three tools mirror the
// workspace search tools but range over the configured directories.

struct ContextSearchFilesTool {
    dirs: Vec<PathBuf>,
}

#[async_trait]
impl Tool for ContextSearchFilesTool {
    fn name(&self) -> &str {
        "context_search_files"
    }
    fn description(&self) -> &str {
        "Find files matching a glob pattern in the configured context \
         directories (documentation, knowledge bases)."
    }
    fn parameters_schema(&self) -> Value {
        SearchFilesTool::new(".").parameters_schema()
    }
    async fn execute(&self, params: &Value) -> ToolResult {
        let mut out = String::new();
        for dir in &self.dirs {
            let result = SearchFilesTool::new(dir).execute(params).await;
            if result.is_error() {
                return result;
            }
            if result.result != "(no matches)" {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&format!("# {}\n{}", dir.display(), result.result));
            }
        }
        if out.is_empty() {
            ToolResult::ok("(no matches)")
        } else {
            ToolResult::ok(out)
        }
    }
}

struct ContextSearchContentTool {
    dirs: Vec<PathBuf>,
}

#[async_trait]
impl Tool for ContextSearchContentTool {
    fn name(&self) -> &str {
        "context_search_content"
    }
    fn description(&self) -> &str {
        "Search file contents with a regular expression across the \
         configured context directories."
    }
    fn parameters_schema(&self) -> Value {
        SearchFileContentTool::new(".").parameters_schema()
    }
    async fn execute(&self, params: &Value) -> ToolResult {
        let mut out = String::new();
        for dir in &self.dirs {
            let result = SearchFileContentTool::new(dir).execute(params).await;
            if result.is_error() {
                return result;
            }
            if result.result != "(no matches)" {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&format!("# {}\n{}", dir.display(), result.result));
            }
        }
        if out.is_empty() {
            ToolResult::ok("(no matches)")
        } else {
            ToolResult::ok(out)
        }
    }
}

struct ContextReadFileTool {
    dirs: Vec<PathBuf>,
}

#[async_trait]
impl Tool for ContextReadFileTool {
    fn name(&self) -> &str {
        "context_read_file"
    }
    fn description(&self) -> &str {
        "Read a file from the configured context directories; the path is \
         resolved against each directory in order."
    }
    fn parameters_schema(&self) -> Value {
        use scriptschnell_tools::OsFilesystem;
        ReadFileTool::new(Arc::new(OsFilesystem::new("."))).parameters_schema()
    }
    async fn execute(&self, params: &Value) -> ToolResult {
        use scriptschnell_tools::OsFilesystem;
        let mut last = ToolResult::err("no context directories configured");
        for dir in &self.dirs {
            let tool = ReadFileTool::new(Arc::new(OsFilesystem::new(dir)));
            let result = tool.execute(params).await;
            if !result.is_error() {
                return result;
            }
            last = result;
        }
        last
    }
}

// ─── Tool wrapper ─────────────────────────────────────────────────────────────

/// Exposes the investigator to the main conversation as a tool.
pub struct CodebaseInvestigatorTool {
    investigator: Arc<Investigator>,
}

impl CodebaseInvestigatorTool {
    pub fn new(investigator: Arc<Investigator>) -> Self {
        Self { investigator }
    }
}

#[async_trait]
impl Tool for CodebaseInvestigatorTool {
    fn name(&self) -> &str {
        "codebase_investigator"
    }

    fn description(&self) -> &str {
        "Delegate a read-only investigation of the workspace to a fast \
         sub-agent. Accepts one objective or several; objectives run \
         concurrently and each returns a self-contained answer."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "objective": {
                    "type": "string",
                    "description": "A single question to investigate"
                },
                "objectives": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Several questions, investigated concurrently"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: &Value) -> ToolResult {
        let mut objectives: Vec<String> = Vec::new();
        if let Some(o) = params.get("objective").and_then(|v| v.as_str()) {
            objectives.push(o.to_string());
        }
        if let Some(list) = params.get("objectives").and_then(|v| v.as_array()) {
            objectives.extend(list.iter().filter_map(|v| v.as_str().map(String::from)));
        }
        if objectives.is_empty() {
            return ToolResult::err("provide 'objective' or 'objectives'");
        }

        let results = self
            .investigator
            .investigate_all(&objectives, &CancelToken::never())
            .await;

        let mut out = String::new();
        let mut first_error: Option<String> = None;
        for (objective, result) in objectives.iter().zip(results) {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            match result {
                Ok(answer) => {
                    out.push_str(&format!("## {objective}\n{answer}"));
                }
                Err(e) => {
                    out.push_str(&format!("## {objective}\n(investigation failed: {e})"));
                    if first_error.is_none() {
                        first_error = Some(e.to_string());
                    }
                }
            }
        }
        if let Some(err) = first_error {
            // Partial results are preserved in the payload; the first error
            // is surfaced on the result itself.
            let mut result = ToolResult::ok(out);
            result.error = Some(format!("investigation error: {err}"));
            return result;
        }
        ToolResult::ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
