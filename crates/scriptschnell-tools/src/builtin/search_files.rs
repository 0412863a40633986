// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use glob::Pattern;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{Tool, ToolResult};

/// Directories never worth descending into during a search.
pub(crate) const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    ".next",
    "dist",
    "build",
    "__pycache__",
    ".cache",
    "target",
];

const DEFAULT_MAX_RESULTS: usize = 200;

/// Recursive file search by glob pattern.
pub struct SearchFilesTool {
    workspace: PathBuf,
}

impl SearchFilesTool {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern, searched recursively from the \
         workspace root. Examples: *.rs | src/**/*.ts | **/Cargo.toml. \
         Common build and VCS directories are skipped. max_results: 200 by \
         default. For content search use search_file_content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern, e.g. '**/*.rs'"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default 200)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: &Value) -> ToolResult {
        let Some(pattern_str) = params.get("pattern").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'pattern'");
        };
        let max = params
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_RESULTS as u64) as usize;

        // Bare patterns match anywhere in the tree.
        let effective = if pattern_str.contains('/') {
            pattern_str.to_string()
        } else {
            format!("**/{pattern_str}")
        };
        let pattern = match Pattern::new(&effective) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(format!("invalid glob pattern: {e}")),
        };

        debug!(pattern = %effective, "search_files tool");

        let workspace = self.workspace.clone();
        let matches = tokio::task::spawn_blocking(move || {
            let mut found: Vec<String> = Vec::new();
            let walker = WalkDir::new(&workspace).into_iter().filter_entry(|e| {
                !(e.file_type().is_dir()
                    && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
            });
            for entry in walker.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&workspace)
                    .unwrap_or(entry.path());
                if pattern.matches_path(rel) {
                    found.push(rel.to_string_lossy().into_owned());
                    if found.len() >= max {
                        break;
                    }
                }
            }
            found.sort();
            found
        })
        .await;

        match matches {
            Ok(found) if found.is_empty() => ToolResult::ok("(no matches)"),
            Ok(found) => ToolResult::ok(found.join("\n")),
            Err(e) => ToolResult::err(format!("search task failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
