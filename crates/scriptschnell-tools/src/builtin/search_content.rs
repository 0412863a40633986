// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::builtin::read_file::has_binary_content;
use crate::builtin::search_files::SKIP_DIRS;
use crate::tool::{Tool, ToolResult};

const DEFAULT_MAX_MATCHES: usize = 100;
/// Files larger than this are skipped; grep output from them is rarely
/// useful to the model and the scan cost adds up.
const MAX_FILE_BYTES: u64 = 2_000_000;

/// Regex search over file contents, with binary files skipped.
pub struct SearchFileContentTool {
    workspace: PathBuf,
}

impl SearchFileContentTool {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }
}

#[async_trait]
impl Tool for SearchFileContentTool {
    fn name(&self) -> &str {
        "search_file_content"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns \
         path:line:content matches, leading matches first. Binary files and \
         common build directories are skipped. max_matches: 100 by default."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Subdirectory to search (default: workspace root)"
                },
                "max_matches": {
                    "type": "integer",
                    "description": "Maximum number of matches (default 100)"
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
        let regex = match Regex::new(pattern_str) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(format!("invalid regex: {e}")),
        };
        let max = params
            .get("max_matches")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_MATCHES as u64) as usize;
        let root = match params.get("path").and_then(|v| v.as_str()) {
            Some(sub) => self.workspace.join(sub),
            None => self.workspace.clone(),
        };

        debug!(pattern = pattern_str, root = %root.display(), "search_file_content tool");

        let workspace = self.workspace.clone();
        let matches = tokio::task::spawn_blocking(move || {
            let mut found: Vec<String> = Vec::new();
            let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
                !(e.file_type().is_dir()
                    && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
            });
            'files: for entry in walker.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.metadata().map(|m| m.len()).unwrap_or(0) > MAX_FILE_BYTES {
                    continue;
                }
                let Ok(bytes) = std::fs::read(entry.path()) else {
                    continue;
                };
                if has_binary_content(&bytes) {
                    continue;
                }
                let text = String::from_utf8_lossy(&bytes);
                let rel = entry
                    .path()
                    .strip_prefix(&workspace)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .into_owned();
                for (i, line) in text.lines().enumerate() {
                    if regex.is_match(line) {
                        found.push(format!("{rel}:{}:{}", i + 1, line.trim_end()));
                        if found.len() >= max {
                            break 'files;
                        }
                    }
                }
            }
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
