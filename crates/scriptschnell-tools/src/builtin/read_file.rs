// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::fsx::Filesystem;
use crate::tool::{Tool, ToolResult};

/// Default number of lines returned when the caller does not specify a
/// limit.  Kept small to avoid flooding the model context on the first
/// read; the agent can paginate with offset + limit.
const DEFAULT_LINE_LIMIT: usize = 200;

/// Hard byte ceiling applied in addition to the line limit.  Whichever
/// constraint is hit first determines where the output is cut.
const MAX_BYTES: usize = 20_000;

pub struct ReadFileTool {
    fs: Arc<dyn Filesystem>,
}

impl ReadFileTool {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a text file. Default: 200 lines / 20 KB, whichever comes first.\n\
         Lines are formatted as L{n}:content (1-indexed). When more lines exist,\n\
         a pagination notice shows the next offset. Use search_file_content to\n\
         find the relevant region first, then read only those lines."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative or absolute path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 200)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: &Value) -> ToolResult {
        let Some(path) = params.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing required parameter 'path'");
        };
        let offset = params.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let limit = params
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        debug!(path, offset, limit, "read_file tool");

        let bytes = match self.fs.read_file(Path::new(path)).await {
            Ok(b) => b,
            Err(e) => return ToolResult::err(format!("read error: {e}")),
        };

        if has_binary_content(&bytes) {
            return ToolResult::err(format!(
                "binary file ({} bytes); read_file only handles text",
                bytes.len()
            ));
        }

        let text = String::from_utf8_lossy(&bytes);
        let start = offset.saturating_sub(1);
        let all_lines: Vec<&str> = text.lines().collect();
        let total = all_lines.len();

        let mut selected: Vec<String> = Vec::new();
        let mut byte_count: usize = 0;
        let mut truncated_by_bytes = false;
        for (i, line) in all_lines.iter().enumerate().skip(start).take(limit) {
            let line_bytes = line.len() + 1;
            if byte_count + line_bytes > MAX_BYTES {
                truncated_by_bytes = true;
                break;
            }
            selected.push(format!("L{}:{}", i + 1, line));
            byte_count += line_bytes;
        }

        let last_shown = start + selected.len();
        let mut content = selected.join("\n");

        if last_shown < total {
            let reason = if truncated_by_bytes {
                format!("byte limit ({MAX_BYTES} B) reached")
            } else {
                format!("{} more lines", total - last_shown)
            };
            content.push_str(&format!(
                "\n...[{reason} — showing L{}-L{} of {}; use offset={} to continue]",
                offset,
                offset + selected.len().saturating_sub(1),
                total,
                last_shown + 1
            ));
        }

        ToolResult::ok(content)
    }
}

/// Samples up to 4096 bytes to decide whether content is binary: any null
/// byte, or more than 30% non-printable bytes.
pub(crate) fn has_binary_content(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let sample = &bytes[..bytes.len().min(4096)];
    if sample.contains(&0u8) {
        return true;
    }
    let non_printable = sample.iter().filter(|&&b| b < 9 || (b > 13 && b < 32)).count();
    non_printable * 100 / sample.len() > 30
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
