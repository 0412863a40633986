// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::authorize::AuthKind;
use crate::tool::{Tool, ToolResult};

const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Combined stdout+stderr cap; long build logs get tail-truncated.
const MAX_OUTPUT_BYTES: usize = 50_000;

/// Run a shell command in the workspace.  The full command line is
/// presented to the authorizer before anything executes.
pub struct RunShellTool {
    workspace: PathBuf,
    timeout: Duration,
}

impl RunShellTool {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for RunShellTool {
    fn name(&self) -> &str {
        "run_shell"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its combined \
         stdout/stderr plus exit status. Commands time out after 60 s by \
         default; long output is truncated."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command line passed to `sh -c`"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Seconds before the command is killed (default 60)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn authorization(&self, params: &Value) -> Option<(AuthKind, String)> {
        Some((
            AuthKind::ShellCommand,
            params
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        ))
    }

    async fn execute(&self, params: &Value) -> ToolResult {
        let Some(command) = params.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'command'");
        };
        let timeout = params
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        debug!(command, timeout_secs = timeout.as_secs(), "run_shell tool");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return ToolResult::err(format!("spawn error: {e}")),
            Err(_) => {
                return ToolResult::err(format!(
                    "command timed out after {} s",
                    timeout.as_secs()
                ))
            }
        };

        let mut text = String::new();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("stderr:\n");
            text.push_str(&stderr);
        }
        if text.len() > MAX_OUTPUT_BYTES {
            let mut cut = MAX_OUTPUT_BYTES;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n...[output truncated]");
        }

        let code = output.status.code().unwrap_or(-1);
        if output.status.success() {
            ToolResult::ok(text)
        } else {
            ToolResult::err(format!("exit status {code}\n{text}"))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> (tempfile::TempDir, RunShellTool) {
        let dir = tempfile::tempdir().unwrap();
        let t = RunShellTool::new(dir.path());
        (dir, t)
    }

    #[tokio::test]
    async fn captures_stdout() {
        let (_dir, t) = tool();
        let out = t.execute(&json!({"command": "echo hello"})).await;
        assert!(!out.is_error());
        assert!(out.result.contains("hello"));
    }

    #[tokio::test]
    async fn runs_in_the_workspace() {
        let (dir, t) = tool();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = t.execute(&json!({"command": "ls"})).await;
        assert!(out.result.contains("marker.txt"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_status() {
        let (_dir, t) = tool();
        let out = t.execute(&json!({"command": "exit 3"})).await;
        assert!(out.is_error());
        assert!(out.text().contains("exit status 3"));
    }

    #[tokio::test]
    async fn stderr_is_captured_and_labelled() {
        let (_dir, t) = tool();
        let out = t.execute(&json!({"command": "echo oops >&2"})).await;
        assert!(out.result.contains("stderr:"));
        assert!(out.result.contains("oops"));
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let (_dir, t) = tool();
        let out = t
            .execute(&json!({"command": "sleep 30", "timeout_secs": 1}))
            .await;
        assert!(out.is_error());
        assert!(out.text().contains("timed out"));
    }

    #[test]
    fn authorization_presents_the_command_line() {
        let (_dir, t) = tool();
        let (kind, subject) = t
            .authorization(&json!({"command": "git status"}))
            .unwrap();
        assert_eq!(kind, AuthKind::ShellCommand);
        assert_eq!(subject, "git status");
    }

    #[tokio::test]
    async fn missing_command_is_error() {
        let (_dir, t) = tool();
        let out = t.execute(&json!({})).await;
        assert!(out.is_error());
    }
}
