// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::authorize::AuthKind;
use crate::tool::{Tool, ToolResult};

/// Response bytes beyond this are cut; pages routinely embed megabytes of
/// script the model has no use for.
const MAX_RESPONSE_BYTES: usize = 100_000;

/// Fetch a URL over HTTPS.  The target domain is presented to the
/// authorizer before any request leaves the machine.
pub struct WebFetchTool {
    http: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return the response body as text (truncated to \
         100 KB). Only http/https URLs; the domain must be authorized."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Absolute http(s) URL to fetch"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    fn authorization(&self, params: &Value) -> Option<(AuthKind, String)> {
        let url = params.get("url").and_then(|v| v.as_str())?;
        Some((AuthKind::Domain, host_of(url).unwrap_or_default()))
    }

    async fn execute(&self, params: &Value) -> ToolResult {
        let Some(url) = params.get("url").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'url'");
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolResult::err("only http(s) URLs are supported");
        }
        if host_of(url).is_none() {
            return ToolResult::err("URL has no host");
        }

        debug!(url, "web_fetch tool");

        let resp = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::err(format!("fetch error: {e}")),
        };
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        let mut text = if body.len() > MAX_RESPONSE_BYTES {
            let mut cut = MAX_RESPONSE_BYTES;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            format!(
                "{}\n...[truncated at {} bytes of {}]",
                &body[..cut],
                MAX_RESPONSE_BYTES,
                body.len()
            )
        } else {
            body
        };
        if !status.is_success() {
            text = format!("HTTP {status}\n{text}");
        }
        ToolResult::ok(text)
    }
}

/// Extract the host portion of an http(s) URL, dropping credentials and
/// port.
fn host_of(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
