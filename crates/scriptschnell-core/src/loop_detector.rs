// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Detects a model stuck repeating the same tool call.
//!
//! A loop is three or more strictly consecutive calls with identical name
//! and identical argument values; a single differing call in between
//! resets the run.

use chrono::{DateTime, Utc};
use serde_json::Value;

const MAX_HISTORY: usize = 12;
const THRESHOLD: usize = 3;

/// One observed tool call.  Held only in the in-memory ring; never
/// persisted.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Default)]
pub struct LoopDetector {
    history: Vec<ToolCallRecord>,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call and report whether it completes a loop: counting from
    /// the tail backward, at least `THRESHOLD` consecutive records share
    /// this call's fingerprint.  Counting stops at the first non-matching
    /// record.
    pub fn record_and_check(&mut self, tool_name: &str, arguments: &Value) -> bool {
        self.history.push(ToolCallRecord {
            timestamp: Utc::now(),
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
        });
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }

        let mut consecutive = 0;
        for record in self.history.iter().rev() {
            if record.tool_name == tool_name && args_equal(&record.arguments, arguments) {
                consecutive += 1;
            } else {
                break;
            }
        }
        consecutive >= THRESHOLD
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Argument equality for fingerprinting: same key set, and for each key the
/// stringified values are equal.  Non-object arguments compare by their
/// string rendering.
fn args_equal(a: &Value, b: &Value) -> bool {
    match (a.as_object(), b.as_object()) {
        (Some(ma), Some(mb)) => {
            if ma.len() != mb.len() {
                return false;
            }
            ma.iter().all(|(k, va)| {
                mb.get(k)
                    .map(|vb| value_string(va) == value_string(vb))
                    .unwrap_or(false)
            })
        }
        _ => value_string(a) == value_string(b),
    }
}

fn value_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
