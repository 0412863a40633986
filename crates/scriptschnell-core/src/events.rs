// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tracing::warn;

/// Where a progress update belongs in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Streamed assistant output — belongs in the transcript.
    Stream,
    /// Status-line information (authorization prompts, menu actions).
    Status,
    /// Both surfaces at once (tool activity).
    Both,
}

/// One progress event dispatched by the orchestrator to its front-end.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub message: String,
    pub reasoning: Option<String>,
    pub mode: UpdateMode,
    /// Ephemeral updates may be overwritten by the next one; persistent
    /// updates stay in the transcript.
    pub ephemeral: bool,
}

impl ProgressUpdate {
    pub fn stream(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reasoning: None,
            mode: UpdateMode::Stream,
            ephemeral: false,
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reasoning: None,
            mode: UpdateMode::Status,
            ephemeral: false,
        }
    }

    pub fn both(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reasoning: None,
            mode: UpdateMode::Both,
            ephemeral: false,
        }
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// Callback through which the orchestrator reports progress.  A missing
/// callback drops events; a callback error is logged and otherwise
/// ignored.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) -> anyhow::Result<()> + Send + Sync>;

pub(crate) fn emit(callback: &Option<ProgressCallback>, update: ProgressUpdate) {
    if let Some(cb) = callback {
        if let Err(e) = cb(update) {
            warn!(error = %e, "progress callback failed");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
