// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Cancellation plumbing for one orchestrator turn.
//!
//! A single handle fans out to any number of token clones: the LLM call,
//! every tool execution, and `parallel_tools` sub-calls all observe the
//! same signal.  Built on a `tokio::sync::watch` channel so that tokens
//! are cheap to clone and waiting is allocation-free.

use std::sync::Arc;

use tokio::sync::watch;

/// Create a linked (handle, token) pair for one turn.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx: Arc::new(tx) },
        CancelToken {
            rx,
            _keep_alive: None,
        },
    )
}

/// The sender half, held by whoever may cancel the turn.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
            _keep_alive: None,
        }
    }
}

/// The receiver half, observed at every suspension point.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    /// Keeps the sender alive for tokens that can never fire.
    _keep_alive: Option<Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    /// A token that never cancels, for callers without a cancel source.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keep_alive: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when the turn is cancelled.  Also resolves if the handle is
    /// dropped, which counts as cancellation.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without an explicit cancel.
                return;
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_observes_cancel() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await; // must resolve immediately
    }

    #[tokio::test]
    async fn cloned_tokens_share_the_signal() {
        let (handle, token) = cancel_pair();
        let clone = token.clone();
        handle.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_handle_counts_as_cancellation() {
        let (handle, token) = cancel_pair();
        drop(handle);
        token.cancelled().await; // resolves because the sender is gone
    }

    #[tokio::test]
    async fn never_token_does_not_fire() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        let raced = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            token.cancelled(),
        )
        .await;
        assert!(raced.is_err(), "never-token must not resolve");
    }
}
