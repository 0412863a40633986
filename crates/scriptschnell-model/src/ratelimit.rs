// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Optional rate-limiting wrapper around any [`Client`].
//!
//! Enforces a minimum interval between calls and a tokens-per-minute budget
//! estimated from the request payload.  When the budget is exhausted the
//! next call sleeps until the window recovers; cancelling the caller's
//! future abandons the wait.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::client::{Client, OnChunk};
use crate::{CompletionRequest, CompletionResponse, ProviderError};

pub struct RateLimitedClient {
    inner: Box<dyn Client>,
    min_interval: Duration,
    /// 0 disables the token budget.
    tokens_per_minute: u64,
    state: Mutex<LimiterState>,
}

struct LimiterState {
    last_call: Option<Instant>,
    window_start: Instant,
    tokens_used: u64,
}

impl RateLimitedClient {
    pub fn new(inner: Box<dyn Client>, min_interval: Duration, tokens_per_minute: u64) -> Self {
        Self {
            inner,
            min_interval,
            tokens_per_minute,
            state: Mutex::new(LimiterState {
                last_call: None,
                window_start: Instant::now(),
                tokens_used: 0,
            }),
        }
    }

    /// Block until both the interval gate and the token budget admit a call
    /// estimated at `estimated_tokens`.
    async fn acquire(&self, estimated_tokens: u64) {
        let mut state = self.state.lock().await;

        if let Some(last) = state.last_call {
            let since = last.elapsed();
            if since < self.min_interval {
                let wait = self.min_interval - since;
                debug!(wait_ms = wait.as_millis() as u64, "rate limit: interval gate");
                tokio::time::sleep(wait).await;
            }
        }

        if self.tokens_per_minute > 0 {
            loop {
                if state.window_start.elapsed() >= Duration::from_secs(60) {
                    state.window_start = Instant::now();
                    state.tokens_used = 0;
                }
                if state.tokens_used + estimated_tokens <= self.tokens_per_minute {
                    break;
                }
                let recover_in =
                    Duration::from_secs(60).saturating_sub(state.window_start.elapsed());
                debug!(
                    wait_ms = recover_in.as_millis() as u64,
                    "rate limit: token budget exhausted"
                );
                tokio::time::sleep(recover_in).await;
            }
            state.tokens_used += estimated_tokens;
        }

        state.last_call = Some(Instant::now());
    }
}

#[async_trait]
impl Client for RateLimitedClient {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete_request(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.acquire(req.approx_tokens() as u64).await;
        self.inner.complete_request(req).await
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
        on_chunk: OnChunk<'_>,
    ) -> Result<CompletionResponse, ProviderError> {
        self.acquire(req.approx_tokens() as u64).await;
        self.inner.stream(req, on_chunk).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
