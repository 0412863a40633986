// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

use crate::{CompletionRequest, CompletionResponse, ProviderError};

/// Streaming callback: invoked synchronously for every non-empty text delta.
/// Returning an error aborts the stream.
pub type OnChunk<'a> = &'a mut (dyn FnMut(&str) -> anyhow::Result<()> + Send);

/// One chat session with one remote model.
#[async_trait]
pub trait Client: Send + Sync {
    fn model_name(&self) -> &str;

    /// Convenience completion: wrap `prompt` in a single user message and
    /// return the text content.
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let req = CompletionRequest::from_prompt(prompt);
        let resp = self.complete_request(&req).await?;
        Ok(resp.content)
    }

    /// Full request/response completion.
    async fn complete_request(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Streaming completion.  Text deltas are delivered through `on_chunk`
    /// in server order; the returned response carries the buffered content
    /// plus any tool calls, so finishing a stream is equivalent to
    /// `complete_request` finishing.
    async fn stream(
        &self,
        req: &CompletionRequest,
        on_chunk: OnChunk<'_>,
    ) -> Result<CompletionResponse, ProviderError>;
}

/// Conservative prefix match over the model id for families that reject a
/// sampling temperature (reasoning models, newer flagship chat models).
/// Clients send temperature = 1 for these regardless of the request.
///
/// Gateway-prefixed ids ("openai/o3-mini") are matched on the part after
/// the provider prefix.
pub fn is_temperature_unsupported(model_id: &str) -> bool {
    const PREFIXES: &[&str] = &["o1", "o3", "o4", "gpt-5"];
    let bare = model_id.rsplit('/').next().unwrap_or(model_id);
    PREFIXES.iter().any(|p| bare.starts_with(p))
}

/// The temperature actually sent on the wire for `model_id`.
pub fn effective_temperature(model_id: &str, requested: Option<f32>) -> f32 {
    if is_temperature_unsupported(model_id) {
        1.0
    } else {
        requested.unwrap_or(0.2)
    }
}
