// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{Client, KeyCheck, ModelInfo, ProviderError};

/// One remote model provider: discovery, key validation, client creation.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// List the models this provider offers.
    ///
    /// Implementations must fall back to the hardcoded curated list when the
    /// remote catalog endpoint errors or returns nothing usable, so the
    /// assistant stays usable offline for previously-known model ids.
    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>>;

    /// Construct a client for `model_id`.  A blank id selects the provider's
    /// default model; a missing API key is an error for providers that
    /// require one.
    fn create_client(&self, model_id: &str) -> Result<Box<dyn Client>, ProviderError>;

    /// Cheap authenticated probe: list models, or a 1-token completion for
    /// providers without a catalog endpoint.
    async fn validate_api_key(&self) -> KeyCheck;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("provider not registered: {0}")]
    NotRegistered(String),
}

/// Name → provider lookup plus a model-discovery cache.
pub struct ProviderRegistry {
    providers: HashMap<String, Box<dyn Provider>>,
    /// Last refreshed model lists, keyed by provider name.  Guarded by a
    /// mutex: refresh fan-out writes concurrently with UI reads.
    model_cache: Mutex<HashMap<String, Vec<ModelInfo>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            model_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, provider: Box<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_provider(&self, name: &str) -> Result<&dyn Provider, RegistryError> {
        self.providers
            .get(name)
            .map(|p| p.as_ref())
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))
    }

    /// Refresh every provider's model list concurrently.  A provider's
    /// failure is logged and never fatal; its previous cache entry is kept.
    pub async fn refresh_all_models(&self) {
        let futures: Vec<_> = self
            .providers
            .values()
            .map(|p| async move { (p.name().to_string(), p.list_models().await) })
            .collect();

        for (name, result) in futures::future::join_all(futures).await {
            match result {
                Ok(models) => {
                    debug!(provider = %name, count = models.len(), "refreshed model list");
                    self.model_cache.lock().unwrap().insert(name, models);
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "model refresh failed");
                }
            }
        }
    }

    /// The last refreshed model list for `provider`, if any.
    pub fn cached_models(&self, provider: &str) -> Option<Vec<ModelInfo>> {
        self.model_cache.lock().unwrap().get(provider).cloned()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Model filtering ──────────────────────────────────────────────────────────

/// Model-id fragments that mark non-chat models (embeddings, audio,
/// moderation).  These never belong in a coding-assistant picker.
const EXCLUDED_ID_FRAGMENTS: &[&str] = &[
    "embedding",
    "tts",
    "whisper",
    "dall-e",
    "moderation",
    "guard",
    "audio",
    "speech",
];

/// Filtering rules applied to remote catalog entries:
/// - drop non-chat model families by id fragment,
/// - drop fine-tunes (`:` in the id) on OpenAI — local model stores use `:`
///   as a tag separator and are kept,
/// - drop entries whose declared `active` field is false.
pub(crate) fn should_include_model(provider: &str, id: &str, active: Option<bool>) -> bool {
    if active == Some(false) {
        return false;
    }
    let lower = id.to_lowercase();
    if EXCLUDED_ID_FRAGMENTS.iter().any(|f| lower.contains(f)) {
        return false;
    }
    if id.contains(':') && provider == "openai" {
        return false;
    }
    true
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::OnChunk;
    use crate::{CompletionRequest, CompletionResponse};

    struct FakeProvider {
        name: &'static str,
        fail: bool,
    }

    struct NoopClient;

    #[async_trait]
    impl Client for NoopClient {
        fn model_name(&self) -> &str {
            "noop"
        }
        async fn complete_request(
            &self,
            _req: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse::default())
        }
        async fn stream(
            &self,
            _req: &CompletionRequest,
            _on_chunk: OnChunk<'_>,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse::default())
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }
        async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
            if self.fail {
                anyhow::bail!("remote catalog unavailable")
            }
            Ok(vec![ModelInfo {
                id: format!("{}-model", self.name),
                name: "Fake".into(),
                provider: self.name.into(),
                description: String::new(),
                context_window: 1000,
                max_output_tokens: 100,
                supports_tool_calling: true,
                supports_streaming: true,
                owned_by: "test".into(),
                capabilities: vec![],
            }])
        }
        fn create_client(&self, _model_id: &str) -> Result<Box<dyn Client>, ProviderError> {
            Ok(Box::new(NoopClient))
        }
        async fn validate_api_key(&self) -> KeyCheck {
            KeyCheck::Valid
        }
    }

    #[test]
    fn list_providers_is_sorted() {
        let mut reg = ProviderRegistry::new();
        reg.register(Box::new(FakeProvider { name: "zeta", fail: false }));
        reg.register(Box::new(FakeProvider { name: "alpha", fail: false }));
        assert_eq!(reg.list_providers(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn get_unknown_provider_is_not_registered_error() {
        let reg = ProviderRegistry::new();
        match reg.get_provider("nope") {
            Err(err) => assert_eq!(err, RegistryError::NotRegistered("nope".into())),
            Ok(_) => panic!("expected get_provider to fail"),
        }
    }

    #[tokio::test]
    async fn refresh_populates_cache_and_tolerates_failures() {
        let mut reg = ProviderRegistry::new();
        reg.register(Box::new(FakeProvider { name: "good", fail: false }));
        reg.register(Box::new(FakeProvider { name: "bad", fail: true }));

        reg.refresh_all_models().await;

        assert_eq!(reg.cached_models("good").unwrap().len(), 1);
        assert!(reg.cached_models("bad").is_none(), "failed refresh leaves no entry");
    }

    // ── Filtering rules ───────────────────────────────────────────────────────

    #[test]
    fn non_chat_families_are_dropped() {
        for id in [
            "text-embedding-3-small",
            "tts-1",
            "whisper-1",
            "dall-e-3",
            "omni-moderation-latest",
            "llama-guard-3-8b",
            "gpt-4o-audio-preview",
            "speech-02",
        ] {
            assert!(!should_include_model("openai", id, None), "{id} must be dropped");
        }
    }

    #[test]
    fn chat_models_are_kept() {
        assert!(should_include_model("openai", "gpt-4o", None));
        assert!(should_include_model("groq", "llama-3.3-70b-versatile", None));
    }

    #[test]
    fn openai_fine_tunes_are_dropped() {
        assert!(!should_include_model(
            "openai",
            "ft:gpt-4o-mini:acme::abc123",
            None
        ));
    }

    #[test]
    fn colon_tags_kept_for_local_stores() {
        assert!(should_include_model("ollama", "qwen3:8b", None));
    }

    #[test]
    fn inactive_entries_are_dropped() {
        assert!(!should_include_model("mistral", "mistral-large-latest", Some(false)));
        assert!(should_include_model("mistral", "mistral-large-latest", Some(true)));
    }
}
