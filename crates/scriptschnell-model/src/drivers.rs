// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Driver registry: static metadata for every supported provider, plus the
//! concrete [`Provider`] implementation they all share.
//!
//! This module is the single source of truth for which provider ids exist
//! and what their defaults are.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog;
use crate::chat::{AuthStyle, ChatCompletionsClient};
use crate::provider::{should_include_model, Provider};
use crate::responses::{requires_responses_endpoint, ResponsesClient};
use crate::{
    AnthropicClient, Client, CompletionRequest, KeyCheck, ModelInfo, OllamaClient, ProviderError,
};
use scriptschnell_config::ModelConfig;

/// Metadata describing a registered model driver.
#[derive(Debug, Clone)]
pub struct DriverMeta {
    /// Unique provider id used in the `model.provider` config field.
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// One-line description for provider listings.
    pub description: &'static str,
    /// Default environment variable that holds the API key.  `None` for
    /// providers that require no key (local servers).
    pub default_api_key_env: Option<&'static str>,
    /// Default base URL when the user does not set `base_url` in config.
    /// `None` means the user must supply one.
    pub default_base_url: Option<&'static str>,
    pub requires_api_key: bool,
}

pub static DRIVERS: &[DriverMeta] = &[
    DriverMeta {
        id: "openai",
        name: "OpenAI",
        description: "OpenAI GPT and o-series models",
        default_api_key_env: Some("OPENAI_API_KEY"),
        default_base_url: Some("https://api.openai.com/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "anthropic",
        name: "Anthropic",
        description: "Anthropic Claude models",
        default_api_key_env: Some("ANTHROPIC_API_KEY"),
        default_base_url: Some("https://api.anthropic.com"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "groq",
        name: "Groq",
        description: "Open-weights models on Groq hardware",
        default_api_key_env: Some("GROQ_API_KEY"),
        default_base_url: Some("https://api.groq.com/openai/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "mistral",
        name: "Mistral",
        description: "Mistral AI models",
        default_api_key_env: Some("MISTRAL_API_KEY"),
        default_base_url: Some("https://api.mistral.ai/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "kimi",
        name: "Kimi",
        description: "Moonshot Kimi models",
        default_api_key_env: Some("MOONSHOT_API_KEY"),
        default_base_url: Some("https://api.moonshot.ai/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "openrouter",
        name: "OpenRouter",
        description: "OpenRouter gateway (many providers)",
        default_api_key_env: Some("OPENROUTER_API_KEY"),
        default_base_url: Some("https://openrouter.ai/api/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "cerebras",
        name: "Cerebras",
        description: "Open-weights models on Cerebras wafers",
        default_api_key_env: Some("CEREBRAS_API_KEY"),
        default_base_url: Some("https://api.cerebras.ai/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "ollama",
        name: "Ollama",
        description: "Local models served by Ollama",
        default_api_key_env: None,
        default_base_url: Some("http://localhost:11434"),
        requires_api_key: false,
    },
    DriverMeta {
        id: "openai-compatible",
        name: "OpenAI-compatible",
        description: "Any OpenAI-compatible server (set base_url)",
        default_api_key_env: None,
        default_base_url: None,
        requires_api_key: false,
    },
];

pub fn list_drivers() -> impl Iterator<Item = &'static DriverMeta> {
    DRIVERS.iter()
}

pub fn known_driver_ids() -> impl Iterator<Item = &'static str> {
    DRIVERS.iter().map(|m| m.id)
}

pub fn lookup_driver(id: &str) -> Option<&'static DriverMeta> {
    DRIVERS.iter().find(|m| m.id == id)
}

/// Build the provider for one driver from its configuration.
pub(crate) fn provider_from_config(meta: &'static DriverMeta, cfg: &ModelConfig) -> Box<dyn Provider> {
    let base_url = cfg
        .base_url
        .clone()
        .or_else(|| meta.default_base_url.map(String::from))
        .unwrap_or_default();
    Box::new(HttpProvider {
        meta,
        api_key: crate::resolve_api_key(cfg),
        base_url,
        configured_model: cfg.name.clone(),
        max_tokens: cfg.max_tokens,
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default(),
    })
}

/// The shared provider implementation: all supported drivers differ only in
/// endpoint family, auth header, and defaults.
struct HttpProvider {
    meta: &'static DriverMeta,
    api_key: Option<String>,
    base_url: String,
    configured_model: String,
    max_tokens: Option<u32>,
    http: reqwest::Client,
}

impl HttpProvider {
    fn default_model_id(&self) -> Option<String> {
        if !self.configured_model.is_empty() {
            return Some(self.configured_model.clone());
        }
        catalog::default_model(self.meta.id)
    }

    fn extra_headers(&self) -> Vec<(String, String)> {
        if self.meta.id == "openrouter" {
            vec![
                ("HTTP-Referer".into(), "https://github.com/scriptschnell/scriptschnell".into()),
                ("X-Title".into(), "scriptschnell".into()),
            ]
        } else {
            vec![]
        }
    }

    /// Fetch `GET {base}/models` and decode the OpenAI-style listing.
    async fn fetch_remote_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let mut req = self.http.get(&url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("models endpoint returned {}", resp.status());
        }
        let body: Value = resp.json().await?;

        let curated = catalog::for_provider(self.meta.id);
        let mut entries: Vec<ModelInfo> = Vec::new();
        if let Some(data) = body["data"].as_array() {
            for item in data {
                let Some(id) = item["id"].as_str() else { continue };
                let active = item.get("active").and_then(|a| a.as_bool());
                if !should_include_model(self.meta.id, id, active) {
                    continue;
                }
                // Enrich with curated metadata when available.
                if let Some(known) = curated.iter().find(|e| e.id == id) {
                    entries.push(known.clone());
                } else {
                    entries.push(ModelInfo {
                        id: id.to_string(),
                        name: id.to_string(),
                        provider: self.meta.id.to_string(),
                        description: String::new(),
                        context_window: item["context_window"]
                            .as_u64()
                            .or_else(|| item["context_length"].as_u64())
                            .unwrap_or(0) as u32,
                        max_output_tokens: item["max_output_tokens"].as_u64().unwrap_or(0) as u32,
                        supports_tool_calling: true,
                        supports_streaming: true,
                        owned_by: item["owned_by"].as_str().unwrap_or("").to_string(),
                        capabilities: vec![],
                    });
                }
            }
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        self.meta.id
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let curated = catalog::for_provider(self.meta.id);

        // Anthropic has no OpenAI-style catalog endpoint worth probing;
        // the curated list is authoritative.
        if self.meta.id == "anthropic" {
            return Ok(curated);
        }
        // A keyed provider without a key cannot query its catalog.
        if self.meta.requires_api_key && self.api_key.is_none() {
            return Ok(curated);
        }
        if self.base_url.is_empty() {
            return Ok(curated);
        }

        match self.fetch_remote_models().await {
            Ok(entries) if !entries.is_empty() => Ok(entries),
            Ok(_) => {
                debug!(provider = %self.meta.id, "remote catalog empty, using curated list");
                Ok(curated)
            }
            Err(e) => {
                warn!(provider = %self.meta.id, error = %e, "remote catalog failed, using curated list");
                Ok(curated)
            }
        }
    }

    fn create_client(&self, model_id: &str) -> Result<Box<dyn Client>, ProviderError> {
        let model = if model_id.is_empty() {
            self.default_model_id().ok_or_else(|| {
                ProviderError::Other(format!("no default model for provider {}", self.meta.id))
            })?
        } else {
            model_id.to_string()
        };

        if self.meta.requires_api_key && self.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(ProviderError::Auth(format!(
                "API key not configured for {} (set {})",
                self.meta.id,
                self.meta.default_api_key_env.unwrap_or("api_key"),
            )));
        }

        match self.meta.id {
            "anthropic" => Ok(Box::new(AnthropicClient::new(
                model,
                self.api_key.clone().unwrap_or_default(),
                Some(self.base_url.clone()),
                self.max_tokens,
            ))),
            "ollama" => Ok(Box::new(OllamaClient::new(
                model,
                Some(self.base_url.clone()),
            ))),
            // The endpoint family is chosen once, here: reasoning-model ids
            // go to the responses endpoint, everything else to chat.
            "openai" if requires_responses_endpoint(&model) => Ok(Box::new(ResponsesClient::new(
                "openai",
                model,
                self.api_key.clone(),
                &self.base_url,
                self.max_tokens,
            ))),
            _ => {
                if self.base_url.is_empty() {
                    return Err(ProviderError::Other(format!(
                        "provider {} requires base_url in config",
                        self.meta.id
                    )));
                }
                let auth = if self.api_key.is_some() {
                    AuthStyle::Bearer
                } else {
                    AuthStyle::None
                };
                Ok(Box::new(ChatCompletionsClient::new(
                    self.meta.id,
                    model,
                    self.api_key.clone(),
                    &self.base_url,
                    self.max_tokens,
                    self.extra_headers(),
                    auth,
                    Duration::from_secs(60),
                )))
            }
        }
    }

    async fn validate_api_key(&self) -> KeyCheck {
        // Anthropic has no cheap catalog probe — issue a 1-token completion.
        if self.meta.id == "anthropic" {
            let Some(key) = self.api_key.clone() else {
                return KeyCheck::InvalidKey;
            };
            let client =
                AnthropicClient::new("claude-haiku-4-5", key, Some(self.base_url.clone()), Some(1));
            let req = CompletionRequest {
                messages: vec![crate::Message::user("hi")],
                max_tokens: Some(1),
                ..Default::default()
            };
            return match client.complete_request(&req).await {
                Ok(_) => KeyCheck::Valid,
                Err(ProviderError::Auth(_)) => KeyCheck::InvalidKey,
                Err(_) => KeyCheck::Network,
            };
        }

        if self.meta.requires_api_key && self.api_key.is_none() {
            return KeyCheck::InvalidKey;
        }
        if self.base_url.is_empty() {
            return KeyCheck::Network;
        }

        let url = if self.meta.id == "ollama" {
            format!("{}/api/tags", self.base_url.trim_end_matches('/'))
        } else {
            format!("{}/models", self.base_url.trim_end_matches('/'))
        };
        let mut req = self.http.get(&url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        match req.send().await {
            Ok(resp) if resp.status().is_success() => KeyCheck::Valid,
            Ok(resp) if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 => {
                KeyCheck::InvalidKey
            }
            Ok(_) => KeyCheck::Network,
            Err(_) => KeyCheck::Network,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
