// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
pub mod normalize;
mod anthropic;
mod chat;
mod client;
mod drivers;
mod error;
mod mock;
mod ollama;
mod provider;
mod ratelimit;
mod responses;
mod types;

pub use anthropic::AnthropicClient;
pub use chat::{AuthStyle, ChatCompletionsClient};
pub use client::{effective_temperature, is_temperature_unsupported, Client, OnChunk};
pub use drivers::{known_driver_ids, list_drivers, lookup_driver, DriverMeta};
pub use error::{KeyCheck, ProviderError};
pub use mock::{MockClient, ScriptedMockClient};
pub use ollama::OllamaClient;
pub use provider::{Provider, ProviderRegistry, RegistryError};
pub use ratelimit::RateLimitedClient;
pub use responses::ResponsesClient;
pub use types::*;

use scriptschnell_config::ModelConfig;

/// Build the default [`ProviderRegistry`] holding one provider per known
/// driver, configured from `cfg` where a matching entry exists.
///
/// `cfg` supplies the primary model configuration; named entries in
/// `extra_providers` add or override drivers by id.
pub fn registry_from_config(
    cfg: &ModelConfig,
    extra_providers: &std::collections::HashMap<String, ModelConfig>,
) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for meta in drivers::list_drivers() {
        let model_cfg = if cfg.provider == meta.id {
            cfg.clone()
        } else if let Some(named) = extra_providers.get(meta.id) {
            named.clone()
        } else {
            ModelConfig {
                provider: meta.id.to_string(),
                ..ModelConfig::default()
            }
        };
        registry.register(drivers::provider_from_config(meta, &model_cfg));
    }
    registry
}

/// Resolve the API key for a model configuration: explicit key first, then
/// the configured env var, then the driver's default env var.
pub(crate) fn resolve_api_key(cfg: &ModelConfig) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        if !k.is_empty() {
            return Some(k.clone());
        }
    }
    if let Some(env) = &cfg.api_key_env {
        if let Ok(v) = std::env::var(env) {
            return Some(v);
        }
    }
    if let Some(meta) = drivers::lookup_driver(&cfg.provider) {
        if let Some(env_var) = meta.default_api_key_env {
            return std::env::var(env_var).ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptschnell_config::ModelConfig;

    #[test]
    fn registry_from_config_registers_all_drivers() {
        let cfg = ModelConfig::default();
        let registry = registry_from_config(&cfg, &Default::default());
        for meta in list_drivers() {
            assert!(
                registry.get_provider(meta.id).is_ok(),
                "driver {} missing from default registry",
                meta.id
            );
        }
    }

    #[test]
    fn resolve_api_key_prefers_explicit_key() {
        let cfg = ModelConfig {
            api_key: Some("explicit-key".into()),
            api_key_env: Some("SCRIPTSCHNELL_NO_SUCH_ENV".into()),
            ..ModelConfig::default()
        };
        assert_eq!(resolve_api_key(&cfg).as_deref(), Some("explicit-key"));
    }

    #[test]
    fn resolve_api_key_ignores_empty_explicit_key() {
        let cfg = ModelConfig {
            provider: "no-such-driver".into(),
            api_key: Some(String::new()),
            ..ModelConfig::default()
        };
        assert!(resolve_api_key(&cfg).is_none());
    }
}
