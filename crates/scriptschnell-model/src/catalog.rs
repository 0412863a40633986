// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Curated fallback catalog: static metadata for known models.
//!
//! Providers merge this with their live catalog endpoint; when the remote
//! listing errors or returns nothing usable, the curated entries keep the
//! assistant usable offline for previously-known model ids.

use serde::Deserialize;

use crate::ModelInfo;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelInfo>,
}

/// Return all entries from the bundled static catalog.
pub fn static_catalog() -> Vec<ModelInfo> {
    let yaml = include_str!("../models.yaml");
    let catalog: CatalogFile =
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    catalog.models
}

/// All curated entries for one provider.
pub fn for_provider(provider: &str) -> Vec<ModelInfo> {
    static_catalog()
        .into_iter()
        .filter(|e| e.provider == provider)
        .collect()
}

/// Look up a single model by provider and id (or display name).
pub fn lookup(provider: &str, model_id: &str) -> Option<ModelInfo> {
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && (e.id == model_id || e.name == model_id))
}

/// Look up the context window for a model.  Falls back to `default` if not
/// in the catalog.
pub fn context_window(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id)
        .map(|e| e.context_window)
        .unwrap_or(default)
}

/// The default model id a provider substitutes when the configured id is
/// blank: the first curated entry for that provider.
pub fn default_model(provider: &str) -> Option<String> {
    for_provider(provider).first().map(|e| e.id.clone())
}

// ── Unit tests ────────────────────────────────────────────────────────────────
