// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod loader;
mod logging;
mod schema;

pub use loader::load;
pub use logging::init_logging;
pub use schema::{
    AgentConfig, Config, LogConfig, ModelConfig, RateLimitConfig, SessionConfig,
};
