// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod actor;
mod authorizer;
mod events;
mod investigator;
mod loop_detector;
mod orchestrator;
mod session;
mod store;
mod summarize;


pub use actor::{SessionActor, SessionCommand};
pub use authorizer::SessionAuthorizer;
pub use events::{ProgressCallback, ProgressUpdate, UpdateMode};
pub use investigator::{CodebaseInvestigatorTool, Investigator};
pub use loop_detector::{LoopDetector, ToolCallRecord};
pub use orchestrator::Orchestrator;
pub use session::{BackgroundJob, Session, SessionState, SharedSession};
pub use store::{SessionStore, SessionSummary, StorageRecord, StoreError, STORAGE_VERSION};
pub use summarize::{chunked_summarize, estimate_tokens};
