// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use scriptschnell_model::Message;

/// Metadata for a background job started during the session.  Runtime
/// process handles are never persisted; reloading a session yields jobs
/// in a detached state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundJob {
    pub id: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub status: String,
}

/// The conversational state of one workspace session.
///
/// A session is dirty iff any field changed since the last successful
/// save; the flag is runtime bookkeeping and never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    pub working_dir: PathBuf,
    pub title: String,
    pub messages: Vec<Message>,
    /// Path → content hash of files read this session.
    pub files_read: HashMap<String, String>,
    pub files_modified: BTreeSet<String>,
    pub background_jobs: HashMap<String, BackgroundJob>,
    pub authorized_domains: BTreeSet<String>,
    pub authorized_commands: Vec<String>,
    pub planning_active: bool,
    pub planning_objective: String,
    pub last_sandbox_exit_code: Option<i32>,
    pub last_sandbox_exit_at: Option<DateTime<Utc>>,
    pub current_provider: String,
    pub current_model_family: String,
    /// Bypass every authorization check for this session.
    pub dangerously_allow_all: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_saved_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub dirty: bool,
}

impl SessionState {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            working_dir: working_dir.into(),
            title: String::new(),
            messages: Vec::new(),
            files_read: HashMap::new(),
            files_modified: BTreeSet::new(),
            background_jobs: HashMap::new(),
            authorized_domains: BTreeSet::new(),
            authorized_commands: Vec::new(),
            planning_active: false,
            planning_objective: String::new(),
            last_sandbox_exit_code: None,
            last_sandbox_exit_at: None,
            current_provider: String::new(),
            current_model_family: String::new(),
            dangerously_allow_all: false,
            created_at: now,
            updated_at: now,
            last_saved_at: None,
            dirty: false,
        }
    }

    /// Append a message, bumping `updated_at` and marking the session dirty.
    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.dirty = true;
    }

    /// Approximate token total over the message history.
    pub fn token_estimate(&self) -> usize {
        self.messages.iter().map(|m| m.approx_tokens()).sum()
    }

    /// Record a successful save.
    pub fn mark_saved(&mut self) {
        self.dirty = false;
        self.last_saved_at = Some(Utc::now());
    }
}

/// A session behind its own readers-writer lock.  Only the orchestrator
/// takes the write half; the session actor snapshots under the read half.
#[derive(Debug)]
pub struct Session {
    state: RwLock<SessionState>,
}

pub type SharedSession = Arc<Session>;

impl Session {
    pub fn new(working_dir: impl Into<PathBuf>) -> SharedSession {
        Arc::new(Self {
            state: RwLock::new(SessionState::new(working_dir)),
        })
    }

    pub fn from_state(state: SessionState) -> SharedSession {
        Arc::new(Self {
            state: RwLock::new(state),
        })
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().await
    }

    /// Consistent snapshot taken under the read lock.
    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
