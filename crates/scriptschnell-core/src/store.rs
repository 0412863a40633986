// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! On-disk session storage.
//!
//! Layout: `<base>/<16-hex of SHA-256 over the cleaned workspace path>/
//! <sanitized-id>.gob`, where `<base>` is platform-specific.  Records are
//! MessagePack-encoded (binary, self-describing) and tagged `version = 1`;
//! writes go to a `.tmp` sibling followed by an atomic rename, so a crash
//! leaves at most the previous committed file.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::session::{Session, SessionState};

pub const STORAGE_VERSION: u32 = 1;
const FILE_EXT: &str = "gob";

#[derive(Debug, Serialize, Deserialize)]
pub struct StorageRecord {
    pub version: u32,
    pub session: SessionState,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session could not be opened: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported session file version {found} (expected {STORAGE_VERSION})")]
    VersionMismatch { found: u32 },
    #[error("session file is corrupt: {0}")]
    Corrupt(String),
    #[error("no such session: {0}")]
    NotFound(String),
}

/// Lightweight listing entry; decoding the full record stays internal.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub path: PathBuf,
}

pub struct SessionStore {
    base: PathBuf,
}

impl SessionStore {
    /// Store rooted at the platform default base directory.
    pub fn new() -> Self {
        Self {
            base: default_base_dir(),
        }
    }

    /// Store rooted at an explicit base (tests, portable installs).
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The directory holding every session of one workspace.
    pub fn workspace_dir(&self, workspace: &Path) -> PathBuf {
        self.base.join(hash_workspace(workspace))
    }

    fn session_path(&self, workspace: &Path, id: &str) -> PathBuf {
        self.workspace_dir(workspace)
            .join(format!("{}.{FILE_EXT}", sanitize_session_id(id)))
    }

    /// Persist a session.  Clean and empty sessions are skipped (no file
    /// write observable); returns whether a write happened.
    pub async fn save(&self, session: &Session) -> anyhow::Result<bool> {
        let snapshot = {
            let state = session.read().await;
            if !state.dirty || state.messages.is_empty() {
                return Ok(false);
            }
            state.clone()
        };

        let dir = self.workspace_dir(&snapshot.working_dir);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.session_path(&snapshot.working_dir, &snapshot.id);
        let tmp = path.with_extension(format!("{FILE_EXT}.tmp"));

        let record = StorageRecord {
            version: STORAGE_VERSION,
            session: snapshot,
        };
        let bytes = rmp_serde::to_vec_named(&record)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        session.write().await.mark_saved();
        debug!(path = %path.display(), bytes = bytes.len(), "session saved");
        Ok(true)
    }

    pub async fn load(&self, workspace: &Path, id: &str) -> Result<SessionState, StoreError> {
        let path = self.session_path(workspace, id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let bytes = tokio::fs::read(&path).await?;
        decode_record(&bytes)
    }

    /// List every session saved for `workspace`.  Corrupt files are
    /// silently skipped.
    pub async fn list(&self, workspace: &Path) -> Vec<SessionSummary> {
        let dir = self.workspace_dir(workspace);
        let Ok(mut rd) = tokio::fs::read_dir(&dir).await else {
            return Vec::new();
        };
        let mut summaries = Vec::new();
        while let Ok(Some(entry)) = rd.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXT) {
                continue;
            }
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            match decode_record(&bytes) {
                Ok(state) => summaries.push(SessionSummary {
                    id: state.id,
                    title: state.title,
                    updated_at: state.updated_at,
                    message_count: state.messages.len(),
                    path,
                }),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable session file");
                }
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    pub async fn delete(&self, workspace: &Path, id: &str) -> Result<(), StoreError> {
        let path = self.session_path(workspace, id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tokio::fs::remove_file(&path).await?;
        Ok(())
    }

    pub async fn most_recent(&self, workspace: &Path) -> Option<SessionSummary> {
        self.list(workspace).await.into_iter().next()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_record(bytes: &[u8]) -> Result<SessionState, StoreError> {
    let record: StorageRecord =
        rmp_serde::from_slice(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    if record.version != STORAGE_VERSION {
        return Err(StoreError::VersionMismatch {
            found: record.version,
        });
    }
    Ok(record.session)
}

// ─── Path derivation ──────────────────────────────────────────────────────────

/// 16-hex-char prefix of SHA-256 over the cleaned workspace path, so that
/// `/a/b`, `/a/./b` and `/a/b/` all land in the same directory.
pub(crate) fn hash_workspace(workspace: &Path) -> String {
    let cleaned = clean_path(workspace);
    let digest = Sha256::digest(cleaned.to_string_lossy().as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Lexical path cleaning: drop `.` segments, resolve `..` against the
/// stack, collapse separators.  Trailing separators disappear with
/// component iteration.
pub(crate) fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Make a session id filesystem-safe: path separators become `-`, any run
/// of other unsafe characters collapses to one `-`, and leading/trailing
/// `-` are trimmed.  An id that sanitizes to nothing falls back to
/// `session-<unix-time>`.
pub(crate) fn sanitize_session_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    let mut pending_dash = false;
    for c in id.chars() {
        let mapped = if c == '/' || c == '\\' {
            None
        } else if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            Some(c)
        } else {
            None
        };
        match mapped {
            Some(c) => {
                if pending_dash && !out.is_empty() {
                    out.push('-');
                }
                pending_dash = false;
                out.push(c);
            }
            None => pending_dash = true,
        }
    }
    let trimmed = out.trim_matches('-').to_string();
    if trimmed.is_empty() {
        format!("session-{}", Utc::now().timestamp())
    } else {
        trimmed
    }
}

/// Platform base directory for session files.
fn default_base_dir() -> PathBuf {
    resolve_base_dir(
        std::env::consts::OS,
        std::env::var("XDG_STATE_HOME").ok().as_deref(),
        std::env::var("LOCALAPPDATA").ok().as_deref(),
        dirs::home_dir().as_deref(),
    )
}

/// Pure resolution so the precedence rules are testable without touching
/// process environment.
pub(crate) fn resolve_base_dir(
    os: &str,
    xdg_state_home: Option<&str>,
    local_app_data: Option<&str>,
    home: Option<&Path>,
) -> PathBuf {
    let home = home.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    match os {
        "linux" => match xdg_state_home.filter(|v| !v.is_empty()) {
            Some(xdg) => PathBuf::from(xdg).join("scriptschnell/sessions"),
            None => home.join(".local/state/scriptschnell/sessions"),
        },
        "windows" => match local_app_data.filter(|v| !v.is_empty()) {
            Some(lad) => PathBuf::from(lad).join("scriptschnell/sessions"),
            None => home.join("AppData/Local/scriptschnell/sessions"),
        },
        _ => home.join(".config/scriptschnell/sessions"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use scriptschnell_model::Message;

    // ── Path derivation ───────────────────────────────────────────────────────

    #[test]
    fn clean_path_removes_dot_segments() {
        assert_eq!(clean_path(Path::new("/a/./b")), PathBuf::from("/a/b"));
    }

    #[test]
    fn clean_path_drops_trailing_separator() {
        assert_eq!(clean_path(Path::new("/a/b/")), PathBuf::from("/a/b"));
    }

    #[test]
    fn clean_path_resolves_parent_segments() {
        assert_eq!(clean_path(Path::new("/a/x/../b")), PathBuf::from("/a/b"));
    }

    #[test]
    fn workspace_hash_is_clean_then_hash() {
        let a = hash_workspace(Path::new("/a/b"));
        assert_eq!(a, hash_workspace(Path::new("/a/./b")));
        assert_eq!(a, hash_workspace(Path::new("/a/b/")));
        assert_ne!(a, hash_workspace(Path::new("/a/c")));
    }

    #[test]
    fn workspace_hash_is_sixteen_hex_chars() {
        let h = hash_workspace(Path::new("/home/u/proj"));
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    // ── Id sanitization ───────────────────────────────────────────────────────

    #[test]
    fn spaces_become_single_dash() {
        assert_eq!(sanitize_session_id("My Sess"), "My-Sess");
    }

    #[test]
    fn runs_of_unsafe_chars_collapse() {
        assert_eq!(sanitize_session_id("a  ??  b"), "a-b");
    }

    #[test]
    fn path_separators_become_dashes() {
        assert_eq!(sanitize_session_id("feat/login\\fix"), "feat-login-fix");
    }

    #[test]
    fn safe_punctuation_is_kept() {
        assert_eq!(sanitize_session_id("v1.2_rc-3"), "v1.2_rc-3");
    }

    #[test]
    fn leading_and_trailing_dashes_are_trimmed() {
        assert_eq!(sanitize_session_id("**core**"), "core");
    }

    #[test]
    fn empty_id_falls_back_to_timestamped_name() {
        let id = sanitize_session_id("???");
        assert!(id.starts_with("session-"));
    }

    // ── Base directory resolution ─────────────────────────

    #[test]
    fn linux_prefers_xdg_state_home() {
        let base = resolve_base_dir("linux", Some("/tmp/x"), None, Some(Path::new("/home/u")));
        assert_eq!(base, PathBuf::from("/tmp/x/scriptschnell/sessions"));
    }

    #[test]
    fn linux_falls_back_to_local_state() {
        let base = resolve_base_dir("linux", None, None, Some(Path::new("/home/u")));
        assert_eq!(
            base,
            PathBuf::from("/home/u/.local/state/scriptschnell/sessions")
        );
    }

    #[test]
    fn empty_xdg_counts_as_unset() {
        let base = resolve_base_dir("linux", Some(""), None, Some(Path::new("/home/u")));
        assert!(base.starts_with("/home/u/.local/state"));
    }

    #[test]
    fn windows_uses_local_app_data() {
        let base = resolve_base_dir(
            "windows",
            None,
            Some("C:/Users/u/AppData/Local"),
            Some(Path::new("C:/Users/u")),
        );
        assert_eq!(
            base,
            PathBuf::from("C:/Users/u/AppData/Local/scriptschnell/sessions")
        );
    }

    #[test]
    fn macos_uses_config_dir() {
        let base = resolve_base_dir("macos", None, None, Some(Path::new("/Users/u")));
        assert_eq!(base, PathBuf::from("/Users/u/.config/scriptschnell/sessions"));
    }

    #[test]
    fn session_file_path_matches_layout() {
        let store = SessionStore::with_base("/tmp/x/scriptschnell/sessions");
        let path = store.session_path(Path::new("/home/u/proj"), "My Sess");
        let expected_dir = format!(
            "/tmp/x/scriptschnell/sessions/{}",
            hash_workspace(Path::new("/home/u/proj"))
        );
        assert_eq!(path, PathBuf::from(expected_dir).join("My-Sess.gob"));
    }

    // ── Save / load / list ────────────────────────────────────────────────────

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let store = SessionStore::with_base(base.path());

        let session = Session::new(ws.path());
        {
            let mut s = session.write().await;
            s.id = "roundtrip".into();
            s.title = "testing".into();
            s.push(Message::user("persist me"));
        }
        assert!(store.save(&session).await.unwrap());

        let loaded = store.load(ws.path(), "roundtrip").await.unwrap();
        assert_eq!(loaded.title, "testing");
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].content, "persist me");
        assert!(!loaded.dirty);
    }

    #[tokio::test]
    async fn saving_clean_session_is_a_noop() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let store = SessionStore::with_base(base.path());

        let session = Session::new(ws.path());
        assert!(!store.save(&session).await.unwrap(), "clean+empty: skipped");

        // Dirty but then saved once; a second save with no changes skips.
        session.write().await.push(Message::user("hi"));
        assert!(store.save(&session).await.unwrap());
        assert!(!store.save(&session).await.unwrap(), "clean session: skipped");
    }

    #[tokio::test]
    async fn saving_empty_session_is_skipped_even_if_dirty() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let store = SessionStore::with_base(base.path());
        let session = Session::new(ws.path());
        session.write().await.touch();
        assert!(!store.save(&session).await.unwrap());
        assert!(store.list(ws.path()).await.is_empty());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let store = SessionStore::with_base(base.path());
        let session = Session::new(ws.path());
        session.write().await.push(Message::user("hi"));
        store.save(&session).await.unwrap();

        let dir = store.workspace_dir(ws.path());
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "tmp file must be renamed away");
    }

    #[tokio::test]
    async fn load_missing_session_is_not_found() {
        let base = tempfile::tempdir().unwrap();
        let store = SessionStore::with_base(base.path());
        let err = store.load(Path::new("/tmp/nope"), "ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn version_mismatch_is_a_structured_error() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let store = SessionStore::with_base(base.path());

        let record = StorageRecord {
            version: 99,
            session: SessionState::new(ws.path()),
        };
        let dir = store.workspace_dir(ws.path());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("future.gob"),
            rmp_serde::to_vec_named(&record).unwrap(),
        )
        .unwrap();

        let err = store.load(ws.path(), "future").await.unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { found: 99 }));
    }

    #[tokio::test]
    async fn corrupt_files_are_skipped_in_list() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let store = SessionStore::with_base(base.path());

        let session = Session::new(ws.path());
        {
            let mut s = session.write().await;
            s.id = "good".into();
            s.push(Message::user("hi"));
        }
        store.save(&session).await.unwrap();

        let dir = store.workspace_dir(ws.path());
        std::fs::write(dir.join("bad.gob"), b"definitely not msgpack").unwrap();

        let listed = store.list(ws.path()).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "good");
    }

    #[tokio::test]
    async fn most_recent_picks_latest_updated() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let store = SessionStore::with_base(base.path());

        for (id, content) in [("older", "a"), ("newer", "b")] {
            let session = Session::new(ws.path());
            {
                let mut s = session.write().await;
                s.id = id.into();
                s.push(Message::user(content));
            }
            store.save(&session).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let recent = store.most_recent(ws.path()).await.unwrap();
        assert_eq!(recent.id, "newer");
    }

    #[tokio::test]
    async fn delete_removes_the_file() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let store = SessionStore::with_base(base.path());

        let session = Session::new(ws.path());
        {
            let mut s = session.write().await;
            s.id = "doomed".into();
            s.push(Message::user("x"));
        }
        store.save(&session).await.unwrap();
        store.delete(ws.path(), "doomed").await.unwrap();
        assert!(store.list(ws.path()).await.is_empty());
        assert!(matches!(
            store.delete(ws.path(), "doomed").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn save_clears_dirty_and_sets_last_saved_at() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let store = SessionStore::with_base(base.path());
        let session = Session::new(ws.path());
        session.write().await.push(Message::user("hi"));
        store.save(&session).await.unwrap();
        let state = session.read().await;
        assert!(!state.dirty);
        assert!(state.last_saved_at.is_some());
    }
}
