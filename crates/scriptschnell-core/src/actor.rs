// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The session actor: a single task owning the mailbox through which all
//! session persistence flows.  Nothing else writes session files.
//!
//! Callers block only on their command's reply channel.  Auto-save runs on
//! a ticker; a tick is skipped while the in-flight cap is reached, and
//! shutdown drains every in-flight save before returning.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::session::{SessionState, SharedSession};
use crate::store::{SessionStore, SessionSummary, StoreError};

#[derive(Debug)]
pub enum SessionCommand {
    Save {
        session: SharedSession,
        reply: oneshot::Sender<anyhow::Result<bool>>,
    },
    Load {
        workspace: PathBuf,
        id: String,
        reply: oneshot::Sender<Result<SessionState, StoreError>>,
    },
    List {
        workspace: PathBuf,
        reply: oneshot::Sender<Vec<SessionSummary>>,
    },
    Delete {
        workspace: PathBuf,
        id: String,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    GetMostRecent {
        workspace: PathBuf,
        reply: oneshot::Sender<Option<SessionSummary>>,
    },
    StartAutoSave {
        session: SharedSession,
        interval: Duration,
        reply: oneshot::Sender<()>,
    },
    StopAutoSave {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the actor task.  Cloneable; the task exits when the last
/// handle is dropped or `shutdown` is called.
#[derive(Clone)]
pub struct SessionActor {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionActor {
    pub fn spawn(store: SessionStore, max_concurrent_saves: usize) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(actor_task(rx, Arc::new(store), max_concurrent_saves.max(1)));
        Self { tx }
    }

    pub async fn save(&self, session: &SharedSession) -> anyhow::Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Save {
                session: session.clone(),
                reply,
            })
            .await?;
        rx.await?
    }

    pub async fn load(&self, workspace: &Path, id: &str) -> Result<SessionState, StoreError> {
        let (reply, rx) = oneshot::channel();
        let cmd = SessionCommand::Load {
            workspace: workspace.to_path_buf(),
            id: id.to_string(),
            reply,
        };
        if self.tx.send(cmd).await.is_err() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        rx.await
            .unwrap_or_else(|_| Err(StoreError::NotFound(id.to_string())))
    }

    pub async fn list(&self, workspace: &Path) -> Vec<SessionSummary> {
        let (reply, rx) = oneshot::channel();
        let cmd = SessionCommand::List {
            workspace: workspace.to_path_buf(),
            reply,
        };
        if self.tx.send(cmd).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn delete(&self, workspace: &Path, id: &str) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        let cmd = SessionCommand::Delete {
            workspace: workspace.to_path_buf(),
            id: id.to_string(),
            reply,
        };
        if self.tx.send(cmd).await.is_err() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        rx.await
            .unwrap_or_else(|_| Err(StoreError::NotFound(id.to_string())))
    }

    pub async fn most_recent(&self, workspace: &Path) -> Option<SessionSummary> {
        let (reply, rx) = oneshot::channel();
        let cmd = SessionCommand::GetMostRecent {
            workspace: workspace.to_path_buf(),
            reply,
        };
        self.tx.send(cmd).await.ok()?;
        rx.await.ok().flatten()
    }

    pub async fn start_auto_save(&self, session: &SharedSession, interval: Duration) {
        let (reply, rx) = oneshot::channel();
        let cmd = SessionCommand::StartAutoSave {
            session: session.clone(),
            interval,
            reply,
        };
        if self.tx.send(cmd).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn stop_auto_save(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(SessionCommand::StopAutoSave { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop the actor, waiting for all in-flight saves to finish.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(SessionCommand::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

async fn actor_task(
    mut rx: mpsc::Receiver<SessionCommand>,
    store: Arc<SessionStore>,
    max_concurrent_saves: usize,
) {
    let mut auto: Option<(SharedSession, Duration)> = None;
    let mut next_tick: Option<tokio::time::Instant> = None;
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        // Copy the deadline out so the sleep future borrows no actor state;
        // command arms below are then free to mutate it.
        let deadline = next_tick;
        let tick = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => futures::future::pending::<()>().await,
            }
        };

        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    SessionCommand::Save { session, reply } => {
                        let _ = reply.send(store.save(&session).await);
                    }
                    SessionCommand::Load { workspace, id, reply } => {
                        let _ = reply.send(store.load(&workspace, &id).await);
                    }
                    SessionCommand::List { workspace, reply } => {
                        let _ = reply.send(store.list(&workspace).await);
                    }
                    SessionCommand::Delete { workspace, id, reply } => {
                        let _ = reply.send(store.delete(&workspace, &id).await);
                    }
                    SessionCommand::GetMostRecent { workspace, reply } => {
                        let _ = reply.send(store.most_recent(&workspace).await);
                    }
                    SessionCommand::StartAutoSave { session, interval, reply } => {
                        next_tick = Some(tokio::time::Instant::now() + interval);
                        auto = Some((session, interval));
                        let _ = reply.send(());
                    }
                    SessionCommand::StopAutoSave { reply } => {
                        auto = None;
                        next_tick = None;
                        let _ = reply.send(());
                    }
                    SessionCommand::Shutdown { reply } => {
                        auto = None;
                        while in_flight.join_next().await.is_some() {}
                        let _ = reply.send(());
                        return;
                    }
                }
            }
            _ = tick => {
                // Reap finished saves before counting in-flight work.
                while in_flight.try_join_next().is_some() {}
                if let Some((session, interval)) = &auto {
                    next_tick = Some(tokio::time::Instant::now() + *interval);
                    if in_flight.len() >= max_concurrent_saves {
                        debug!("auto-save tick skipped: save already in flight");
                        continue;
                    }
                    let session = session.clone();
                    let store = Arc::clone(&store);
                    in_flight.spawn(async move {
                        // Errors are logged here and retried naturally on the
                        // next tick — the session stays dirty.
                        if let Err(e) = store.save(&session).await {
                            warn!(error = %e, "auto-save failed");
                        }
                    });
                }
            }
        }
    }

    // Mailbox closed without an explicit shutdown: still drain saves.
    while in_flight.join_next().await.is_some() {}
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use scriptschnell_model::Message;

    fn actor_with_tempdir() -> (tempfile::TempDir, SessionActor) {
        let base = tempfile::tempdir().unwrap();
        let actor = SessionActor::spawn(SessionStore::with_base(base.path()), 1);
        (base, actor)
    }

    #[tokio::test]
    async fn save_and_load_through_the_mailbox() {
        let (_base, actor) = actor_with_tempdir();
        let ws = tempfile::tempdir().unwrap();

        let session = Session::new(ws.path());
        {
            let mut s = session.write().await;
            s.id = "mailbox".into();
            s.push(Message::user("via actor"));
        }
        assert!(actor.save(&session).await.unwrap());

        let loaded = actor.load(ws.path(), "mailbox").await.unwrap();
        assert_eq!(loaded.messages[0].content, "via actor");
        actor.shutdown().await;
    }

    #[tokio::test]
    async fn clean_save_is_reported_as_skipped() {
        let (_base, actor) = actor_with_tempdir();
        let ws = tempfile::tempdir().unwrap();
        let session = Session::new(ws.path());
        assert!(!actor.save(&session).await.unwrap());
        actor.shutdown().await;
    }

    #[tokio::test]
    async fn list_and_most_recent_flow_through() {
        let (_base, actor) = actor_with_tempdir();
        let ws = tempfile::tempdir().unwrap();

        let session = Session::new(ws.path());
        {
            let mut s = session.write().await;
            s.id = "only".into();
            s.push(Message::user("x"));
        }
        actor.save(&session).await.unwrap();

        assert_eq!(actor.list(ws.path()).await.len(), 1);
        assert_eq!(actor.most_recent(ws.path()).await.unwrap().id, "only");
        actor.shutdown().await;
    }

    #[tokio::test]
    async fn delete_through_the_mailbox() {
        let (_base, actor) = actor_with_tempdir();
        let ws = tempfile::tempdir().unwrap();
        let session = Session::new(ws.path());
        {
            let mut s = session.write().await;
            s.id = "gone".into();
            s.push(Message::user("x"));
        }
        actor.save(&session).await.unwrap();
        actor.delete(ws.path(), "gone").await.unwrap();
        assert!(actor.list(ws.path()).await.is_empty());
        actor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn auto_save_persists_dirty_sessions_on_ticks() {
        let (_base, actor) = actor_with_tempdir();
        let ws = tempfile::tempdir().unwrap();

        let session = Session::new(ws.path());
        {
            let mut s = session.write().await;
            s.id = "auto".into();
            s.push(Message::user("tick tock"));
        }
        actor
            .start_auto_save(&session, Duration::from_millis(50))
            .await;

        // Let a few ticks elapse.
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Yield so the spawned save task completes.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(!session.read().await.dirty, "auto-save must clear dirty");
        actor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_auto_save_halts_the_ticker() {
        let (_base, actor) = actor_with_tempdir();
        let ws = tempfile::tempdir().unwrap();
        let session = Session::new(ws.path());
        actor
            .start_auto_save(&session, Duration::from_millis(50))
            .await;
        actor.stop_auto_save().await;

        session.write().await.push(Message::user("late change"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(
            session.read().await.dirty,
            "no tick may fire after StopAutoSave"
        );
        actor.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_waits() {
        let (_base, actor) = actor_with_tempdir();
        actor.shutdown().await;
        // A second shutdown finds the mailbox closed and returns cleanly.
        actor.shutdown().await;
    }
}
