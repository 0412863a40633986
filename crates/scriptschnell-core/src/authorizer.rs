// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;

use scriptschnell_tools::{AuthKind, Authorizer, Decision};

use crate::session::SharedSession;

/// Authorizer backed by the session's pre-approved lists.
///
/// A dangerously-allow-all session bypasses every check.  Domains match
/// exactly against `authorized_domains`; shell commands match by prefix
/// against `authorized_commands`.  Anything undecided is handed to the
/// interactive fallback (which prompts the user before returning); without
/// a fallback the decision is `Ask`, which the executor treats as denial.
pub struct SessionAuthorizer {
    session: SharedSession,
    interactive: Option<Arc<dyn Authorizer>>,
}

impl SessionAuthorizer {
    pub fn new(session: SharedSession) -> Self {
        Self {
            session,
            interactive: None,
        }
    }

    pub fn with_interactive(mut self, interactive: Arc<dyn Authorizer>) -> Self {
        self.interactive = Some(interactive);
        self
    }
}

#[async_trait]
impl Authorizer for SessionAuthorizer {
    async fn authorize(&self, kind: AuthKind, subject: &str) -> Decision {
        {
            let state = self.session.read().await;
            if state.dangerously_allow_all {
                return Decision::Allow;
            }
            match kind {
                AuthKind::Domain => {
                    if state.authorized_domains.contains(subject) {
                        return Decision::Allow;
                    }
                }
                AuthKind::ShellCommand => {
                    if state
                        .authorized_commands
                        .iter()
                        .any(|c| subject.starts_with(c.as_str()))
                    {
                        return Decision::Allow;
                    }
                }
                // Writes are never pre-approved; they always face the user.
                AuthKind::FileWrite | AuthKind::DirectoryWrite => {}
            }
        }
        match &self.interactive {
            Some(ui) => ui.authorize(kind, subject).await,
            None => Decision::Ask,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use scriptschnell_tools::StaticAuthorizer;

    #[tokio::test]
    async fn dangerously_allow_all_bypasses_everything() {
        let session = Session::new("/tmp/ws");
        session.write().await.dangerously_allow_all = true;
        let auth = SessionAuthorizer::new(session);
        assert_eq!(
            auth.authorize(AuthKind::ShellCommand, "rm -rf /").await,
            Decision::Allow
        );
        assert_eq!(
            auth.authorize(AuthKind::FileWrite, "/etc/passwd").await,
            Decision::Allow
        );
    }

    #[tokio::test]
    async fn pre_approved_domain_is_allowed() {
        let session = Session::new("/tmp/ws");
        session
            .write()
            .await
            .authorized_domains
            .insert("docs.rs".into());
        let auth = SessionAuthorizer::new(session);
        assert_eq!(auth.authorize(AuthKind::Domain, "docs.rs").await, Decision::Allow);
        assert_eq!(
            auth.authorize(AuthKind::Domain, "example.com").await,
            Decision::Ask
        );
    }

    #[tokio::test]
    async fn pre_approved_command_matches_by_prefix() {
        let session = Session::new("/tmp/ws");
        session
            .write()
            .await
            .authorized_commands
            .push("cargo ".into());
        let auth = SessionAuthorizer::new(session);
        assert_eq!(
            auth.authorize(AuthKind::ShellCommand, "cargo build").await,
            Decision::Allow
        );
        assert_eq!(
            auth.authorize(AuthKind::ShellCommand, "rm x").await,
            Decision::Ask
        );
    }

    #[tokio::test]
    async fn undecided_calls_fall_through_to_interactive() {
        let session = Session::new("/tmp/ws");
        let ui = StaticAuthorizer::new().allow_domain("crates.io");
        let auth = SessionAuthorizer::new(session).with_interactive(Arc::new(ui));
        assert_eq!(
            auth.authorize(AuthKind::Domain, "crates.io").await,
            Decision::Allow
        );
        assert_eq!(
            auth.authorize(AuthKind::Domain, "example.com").await,
            Decision::Deny
        );
    }

    #[tokio::test]
    async fn writes_are_never_pre_approved() {
        let session = Session::new("/tmp/ws");
        let auth = SessionAuthorizer::new(session);
        assert_eq!(
            auth.authorize(AuthKind::FileWrite, "/tmp/x").await,
            Decision::Ask
        );
    }
}
