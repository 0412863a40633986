// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

/// What a tool is asking permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthKind {
    Domain,
    FileWrite,
    DirectoryWrite,
    ShellCommand,
}

impl std::fmt::Display for AuthKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthKind::Domain => "domain",
            AuthKind::FileWrite => "file_write",
            AuthKind::DirectoryWrite => "directory_write",
            AuthKind::ShellCommand => "shell_command",
        };
        write!(f, "{s}")
    }
}

/// Authorization decision.  `Ask` means the implementation could not decide
/// from pre-approved lists alone; interactive authorizers resolve it by
/// prompting the user before returning.  The executor treats an unresolved
/// `Ask` the same as `Deny`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    Ask,
}

/// Gate for destructive or outward-facing tool actions.
///
/// Pre-approved lists (domains, commands) live in the session; a
/// dangerously-allow-all session bypasses every check.  Implementations
/// that can reach the user resolve `Ask` synchronously by prompting.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, kind: AuthKind, subject: &str) -> Decision;
}

/// Authorizer that allows everything.  Used for dangerously-allow-all
/// sessions and in tests.
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _kind: AuthKind, _subject: &str) -> Decision {
        Decision::Allow
    }
}

/// Fixed-list authorizer: allows subjects on the per-kind allowlist,
/// denies everything else.  The test stand-in for a session-backed
/// interactive authorizer.
#[derive(Default)]
pub struct StaticAuthorizer {
    allowed_domains: Vec<String>,
    allowed_commands: Vec<String>,
    allow_writes: bool,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_domain(mut self, domain: impl Into<String>) -> Self {
        self.allowed_domains.push(domain.into());
        self
    }

    pub fn allow_command(mut self, prefix: impl Into<String>) -> Self {
        self.allowed_commands.push(prefix.into());
        self
    }

    pub fn allow_writes(mut self) -> Self {
        self.allow_writes = true;
        self
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self, kind: AuthKind, subject: &str) -> Decision {
        match kind {
            AuthKind::Domain => {
                if self.allowed_domains.iter().any(|d| d == subject) {
                    Decision::Allow
                } else {
                    Decision::Deny
                }
            }
            AuthKind::ShellCommand => {
                if self
                    .allowed_commands
                    .iter()
                    .any(|c| subject.starts_with(c.as_str()))
                {
                    Decision::Allow
                } else {
                    Decision::Deny
                }
            }
            AuthKind::FileWrite | AuthKind::DirectoryWrite => {
                if self.allow_writes {
                    Decision::Allow
                } else {
                    Decision::Deny
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
