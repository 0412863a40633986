// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;

/// One entry from a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Filesystem abstraction consumed by the file tools.  Paths are
/// workspace-relative or absolute; symlink traversal that escapes the
/// workspace is refused.
#[async_trait]
pub trait Filesystem: Send + Sync {
    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>>;
    async fn list_dir(&self, path: &Path) -> anyhow::Result<Vec<DirEntry>>;
    async fn write_file(&self, path: &Path, data: &[u8]) -> anyhow::Result<()>;
    async fn mkdir_all(&self, path: &Path) -> anyhow::Result<()>;
}

/// Default implementation over the host filesystem, rooted at a workspace.
pub struct OsFilesystem {
    workspace: PathBuf,
}

impl OsFilesystem {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Join relative paths onto the workspace and refuse paths that sit
    /// lexically inside the workspace but resolve (through symlinks)
    /// outside of it.
    fn resolve(&self, path: &Path) -> anyhow::Result<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        };

        if joined.starts_with(&self.workspace) {
            // Canonicalize whatever prefix of the path exists; a not-yet-
            // created file still gets its parent checked.
            let probe = if joined.exists() {
                joined.clone()
            } else {
                joined.parent().map(Path::to_path_buf).unwrap_or_else(|| joined.clone())
            };
            if probe.exists() {
                let canonical = probe
                    .canonicalize()
                    .with_context(|| format!("resolving {}", probe.display()))?;
                let canonical_ws = self
                    .workspace
                    .canonicalize()
                    .unwrap_or_else(|_| self.workspace.clone());
                if !canonical.starts_with(&canonical_ws) {
                    anyhow::bail!(
                        "refusing symlink traversal outside the workspace: {}",
                        path.display()
                    );
                }
            }
        }
        Ok(joined)
    }
}

#[async_trait]
impl Filesystem for OsFilesystem {
    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        tokio::fs::read(&resolved)
            .await
            .with_context(|| format!("reading {}", resolved.display()))
    }

    async fn list_dir(&self, path: &Path) -> anyhow::Result<Vec<DirEntry>> {
        let resolved = self.resolve(path)?;
        let mut rd = tokio::fs::read_dir(&resolved)
            .await
            .with_context(|| format!("listing {}", resolved.display()))?;
        let mut entries = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(DirEntry {
                path: entry.path(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> anyhow::Result<()> {
        let resolved = self.resolve(path)?;
        tokio::fs::write(&resolved, data)
            .await
            .with_context(|| format!("writing {}", resolved.display()))
    }

    async fn mkdir_all(&self, path: &Path) -> anyhow::Result<()> {
        let resolved = self.resolve(path)?;
        tokio::fs::create_dir_all(&resolved)
            .await
            .with_context(|| format!("creating {}", resolved.display()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
