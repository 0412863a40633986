// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
mod authorize;
mod cancel;
mod fsx;
mod parallel;
mod redact;
mod registry;
mod tool;

pub use authorize::{AllowAll, AuthKind, Authorizer, Decision, StaticAuthorizer};
pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use fsx::{DirEntry, Filesystem, OsFilesystem};
pub use parallel::ParallelTool;
pub use redact::redact_secrets;
pub use registry::{ExecCallbacks, ToolRegistry, ToolSpec};
pub use tool::{Tool, ToolInvocation, ToolResult};

pub use builtin::read_file::ReadFileTool;
pub use builtin::run_shell::RunShellTool;
pub use builtin::search_content::SearchFileContentTool;
pub use builtin::search_files::SearchFilesTool;
pub use builtin::web_fetch::WebFetchTool;
