//! The git invocation engine
//!
//! This module provides:
//! - Binary discovery and version validation
//! - Repository root and git-directory resolution
//! - The command executor that spawns and drains git subprocesses

pub mod binary;
pub mod repo;
pub mod run;

// Re-export commonly used types and functions
pub use binary::{git_binary, parse_version, reset_git_binary, GitBinary, GitVersion};
pub use repo::{find_repository_root, reset_repo_caches, resolve_git_dir};
pub use run::{GitRunner, Invocation, TranscriptSink, MISSING_IDENTITY_MARKER};
