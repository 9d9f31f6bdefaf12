//! capstan: a git invocation engine for interactive host applications
//!
//! Wraps the external `git` binary so higher-level commands can invoke it
//! reliably: binary and repository resolution, deadlock-free concurrent
//! draining of stdout and stderr, encoding cascades, and a structured
//! error taxonomy. Hosts plug in their UI via the [`git::TranscriptSink`]
//! trait and the runner's notification hooks.

pub mod config;
pub mod encoding;
pub mod error;
pub mod git;
pub mod process;

pub use config::GitConfig;
pub use error::{ErrorHint, GitError};
pub use git::{GitRunner, Invocation};
pub use process::ProcessHandle;
