//! Error taxonomy for git invocations
//!
//! Every failure a caller can observe is one of these variants. All
//! command-level variants carry the assembled command line and both output
//! streams so a host can render a diagnostic panel without re-running git.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::git::binary::GitVersion;

/// Hint attached to a `CommandFailed` error when the stderr content matches
/// a known recoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorHint {
    /// `user.name` / `user.email` are not configured.
    MissingIdentity,
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error(
        "Your Git binary cannot be found.  If it is installed, add it to your \
         PATH environment variable, or set `git_path` in the configuration."
    )]
    BinaryNotFound,

    #[error("Your Git version is too old.  capstan requires {required} or above, found {found}.")]
    GitTooOld {
        found: GitVersion,
        required: GitVersion,
    },

    /// `<git> --version` ran but did not print a recognisable version.
    #[error("`{} --version` did not report a parsable version.", .path.display())]
    VersionUnparseable { path: PathBuf },

    /// No repository root resolved from any of the searched folders.
    #[error("Not a git repository (searched from: {})", format_searched(.searched))]
    RepoNotFound { searched: Vec<PathBuf> },

    /// The OS refused to spawn the process. Treated as a should-never-happen
    /// condition worth reporting upstream with full context.
    #[error(
        "$ {command} ({})\n\nFailed to spawn git: {source}\n\nPlease report this error.",
        .working_dir.display()
    )]
    SpawnFailed {
        command: String,
        working_dir: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No candidate encoding could decode the output. `stdout` and `stderr`
    /// hold the lossy renderings; the message carries a diagnostic preamble.
    #[error("$ {command}\n{}{stdout}{stderr}", crate::encoding::DECODE_ERROR_PREAMBLE)]
    Decode {
        command: String,
        stdout: String,
        stderr: String,
    },

    /// git exited non-zero. The message favours stderr, falling back to the
    /// exit code when both streams are empty.
    #[error("$ {command}\n\n{stdout}{}", failure_tail(.stderr, .exit_code, .stdout))]
    CommandFailed {
        command: String,
        working_dir: PathBuf,
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
        hint: Option<ErrorHint>,
    },
}

impl GitError {
    /// True for the process-wide failures that are surfaced to the user at
    /// most once per session.
    pub fn is_process_wide(&self) -> bool {
        matches!(
            self,
            GitError::BinaryNotFound
                | GitError::GitTooOld { .. }
                | GitError::VersionUnparseable { .. }
        )
    }

    pub fn hint(&self) -> Option<ErrorHint> {
        match self {
            GitError::CommandFailed { hint, .. } => *hint,
            _ => None,
        }
    }
}

fn format_searched(searched: &[PathBuf]) -> String {
    if searched.is_empty() {
        return "<no folders>".to_string();
    }
    searched
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn failure_tail(stderr: &str, exit_code: &Option<i32>, stdout: &str) -> String {
    if stdout.is_empty() && stderr.is_empty() {
        format!("<no output, exit code: {}>", exit_code.unwrap_or(-1))
    } else {
        stderr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_failed(stdout: &str, stderr: &str, code: i32) -> GitError {
        GitError::CommandFailed {
            command: "git push".to_string(),
            working_dir: PathBuf::from("/repo"),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: Some(code),
            hint: None,
        }
    }

    #[test]
    fn silent_failure_reports_exit_code() {
        let err = command_failed("", "", 128);
        let msg = err.to_string();
        assert!(msg.contains("<no output, exit code: 128>"), "{msg}");
    }

    #[test]
    fn noisy_failure_uses_stderr_verbatim() {
        let err = command_failed("", "fatal: not a git repository\n", 128);
        let msg = err.to_string();
        assert!(msg.contains("fatal: not a git repository"), "{msg}");
        assert!(!msg.contains("exit code"), "{msg}");
    }

    #[test]
    fn message_is_prefixed_with_the_command() {
        let err = command_failed("", "boom\n", 1);
        assert!(err.to_string().starts_with("$ git push\n"));
    }

    #[test]
    fn process_wide_classification() {
        assert!(GitError::BinaryNotFound.is_process_wide());
        assert!(!command_failed("", "x", 1).is_process_wide());
    }
}
