//! Running git commands
//!
//! [`GitRunner`] is the engine's entry point: it assembles the final
//! argument vector (global pre/post flags around the subcommand), layers
//! the environment, resolves the working directory, spawns the process,
//! drains both streams through the interleaver, decodes, and classifies
//! the outcome. Callers that need a cancellable long-running process use
//! [`GitRunner::spawn`] and own the [`ProcessHandle`] directly.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use crate::config::GitConfig;
use crate::encoding;
use crate::error::{ErrorHint, GitError};
use crate::git::binary;
use crate::git::repo;
use crate::process::interleave::{communicate, OutputLine};
use crate::process::ProcessHandle;

/// git's stderr marker for an unconfigured author identity.
pub const MISSING_IDENTITY_MARKER: &str = "*** Please tell me who you are.";

/// Live transcript collaborator. `append` is invoked once per produced
/// line while an invocation with mirroring enabled is running.
pub trait TranscriptSink: Send + Sync {
    fn append(&self, text: &str);
}

type Callback = dyn Fn() + Send + Sync;
type Notifier = dyn Fn(&str) + Send + Sync;

/// One git invocation, builder-style. Absent (`None`) arguments are
/// dropped rather than passed through.
#[derive(Debug, Default)]
pub struct Invocation {
    subcommand: String,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
    show_output: Option<bool>,
    check: bool,
}

impl Invocation {
    pub fn new(subcommand: impl Into<String>) -> Self {
        Self {
            subcommand: subcommand.into(),
            check: true,
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append the argument if present, drop it otherwise.
    pub fn arg_opt(mut self, arg: Option<impl Into<String>>) -> Self {
        if let Some(a) = arg {
            self.args.push(a.into());
        }
        self
    }

    /// Bytes piped to the child's stdin. The pipe is closed after writing
    /// (and closed immediately when no input is given).
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Explicit working directory, overriding repo-root resolution.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Per-call environment override, highest precedence layer.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Force live mirroring on or off, overriding `show_output_for`.
    pub fn show_output(mut self, show: bool) -> Self {
        self.show_output = Some(show);
        self
    }

    /// When false, a non-zero exit returns stdout instead of an error.
    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }
}

/// Everything resolved before the process exists. Resolution failures
/// (binary, repo root) happen here, before any side effects.
struct Prepared {
    program: PathBuf,
    argv: Vec<String>,
    working_dir: PathBuf,
    command_line: String,
}

/// The git invocation engine.
pub struct GitRunner {
    config: GitConfig,
    search_paths: Vec<PathBuf>,
    transcript: Option<Arc<dyn TranscriptSink>>,
    notify_user: Option<Box<Notifier>>,
    on_missing_identity: Option<Box<Callback>>,
    on_repo_missing: Option<Box<Callback>>,
}

impl GitRunner {
    pub fn new(config: GitConfig) -> Self {
        Self {
            config,
            search_paths: Vec::new(),
            transcript: None,
            notify_user: None,
            on_missing_identity: None,
            on_repo_missing: None,
        }
    }

    /// Add a candidate starting folder for repo-root resolution, e.g. the
    /// active file's directory or the first open project folder.
    pub fn add_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Attach the live transcript collaborator.
    pub fn with_transcript(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.transcript = Some(sink);
        self
    }

    /// Hook for one-time user-visible messages (unusable binary).
    pub fn with_notifier(mut self, notify: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.notify_user = Some(Box::new(notify));
        self
    }

    /// Hook fired when git reports an unconfigured author identity, so the
    /// host can start its "configure identity" flow.
    pub fn with_identity_recovery(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_missing_identity = Some(Box::new(hook));
        self
    }

    /// Hook fired when no repository resolves but the host has open
    /// folders, so it can offer an "initialize repository" action.
    pub fn with_repo_missing_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_repo_missing = Some(Box::new(hook));
        self
    }

    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    /// The repository root governing the first search path that resolves.
    pub fn repo_path(&self) -> Result<PathBuf, GitError> {
        for folder in &self.search_paths {
            if !folder.is_dir() {
                continue;
            }
            if let Some(root) = repo::find_repository_root(folder) {
                return Ok(root);
            }
        }
        if !self.search_paths.is_empty() {
            if let Some(hook) = &self.on_repo_missing {
                hook();
            }
        }
        Err(GitError::RepoNotFound {
            searched: self.search_paths.clone(),
        })
    }

    /// The repo root rendered with `~` for the home directory.
    pub fn short_repo_path(&self) -> Result<String, GitError> {
        let root = self.repo_path()?;
        Ok(match dirs::home_dir().and_then(|home| root.strip_prefix(home).ok().map(Path::to_path_buf)) {
            Some(rel) => format!("~/{}", rel.display()),
            None => root.display().to_string(),
        })
    }

    /// The git metadata directory for the resolved repository.
    pub fn git_dir(&self) -> Result<PathBuf, GitError> {
        Ok(repo::resolve_git_dir(&self.repo_path()?))
    }

    /// Run git and return decoded stdout.
    ///
    /// Both streams are strict-decoded; an undecodable stream is a hard
    /// [`GitError::Decode`]. A non-zero exit is [`GitError::CommandFailed`]
    /// unless `check(false)` was set.
    pub fn run(&self, invocation: &Invocation) -> Result<String, GitError> {
        let (stdout, stderr, status, prepared) = self.run_captured(invocation)?;

        let candidates = encoding::candidates(&self.config);
        let decoded = match (
            encoding::strict_decode(&stdout, &candidates),
            encoding::strict_decode(&stderr, &candidates),
        ) {
            (Ok(out), Ok(err)) => (out, err),
            _ => {
                return Err(GitError::Decode {
                    command: prepared.command_line,
                    stdout: encoding::lossy_utf8(&stdout),
                    stderr: encoding::lossy_utf8(&stderr),
                })
            }
        };

        let (stdout_s, stderr_s) = decoded;
        if invocation.check && !status.success() {
            return Err(self.classify_failure(prepared, stdout_s, stderr_s, status));
        }
        Ok(stdout_s)
    }

    /// Like [`run`](Self::run) but with stdout returned as raw bytes,
    /// for output that is not text (e.g. `cat-file` on a blob).
    pub fn run_bytes(&self, invocation: &Invocation) -> Result<Vec<u8>, GitError> {
        let (stdout, stderr, status, prepared) = self.run_captured(invocation)?;
        if invocation.check && !status.success() {
            let candidates = encoding::candidates(&self.config);
            let stdout_s = encoding::lax_decode(&stdout, &candidates);
            let stderr_s = encoding::lax_decode(&stderr, &candidates);
            return Err(self.classify_failure(prepared, stdout_s, stderr_s, status));
        }
        Ok(stdout)
    }

    /// Spawn git and hand the live process to the caller, no draining, no
    /// decoding. For long-running or cancellable operations.
    pub fn spawn(&self, invocation: &Invocation) -> Result<ProcessHandle, GitError> {
        let prepared = self.prepare(invocation)?;
        let child = self.spawn_child(&prepared, invocation)?;
        Ok(ProcessHandle::new(child, prepared.command_line))
    }

    fn run_captured(
        &self,
        invocation: &Invocation,
    ) -> Result<(Vec<u8>, Vec<u8>, ExitStatus, Prepared), GitError> {
        let prepared = self.prepare(invocation)?;

        let mirror = invocation
            .show_output
            .unwrap_or_else(|| self.config.mirrors_output(&invocation.subcommand));
        let transcript = if mirror { self.transcript.clone() } else { None };

        if let Some(sink) = &transcript {
            sink.append(&format!("$ {}\n", prepared.command_line));
        }

        // Logs the duration on every exit path, including errors below.
        let _timing = InvocationTiming {
            command_line: prepared.command_line.clone(),
            started: Instant::now(),
            transcript: transcript.clone(),
        };

        let mut child = self.spawn_child(&prepared, invocation)?;

        let on_line = |line: &OutputLine| {
            if let Some(sink) = &transcript {
                sink.append(&encoding::lossy_utf8(line.bytes()));
            }
        };
        let (stdout, stderr) = communicate(&mut child, invocation.stdin.as_deref(), on_line)
            .map_err(|e| self.spawn_failed(&prepared, e))?;
        let status = child
            .wait()
            .map_err(|e| self.spawn_failed(&prepared, e))?;

        Ok((stdout, stderr, status, prepared))
    }

    /// Fail-fast resolution: binary, argument vector, working directory.
    /// Nothing is spawned if any of these fail.
    fn prepare(&self, invocation: &Invocation) -> Result<Prepared, GitError> {
        let binary = match binary::git_binary(&self.config) {
            Ok(b) => b,
            Err(e) => {
                if e.is_process_wide() && binary::should_show_binary_message() {
                    self.notify(&e.to_string());
                }
                return Err(e);
            }
        };

        let mut argv: Vec<String> = Vec::new();
        argv.extend_from_slice(self.config.pre_flags(&invocation.subcommand));
        argv.push(invocation.subcommand.clone());
        argv.extend_from_slice(self.config.post_flags(&invocation.subcommand));
        argv.extend(invocation.args.iter().cloned());

        let working_dir = match &invocation.working_dir {
            Some(dir) => dir.clone(),
            None => self.repo_path()?,
        };

        let command_line = render_command_line(&argv);
        Ok(Prepared {
            program: binary.path,
            argv,
            working_dir,
            command_line,
        })
    }

    fn spawn_child(
        &self,
        prepared: &Prepared,
        invocation: &Invocation,
    ) -> Result<std::process::Child, GitError> {
        let mut command = Command::new(&prepared.program);
        command
            .args(&prepared.argv)
            .current_dir(&prepared.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Environment layering, lowest first: inherited process env,
            // configured overrides, per-call overrides.
            .envs(&self.config.env)
            .envs(&invocation.env);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Group leadership lets a cancelling caller kill the whole
            // tree, not just the immediate child.
            command.process_group(0);
        }

        command
            .spawn()
            .map_err(|e| self.spawn_failed(prepared, e))
    }

    /// OS-level spawn/drain errors should never happen; wrap them with the
    /// full context a bug report needs.
    fn spawn_failed(&self, prepared: &Prepared, source: std::io::Error) -> GitError {
        GitError::SpawnFailed {
            command: prepared.command_line.clone(),
            working_dir: prepared.working_dir.clone(),
            source,
        }
    }

    fn classify_failure(
        &self,
        prepared: Prepared,
        stdout: String,
        stderr: String,
        status: ExitStatus,
    ) -> GitError {
        let hint = if stderr.contains(MISSING_IDENTITY_MARKER) {
            if let Some(hook) = &self.on_missing_identity {
                hook();
            }
            Some(ErrorHint::MissingIdentity)
        } else {
            None
        };

        GitError::CommandFailed {
            command: prepared.command_line,
            working_dir: prepared.working_dir,
            stdout,
            stderr,
            exit_code: status.code(),
            hint,
        }
    }

    fn notify(&self, message: &str) {
        match &self.notify_user {
            Some(notify) => notify(message),
            None => tracing::warn!("{message}"),
        }
    }
}

/// Drop guard reporting wall-clock duration to the log sink (and the
/// transcript footer when mirroring), on success and failure alike.
struct InvocationTiming {
    command_line: String,
    started: Instant,
    transcript: Option<Arc<dyn TranscriptSink>>,
}

impl Drop for InvocationTiming {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        tracing::debug!(
            command = %self.command_line,
            elapsed_secs = elapsed,
            "git invocation finished"
        );
        if let Some(sink) = &self.transcript {
            sink.append(&format!("\n[Done in {elapsed:.2}s]\n"));
        }
    }
}

/// `git <args…>`, shell-quoted for display. The binary path is left out,
/// matching what a user would have typed.
fn render_command_line(argv: &[String]) -> String {
    std::iter::once("git".to_string())
        .chain(
            argv.iter()
                .map(|a| shell_escape::escape(Cow::from(a.as_str())).into_owned()),
        )
        .collect::<Vec<_>>()
        .join(" ")
}
