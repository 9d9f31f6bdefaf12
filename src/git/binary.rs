//! Locating and validating the git executable
//!
//! Resolution order: configured path (plain or platform-keyed), then PATH.
//! The resolved path and its version are cached process-wide; the cache is
//! only dropped by an explicit [`reset_git_binary`] (settings change,
//! tests). A binary below the minimum version is never cached as usable.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::config::GitConfig;
use crate::error::GitError;

/// Oldest git this engine accepts, overridable via `min_git_version`.
pub const MIN_GIT_VERSION: GitVersion = GitVersion(2, 18, 0);

/// A three-part git version, ordered componentwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GitVersion(pub u32, pub u32, pub u32);

impl fmt::Display for GitVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

impl FromStr for GitVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut component = || {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(|| format!("invalid git version: {s:?}"))
        };
        let version = GitVersion(component()?, component()?, component()?);
        if parts.next().is_some() {
            return Err(format!("invalid git version: {s:?}"));
        }
        Ok(version)
    }
}

impl<'de> Deserialize<'de> for GitVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The resolved executable plus its parsed version.
#[derive(Debug, Clone)]
pub struct GitBinary {
    pub path: PathBuf,
    pub version: GitVersion,
}

static GIT_BINARY: Mutex<Option<GitBinary>> = Mutex::new(None);
static MESSAGE_SHOWN: AtomicBool = AtomicBool::new(false);

/// Resolve (and memoize) the git binary for this process.
///
/// Resolution failures are not cached; a later call after the user fixes
/// their PATH or settings will probe again.
pub fn git_binary(config: &GitConfig) -> Result<GitBinary, GitError> {
    let mut cached = GIT_BINARY
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(binary) = cached.as_ref() {
        return Ok(binary.clone());
    }

    let binary = resolve_binary(config)?;
    tracing::debug!(path = %binary.path.display(), version = %binary.version, "git executable");
    *cached = Some(binary.clone());
    Ok(binary)
}

/// Drop the cached binary and re-arm the one-time user message. Called on
/// settings changes and from tests.
pub fn reset_git_binary() {
    *GIT_BINARY.lock().unwrap_or_else(PoisonError::into_inner) = None;
    MESSAGE_SHOWN.store(false, Ordering::SeqCst);
}

/// Gate for the one-time user-visible message about an unusable binary.
/// Returns true exactly once per process lifetime (until reset).
pub(crate) fn should_show_binary_message() -> bool {
    !MESSAGE_SHOWN.swap(true, Ordering::SeqCst)
}

fn resolve_binary(config: &GitConfig) -> Result<GitBinary, GitError> {
    let configured = config
        .git_path
        .as_ref()
        .and_then(|setting| setting.for_current_platform())
        .map(Path::to_path_buf);

    let path = match configured {
        Some(p) => p,
        None => which::which("git").map_err(|_| GitError::BinaryNotFound)?,
    };

    // An unlaunchable path means "no binary"; a launchable one with weird
    // output is its own failure so the user gets a precise message.
    let output = Command::new(&path)
        .arg("--version")
        .output()
        .map_err(|_| GitError::BinaryNotFound)?;
    let version = match parse_version(&String::from_utf8_lossy(&output.stdout)) {
        Some(v) => v,
        None => return Err(GitError::VersionUnparseable { path }),
    };

    let required = config.min_git_version.unwrap_or(MIN_GIT_VERSION);
    if version < required {
        return Err(GitError::GitTooOld {
            found: version,
            required,
        });
    }

    Ok(GitBinary { path, version })
}

/// Parse `git version <major>.<minor>.<patch>`, anchored at the start.
/// Suffixes like `.windows.1` are tolerated.
pub fn parse_version(text: &str) -> Option<GitVersion> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"^git version (\d+)\.(\d+)\.(\d+)").expect("version pattern is valid")
    });
    let caps = re.captures(text)?;
    let part = |i| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    Some(GitVersion(part(1)?, part(2)?, part(3)?))
}
