//! Settings for the git invocation engine
//!
//! Hosts either construct a [`GitConfig`] programmatically or load one from
//! a TOML file. Everything defaults to "no special configuration": git is
//! found on PATH, no extra flags, no environment overrides, nothing mirrored
//! to a transcript.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::git::binary::GitVersion;

/// Configured location of the git binary.
///
/// A plain path applies everywhere; a keyed table selects by platform
/// (`linux`, `osx`, `windows`) with an optional `default` fallback.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GitPathSetting {
    Plain(PathBuf),
    PerPlatform(HashMap<String, PathBuf>),
}

impl GitPathSetting {
    /// Resolve the configured path for the running platform, if any.
    pub fn for_current_platform(&self) -> Option<&Path> {
        match self {
            GitPathSetting::Plain(p) => Some(p),
            GitPathSetting::PerPlatform(map) => map
                .get(current_platform_key())
                .or_else(|| map.get("default"))
                .map(PathBuf::as_path),
        }
    }
}

fn current_platform_key() -> &'static str {
    if cfg!(target_os = "macos") {
        "osx"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        "linux"
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Explicit git binary location. When unset, PATH is searched.
    pub git_path: Option<GitPathSetting>,

    /// Flags inserted *before* the subcommand, keyed by subcommand.
    /// e.g. `diff = ["-c", "diff.noprefix=false"]`.
    pub global_pre_flags: HashMap<String, Vec<String>>,

    /// Flags inserted directly *after* the subcommand, keyed by subcommand.
    pub global_flags: HashMap<String, Vec<String>>,

    /// Environment variables layered over the inherited process environment
    /// for every invocation.
    pub env: HashMap<String, String>,

    /// Last-resort encoding tried after UTF-8 and the locale's preferred
    /// encoding, e.g. `"windows-1251"`.
    pub fallback_encoding: Option<String>,

    /// Subcommands whose output is mirrored live to the transcript sink.
    pub show_output_for: HashSet<String>,

    /// Override for the minimum accepted git version.
    pub min_git_version: Option<GitVersion>,
}

impl GitConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Pre-flags configured for `subcommand`, empty when none.
    pub fn pre_flags(&self, subcommand: &str) -> &[String] {
        self.global_pre_flags
            .get(subcommand)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Post-flags configured for `subcommand`, empty when none.
    pub fn post_flags(&self, subcommand: &str) -> &[String] {
        self.global_flags
            .get(subcommand)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True when `subcommand` should mirror its output live.
    pub fn mirrors_output(&self, subcommand: &str) -> bool {
        self.show_output_for.contains(subcommand)
    }
}
