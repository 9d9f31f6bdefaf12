//! Text-encoding resolution for git output
//!
//! git emits bytes, not text. Decoding cascades through a fixed priority
//! list: UTF-8 first, then the locale's preferred encoding, then a
//! user-configured fallback. [`strict_decode`] fails loudly when no
//! candidate succeeds; [`lax_decode`] never fails and is reserved for
//! building human-readable error messages, so error reporting cannot raise
//! a second error.

use std::borrow::Cow;
use std::fmt;

use encoding_rs::{Encoding, UTF_8};

use crate::config::GitConfig;

/// Diagnostic text prefixed to decode-failure messages, followed by the
/// lossy rendering of both streams.
pub const DECODE_ERROR_PREAMBLE: &str = "\
The git command returned data that is unparsable.  This may happen
if you have checked binary data into your repository, or not UTF-8
encoded files.  In the latter case use the `fallback_encoding` setting.

-- Partially decoded output follows; \u{fffd} denotes decoding errors --

";

/// All candidates failed to decode the input.
#[derive(Debug)]
pub struct DecodeFailed {
    /// Labels of the encodings that were tried, in order.
    pub tried: Vec<&'static str>,
}

impl fmt::Display for DecodeFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no candidate encoding decoded the output (tried: {})", self.tried.join(", "))
    }
}

impl std::error::Error for DecodeFailed {}

/// The candidate encodings for one invocation, in priority order.
///
/// Duplicates are removed so a UTF-8 locale does not probe UTF-8 twice.
pub fn candidates(config: &GitConfig) -> Vec<&'static Encoding> {
    let mut out: Vec<&'static Encoding> = vec![UTF_8];
    if let Some(locale) = locale_encoding() {
        if !out.contains(&locale) {
            out.push(locale);
        }
    }
    if let Some(label) = &config.fallback_encoding {
        if let Some(enc) = Encoding::for_label(label.as_bytes()) {
            if !out.contains(&enc) {
                out.push(enc);
            }
        } else {
            tracing::warn!(label = %label, "unknown fallback_encoding, ignoring");
        }
    }
    out
}

/// The preferred encoding of the current locale, derived from the codeset
/// suffix of `LC_ALL` / `LC_CTYPE` / `LANG` (e.g. `ru_RU.KOI8-R`).
fn locale_encoding() -> Option<&'static Encoding> {
    for var in ["LC_ALL", "LC_CTYPE", "LANG"] {
        let value = match std::env::var(var) {
            Ok(v) if !v.is_empty() => v,
            _ => continue,
        };
        let codeset = match value.split('.').nth(1).and_then(|c| c.split('@').next()) {
            Some(c) => c.to_string(),
            None => continue,
        };
        return Encoding::for_label(codeset.as_bytes());
    }
    None
}

/// Decode with the first candidate that succeeds without replacement.
///
/// Errors only if every candidate fails; primary output goes through this
/// path so mangled text can never silently reach downstream parsers.
pub fn strict_decode(bytes: &[u8], candidates: &[&'static Encoding]) -> Result<String, DecodeFailed> {
    for encoding in candidates {
        if let Some(decoded) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            return Ok(decoded.into_owned());
        }
    }
    Err(DecodeFailed {
        tried: candidates.iter().map(|e| e.name()).collect(),
    })
}

/// Decode through the same cascade, falling back to lossy UTF-8 when every
/// candidate fails. Never errors.
pub fn lax_decode(bytes: &[u8], candidates: &[&'static Encoding]) -> String {
    match strict_decode(bytes, candidates) {
        Ok(text) => text,
        Err(_) => lossy_utf8(bytes),
    }
}

/// Plain lossy UTF-8 rendering, replacement characters for bad bytes.
pub fn lossy_utf8(bytes: &[u8]) -> String {
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}
