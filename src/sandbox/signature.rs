//! Normalised error signatures.
//!
//! A signature reduces captured error output to the single line that names
//! the error, with volatile details (paths, line numbers, addresses, quoted
//! names, numbers) replaced by placeholders. Two failures caused by the same
//! mistake in different scripts map to the same signature, which is what the
//! corrective store is searched with.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Signature used when a script exceeds its time limit.
pub const TIMEOUT_CORE_LINE: &str = "TimeoutError: script exceeded the sandbox time limit";

/// Normalised description of why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorSignature {
    /// The raw line the signature was derived from.
    pub core_line: String,
    /// `core_line` with volatile details replaced by placeholders.
    pub normalized: String,
    /// Short SHA-256 fingerprint of `normalized`.
    pub fingerprint: String,
}

impl ErrorSignature {
    /// Build a signature from a single error line.
    pub fn from_core_line(line: &str) -> Self {
        let core_line = line.trim().to_string();
        let normalized = normalize(&core_line);
        let fingerprint = fingerprint(&normalized);
        Self {
            core_line,
            normalized,
            fingerprint,
        }
    }

    /// Derive a signature from captured error output.
    ///
    /// Returns `None` when the text holds nothing but whitespace.
    pub fn from_error_text(text: &str) -> Option<Self> {
        core_error_line(text).map(Self::from_core_line)
    }

    pub fn timeout() -> Self {
        Self::from_core_line(TIMEOUT_CORE_LINE)
    }

    pub fn missing_artifact(name: &str) -> Self {
        Self::from_core_line(&format!("MissingArtifact: required output '{}' was not produced", name))
    }

    pub fn crashed(signal: Option<i32>) -> Self {
        match signal {
            Some(signal) => Self::from_core_line(&format!("ProcessCrashed: terminated by signal {}", signal)),
            None => Self::from_core_line("ProcessCrashed: terminated abnormally"),
        }
    }

    pub fn exit_code(code: i32) -> Self {
        Self::from_core_line(&format!("ExitStatus: process exited with code {} and no error output", code))
    }

    /// Error class prefix, e.g. `NameError`.
    pub fn error_kind(&self) -> &str {
        self.core_line
            .split_once(':')
            .map(|(kind, _)| kind.trim())
            .filter(|kind| !kind.is_empty() && !kind.contains(' '))
            .unwrap_or("Error")
    }
}

impl fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized)
    }
}

fn error_line_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][\w.]*(Error|Exception|Exit|Interrupt|Warning)\b").ok())
        .as_ref()
}

fn normalizers() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r#"(?:[A-Za-z]:)?(?:[\\/][\w.\-]+){2,}"#, "<path>"),
            (r"0x[0-9A-Fa-f]+", "<addr>"),
            (r"'[^']*'", "'<id>'"),
            (r#""[^"]*""#, "\"<id>\""),
            (r"\bline \d+", "line <n>"),
            (r"\b\d+(?:\.\d+)?\b", "<num>"),
            (r"\s+", " "),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Pick the line of captured output that names the error.
///
/// Scans from the end for a line shaped like `SomeError: message`; failing
/// that, the last non-empty line that is not a caret marker.
pub fn core_error_line(text: &str) -> Option<&str> {
    let meaningful = || {
        text.lines()
            .rev()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter(|line| !line.chars().all(|c| matches!(c, '^' | '~' | ' ')))
    };

    if let Some(re) = error_line_regex() {
        if let Some(line) = meaningful().find(|line| re.is_match(line)) {
            return Some(line);
        }
    }
    meaningful().next()
}

fn normalize(line: &str) -> String {
    normalizers()
        .iter()
        .fold(line.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
        .trim()
        .to_string()
}

fn fingerprint(normalized: &str) -> String {
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..8])
}
