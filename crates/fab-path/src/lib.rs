//! Reversible escaping for coordination-service path segments.
//!
//! A coordination path is a `/`-separated sequence of segments. Each
//! segment is escaped independently so that a literal `/` or the escape
//! character itself can never be mistaken for a structural separator.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const ESCAPE: char = '-';
const SEP: char = '/';

/// Errors produced while unescaping a segment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("segment contains a raw separator at byte {0}")]
    RawSeparator(usize),
    #[error("escape character at end of segment with nothing following")]
    DanglingEscape,
    #[error("unknown escape sequence '-{0}'")]
    UnknownEscape(char),
}

/// Escape a single path segment.
///
/// `/` becomes `-X`, `\` becomes `-Y`, and a literal `-` becomes `--`.
/// Never apply this twice to the same input — escaping is defined only
/// over unescaped segments.
#[must_use]
pub fn escape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '/' => out.push_str("-X"),
            '\\' => out.push_str("-Y"),
            ESCAPE => out.push_str("--"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape`].
///
/// Fails if an escape character is followed by an unrecognized code or by
/// nothing at all. A raw, unescaped `/` inside the segment is also
/// rejected since it cannot have come from `escape`.
pub fn unescape(segment: &str) -> Result<String, PathError> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        match c {
            '/' => return Err(PathError::RawSeparator(idx)),
            ESCAPE => match chars.next() {
                Some((_, 'X')) => out.push('/'),
                Some((_, 'Y')) => out.push('\\'),
                Some((_, ESCAPE)) => out.push(ESCAPE),
                Some((_, other)) => return Err(PathError::UnknownEscape(other)),
                None => return Err(PathError::DanglingEscape),
            },
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Join a parent path and a child segment into a canonical `/`-joined
/// string, escaping the child segment first.
#[must_use]
pub fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        escape(child)
    } else {
        format!("{parent}{SEP}{}", escape(child))
    }
}

/// Split a canonical path string into its unescaped segments.
pub fn split(path: &str) -> Result<Vec<String>, PathError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    path.split(SEP).map(unescape).collect()
}

/// An ordered sequence of unescaped path segments, with a canonical
/// escaped-string form.
///
/// Used in place of raw strings throughout the registry and store crates
/// so that callers never hand-assemble `/`-joined paths themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CoordinationPath {
    segments: Vec<String>,
}

impl CoordinationPath {
    /// The empty (root) path.
    #[must_use]
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Build a path from already-unescaped segments.
    #[must_use]
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a canonical escaped path string.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        Ok(Self {
            segments: split(path)?,
        })
    }

    /// Append a child segment, returning a new path.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_owned());
        Self { segments }
    }

    /// The unescaped segments, in order.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The final segment, if any.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }
}

impl fmt::Display for CoordinationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in &self.segments {
            if !first {
                f.write_char(SEP)?;
            }
            first = false;
            f.write_str(&escape(seg))?;
        }
        Ok(())
    }
}

use std::fmt::Write as _;
