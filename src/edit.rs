use crate::rules::{Category, FixRule};
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// The fundamental edit primitive: byte-span replacement with verification.
///
/// Every rule transform compiles down to a list of these. Spans always refer
/// to the unmodified text of the current pass.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Edit does nothing until it is scheduled and patched"]
pub struct Edit {
    /// Starting byte offset (inclusive)
    pub start: usize,
    /// Ending byte offset (exclusive)
    pub end: usize,
    /// New text for [start, end)
    pub replacement: String,
    /// Rule that produced the edit
    pub rule_id: String,
    pub category: Category,
    pub priority: i32,
    /// Verification of what we expect to find before applying
    pub expected_before: EditVerification,
}

/// Verification strategy for edit safety.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerification {
    /// Exact text match required
    ExactMatch(String),
    /// xxh3 hash of expected text (faster for large spans)
    Hash(u64),
}

impl EditVerification {
    /// Check if the provided text matches the verification criteria.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EditVerification::ExactMatch(expected) => text == expected,
            EditVerification::Hash(expected_hash) => xxh3_64(text.as_bytes()) == *expected_hash,
        }
    }

    /// Create verification from text, using hash for text over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            EditVerification::Hash(xxh3_64(text.as_bytes()))
        } else {
            EditVerification::ExactMatch(text.to_string())
        }
    }

    /// Get hash value regardless of variant.
    pub fn hash(&self) -> u64 {
        match self {
            EditVerification::Hash(h) => *h,
            EditVerification::ExactMatch(text) => xxh3_64(text.as_bytes()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("before-text verification failed at [{start}, {end}): found {found:?}")]
    BeforeTextMismatch {
        start: usize,
        end: usize,
        found: String,
    },

    #[error("invalid byte range [{start}, {end}) in text of length {len}")]
    InvalidByteRange { start: usize, end: usize, len: usize },

    #[error("edit boundary {offset} splits a UTF-8 character")]
    NotCharBoundary { offset: usize },
}

/// Outcome of checking an edit against the text it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "EditCheck should be checked for already-applied edits"]
pub enum EditCheck {
    /// The span holds the expected text
    Applicable,
    /// The span already holds the replacement
    AlreadyApplied,
}

impl Edit {
    /// Replace `[start, end)`, which currently holds `expected_before`.
    ///
    /// Rule metadata is stamped later by [`Edit::attributed_to`].
    pub fn new(
        start: usize,
        end: usize,
        replacement: impl Into<String>,
        expected_before: impl AsRef<str>,
    ) -> Self {
        Self {
            start,
            end,
            replacement: replacement.into(),
            rule_id: String::new(),
            category: Category::Formatting,
            priority: 0,
            expected_before: EditVerification::from_text(expected_before.as_ref()),
        }
    }

    /// Replace the span `[start, end)` of `source`.
    pub fn replace(source: &str, start: usize, end: usize, replacement: impl Into<String>) -> Self {
        let current = source.get(start..end).unwrap_or_default();
        Self::new(start, end, replacement, current)
    }

    /// Zero-length insertion at `offset`.
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::new(offset, offset, text, "")
    }

    /// Delete the span `[start, end)` of `source`.
    pub fn delete(source: &str, start: usize, end: usize) -> Self {
        Self::replace(source, start, end, "")
    }

    /// Stamp the producing rule's identity onto the edit.
    pub fn attributed_to(mut self, rule: &dyn FixRule) -> Self {
        self.rule_id = rule.id().to_string();
        self.category = rule.category();
        self.priority = rule.priority();
        self
    }

    pub fn is_insertion(&self) -> bool {
        self.start == self.end
    }

    /// Change in text length once applied.
    pub fn len_delta(&self) -> isize {
        self.replacement.len() as isize - (self.end - self.start) as isize
    }

    /// Whether two edits touch the same text: `other` starts inside `self`,
    /// or both start at the same offset.
    pub fn conflicts_with(&self, other: &Edit) -> bool {
        let (a, b) = if self.start <= other.start {
            (self, other)
        } else {
            (other, self)
        };
        b.start < a.end || a.start == b.start
    }

    /// Validate the edit against the text of the current pass.
    pub fn check(&self, text: &str) -> Result<EditCheck, EditError> {
        if self.start > self.end || self.end > text.len() {
            return Err(EditError::InvalidByteRange {
                start: self.start,
                end: self.end,
                len: text.len(),
            });
        }
        for offset in [self.start, self.end] {
            if !text.is_char_boundary(offset) {
                return Err(EditError::NotCharBoundary { offset });
            }
        }

        let current = &text[self.start..self.end];
        if current == self.replacement {
            return Ok(EditCheck::AlreadyApplied);
        }
        if !self.expected_before.matches(current) {
            return Err(EditError::BeforeTextMismatch {
                start: self.start,
                end: self.end,
                found: current.to_string(),
            });
        }
        Ok(EditCheck::Applicable)
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or the target is left untouched.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        None => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no parent directory",
            ))
        }
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
