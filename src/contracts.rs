//! Shared data model, invariant constants, and error taxonomy for the patch
//! engine. Everything here is an immutable value type built by [`crate::parser`]
//! or [`crate::applier`] and consumed by callers; nothing in this module
//! mutates after construction.

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Header line prefixes the parser skips without attempting to interpret.
///
/// File-header lines (`--- `, `+++ `, `*** `) are handled structurally by
/// [`crate::parser`], not skipped, so they are intentionally absent here.
pub const SKIP_PREFIXES: &[&str] = &[
    "diff --git ",
    "index ",
    "new file mode ",
    "deleted file mode ",
    "rename from ",
    "rename to ",
    "similarity index ",
    "Binary files ",
];

/// 0-based indexing used throughout the crate's public API.
pub const INDEX_BASE: usize = 0;

/// The only newline convention the engine understands internally; callers
/// normalize CRLF/CR to LF before calling [`crate::parser::parse`] or
/// [`crate::applier::apply`].
pub const NEWLINE_POLICY: &str = "LF";

/// Default ring-search radius used by [`crate::applier`] fuzzy anchoring,
/// in lines. See [`crate::applier::ApplyOptions::fuzzy_context`].
pub const DEFAULT_FUZZY_CONTEXT: usize = 200;

/// The kind of a single line inside a hunk body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LineKind {
    /// Unchanged line, present in both old and new text. An empty-text
    /// context line is blank-tolerant: it matches a run of zero or more
    /// consecutive blank lines in the text being matched against.
    Context,
    /// Line present only in the new text.
    Insert,
    /// Line present only in the old text.
    Delete,
}

/// A single line within a [`Hunk`] body, tagged with its kind. `text` never
/// contains a trailing newline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HunkLine {
    pub kind: LineKind,
    pub text: String,
}

impl HunkLine {
    pub fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// A blank-tolerant context line: matches zero or more blank lines.
    pub fn blank_context() -> Self {
        Self::new(LineKind::Context, String::new())
    }

    pub fn is_blank_context(&self) -> bool {
        self.kind == LineKind::Context && self.text.is_empty()
    }

    /// Consuming lines are the lines that must already exist in the text
    /// being patched: context and deletion lines (everything but pure
    /// insertions).
    pub fn is_consuming(&self) -> bool {
        matches!(self.kind, LineKind::Context | LineKind::Delete)
    }
}

/// A contiguous change region: a header giving old/new line spans, plus an
/// ordered body of context, insertion, and deletion lines.
///
/// `old_start`/`new_start` are 0-based, already converted from the 1-based
/// wire format by the parser. The applier treats the header counts as
/// advisory only — see `DESIGN.md` for the header-vs-body-disagreement
/// policy — and anchors using the body instead.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines that must already be present in the text being patched.
    pub fn consuming_lines(&self) -> impl Iterator<Item = &HunkLine> {
        self.lines.iter().filter(|l| l.is_consuming())
    }

    /// The minimum number of lines in the working copy a match at some
    /// anchor must span: deletions plus non-blank context lines. Blank
    /// context lines are excluded because they can match zero lines.
    pub fn min_consumed_len(&self) -> usize {
        self.consuming_lines()
            .filter(|l| l.kind == LineKind::Delete || !l.text.is_empty())
            .count()
    }
}

/// A single file's worth of hunks, with cleaned old/new paths.
///
/// Paths have had any trailing tab-terminated timestamp truncated and an
/// optional leading `a/`/`b/` prefix stripped, per git's unified-diff
/// convention.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FilePatch {
    pub old_path: String,
    pub new_path: String,
    pub hunks: Vec<Hunk>,
    /// Set when a `\ No newline at end of file` marker follows the last
    /// context/deletion line of some hunk — the *old* side lacks a trailing
    /// newline.
    pub old_no_newline: bool,
    /// Set when a `\ No newline at end of file` marker follows the last
    /// context/insertion line of some hunk — the *new* side lacks a
    /// trailing newline.
    pub new_no_newline: bool,
}

impl FilePatch {
    pub fn new(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self {
            old_path: old_path.into(),
            new_path: new_path.into(),
            hunks: Vec::new(),
            old_no_newline: false,
            new_no_newline: false,
        }
    }
}

/// Where an output line in an [`ApplyResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum OriginEntry {
    /// Produced by line `index` (0-based) of the original text.
    Original { index: usize },
    /// Not present in the original text; the line was added by a hunk.
    Inserted,
}

impl OriginEntry {
    pub fn is_inserted(&self) -> bool {
        matches!(self, OriginEntry::Inserted)
    }

    pub fn original_index(&self) -> Option<usize> {
        match self {
            OriginEntry::Original { index } => Some(*index),
            OriginEntry::Inserted => None,
        }
    }
}

/// The result of applying a [`FilePatch`] to a string.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ApplyResult {
    /// The patched text, LF-joined, with a trailing newline iff the
    /// original had one (or the patch's no-newline marker overrides it).
    pub text: String,
    /// Sorted, unique 0-based indices into `text`'s lines that were added.
    pub added_lines: Vec<usize>,
    /// Sorted, unique 0-based indices into the *original* text's lines that
    /// were removed.
    pub removed_original_indices: Vec<usize>,
    /// Parallel to `text`'s lines: `origin_map[i]` says which original line
    /// produced output line `i`, or that it was inserted.
    pub origin_map: Vec<OriginEntry>,
    /// Indices (into the patch's `hunks`) of hunks that could not be
    /// anchored and were skipped because `apply` was called with
    /// `strict = false`.
    pub skipped_hunks: Vec<usize>,
}

/// Why a hunk could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ApplyReason {
    /// No anchor index (strict, fuzzy, or global-scan) matched the hunk's
    /// consuming lines.
    #[error("could not locate the hunk's context in the text")]
    CannotLocate,
    /// The anchor search found a match but the apply walk disagreed with
    /// it. This should be unreachable if the two walks are kept in sync;
    /// treated as an internal invariant violation rather than a normal
    /// failure mode.
    #[error("hunk context mismatched during apply (internal invariant violated)")]
    ContextMismatch,
    /// The hunk's anchor or one of its deletions falls inside a region a
    /// previous hunk inserted.
    #[error("hunk overlaps a previous hunk's insertion")]
    Overlap,
}

/// A hunk failed to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[error("hunk {hunk_index}: {reason}")]
pub struct ApplyError {
    pub hunk_index: usize,
    pub reason: ApplyReason,
}

/// A grammar violation encountered while parsing diff text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[error("line {line_no}: {message}")]
pub struct ParseError {
    pub line_no: usize,
    pub message: String,
}

/// A precondition was violated at an API boundary (e.g. a negative
/// navigation cursor).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// The engine's error taxonomy: a single sum type so callers can handle
/// every engine failure with one `match`, regardless of which component
/// raised it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Reserved for callers performing their own file I/O around the engine
/// (reading the original text, writing the result, taking a backup); the
/// engine itself never raises this, since it touches no filesystem.
#[derive(Debug, Error)]
#[error("{path}: {os_message}")]
pub struct IoErrorCompat {
    pub path: String,
    pub os_message: String,
}

impl IoErrorCompat {
    pub fn from_io_error(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self {
            path: path.into(),
            os_message: err.to_string(),
        }
    }
}

/// Convenience enum for a caller's adapter layer that wants one error type
/// spanning both the engine's own failures and its own file I/O failures.
#[derive(Debug, Error)]
pub enum CallerError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Io(#[from] IoErrorCompat),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hunk_line_blank_context_matches_helper() {
        let l = HunkLine::blank_context();
        assert!(l.is_blank_context());
        assert!(l.is_consuming());
    }

    #[test]
    fn origin_entry_accessors() {
        let inserted = OriginEntry::Inserted;
        let original = OriginEntry::Original { index: 3 };
        assert!(inserted.is_inserted());
        assert_eq!(inserted.original_index(), None);
        assert!(!original.is_inserted());
        assert_eq!(original.original_index(), Some(3));
    }

    #[test]
    fn min_consumed_len_excludes_blank_context_and_insertions() {
        let hunk = Hunk {
            old_start: 0,
            old_len: 2,
            new_start: 0,
            new_len: 2,
            lines: vec![
                HunkLine::new(LineKind::Context, "a"),
                HunkLine::blank_context(),
                HunkLine::new(LineKind::Delete, "b"),
                HunkLine::new(LineKind::Insert, "B"),
            ],
        };
        // "a" (non-blank context) + "b" (delete) == 2; blank context and
        // the insertion don't count against the minimum span.
        assert_eq!(hunk.min_consumed_len(), 2);
    }

    #[test]
    fn engine_error_display_is_transparent() {
        let err: EngineError = ParseError {
            line_no: 4,
            message: "bad hunk header".into(),
        }
        .into();
        assert_eq!(err.to_string(), "line 4: bad hunk header");
    }
}
