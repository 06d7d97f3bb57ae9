//! Applies a parsed [`FilePatch`] to in-memory text.
//!
//! Anchoring tries, in order: the hunk header's own line number; a ring
//! search expanding outward from it; a full linear scan of the text; and,
//! only if all three fail under exact comparison, the same three passes
//! again with punctuation normalized. `strict` doesn't change this search —
//! it only decides whether a hunk with no anchor fails the whole apply or
//! is recorded in `skipped_hunks` and skipped. Once an anchor is found the
//! hunk is walked line by line against the text starting there, so the
//! applied result reflects what's actually present rather than what the
//! header claimed.

use tracing::{debug, trace, warn};

use crate::contracts::{
    ApplyError, ApplyReason, ApplyResult, FilePatch, Hunk, HunkLine, LineKind, OriginEntry,
    DEFAULT_FUZZY_CONTEXT,
};

/// Tuning knobs for [`apply_with_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// When `true` (the default), any hunk that cannot be anchored fails
    /// the whole apply. When `false`, unanchorable hunks are recorded in
    /// [`ApplyResult::skipped_hunks`] and the rest of the patch still
    /// applies.
    pub strict: bool,
    /// Radius, in lines, of the ring search performed around a hunk's
    /// declared line number before falling back to a full scan.
    pub fuzzy_context: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            strict: true,
            fuzzy_context: DEFAULT_FUZZY_CONTEXT,
        }
    }
}

/// Applies `patch` to `original` with the default [`ApplyOptions`]
/// (`strict: true`).
pub fn apply(original: &str, patch: &FilePatch) -> Result<ApplyResult, ApplyError> {
    apply_with_options(original, patch, ApplyOptions::default())
}

/// Applies `patch` to `original` under `options`.
pub fn apply_with_options(
    original: &str,
    patch: &FilePatch,
    options: ApplyOptions,
) -> Result<ApplyResult, ApplyError> {
    let original_had_trailing_newline = original.ends_with('\n');
    let original_lines: Vec<&str> = split_lines(original);

    let mut result_lines: Vec<String> = original_lines.iter().map(|l| l.to_string()).collect();
    let mut origin_map: Vec<OriginEntry> = (0..original_lines.len())
        .map(|i| OriginEntry::Original { index: i })
        .collect();
    let mut added_lines: Vec<usize> = Vec::new();
    let mut removed_original_indices: Vec<usize> = Vec::new();
    let mut skipped_hunks: Vec<usize> = Vec::new();

    // How far the result has drifted from the original so far, in lines.
    // Recomputed after each hunk rather than tracked incrementally, so it
    // can never drift out of sync with the lines actually applied.
    let mut line_bias: isize = 0;
    // Lines at or beyond this result-space index belong to a previous
    // hunk's insertion and may not be re-anchored or re-deleted by a later
    // hunk.
    let mut insulated_until: usize = 0;

    for (hunk_index, hunk) in patch.hunks.iter().enumerate() {
        let declared_anchor = (hunk.old_start as isize + line_bias).max(0) as usize;

        let anchor = match find_anchor(
            &result_lines,
            hunk,
            declared_anchor,
            options.fuzzy_context,
            insulated_until,
        ) {
            Some(a) => a,
            None => {
                if options.strict {
                    return Err(ApplyError {
                        hunk_index,
                        reason: ApplyReason::CannotLocate,
                    });
                }
                warn!(hunk_index, "could not anchor hunk, skipping");
                skipped_hunks.push(hunk_index);
                continue;
            }
        };

        if anchor < insulated_until {
            if options.strict {
                return Err(ApplyError {
                    hunk_index,
                    reason: ApplyReason::Overlap,
                });
            }
            warn!(hunk_index, "hunk overlaps a previous insertion, skipping");
            skipped_hunks.push(hunk_index);
            continue;
        }

        trace!(hunk_index, anchor, "applying hunk");
        let replacement_len = apply_walk(
            hunk,
            anchor,
            &mut result_lines,
            &mut origin_map,
            &mut added_lines,
            &mut removed_original_indices,
        );

        insulated_until = anchor + replacement_len;
        line_bias = result_lines.len() as isize - original_lines.len() as isize;
    }

    let mut text = result_lines.join("\n");
    let keep_trailing_newline = if patch.new_no_newline {
        false
    } else {
        original_had_trailing_newline
    };
    if keep_trailing_newline && !result_lines.is_empty() {
        text.push('\n');
    }

    added_lines.sort_unstable();
    added_lines.dedup();
    removed_original_indices.sort_unstable();
    removed_original_indices.dedup();

    debug!(
        hunks_applied = patch.hunks.len() - skipped_hunks.len(),
        hunks_skipped = skipped_hunks.len(),
        "apply complete"
    );

    Ok(ApplyResult {
        text,
        added_lines,
        removed_original_indices,
        origin_map,
        skipped_hunks,
    })
}

/// Applies `patch` without mutating anything, returning what the result
/// would look like. Equivalent to `apply`, offered separately so a caller
/// reviewing a patch doesn't have to read `ApplyResult::text` to know this
/// call has no side effects — the engine never has any regardless.
pub fn preview(original: &str, patch: &FilePatch) -> Result<ApplyResult, ApplyError> {
    apply(original, patch)
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.split('\n').collect()
}

/// Finds where in `lines` this hunk's consuming lines actually occur.
///
/// Tries, in order: the declared anchor; an expanding ring search around
/// it; a full linear scan. If all three fail under an exact (but
/// blank-tolerant) comparison, the whole pipeline is retried once more
/// with punctuation-normalized comparison, so a patch authored in plain
/// ASCII still anchors against source using typographic dashes/quotes.
fn find_anchor(
    lines: &[String],
    hunk: &Hunk,
    declared_anchor: usize,
    fuzzy_context: usize,
    insulated_until: usize,
) -> Option<usize> {
    find_anchor_pass(lines, hunk, declared_anchor, fuzzy_context, insulated_until, false)
        .or_else(|| find_anchor_pass(lines, hunk, declared_anchor, fuzzy_context, insulated_until, true))
}

fn find_anchor_pass(
    lines: &[String],
    hunk: &Hunk,
    declared_anchor: usize,
    fuzzy_context: usize,
    insulated_until: usize,
    normalize: bool,
) -> Option<usize> {
    let needle = &hunk.lines;

    if matches_at(lines, needle, declared_anchor, normalize) {
        return Some(declared_anchor);
    }

    for radius in 1..=fuzzy_context {
        if declared_anchor >= radius {
            let candidate = declared_anchor - radius;
            if candidate >= insulated_until && matches_at(lines, needle, candidate, normalize) {
                return Some(candidate);
            }
        }
        let candidate = declared_anchor + radius;
        if matches_at(lines, needle, candidate, normalize) {
            return Some(candidate);
        }
    }

    (0..lines.len()).find(|&candidate| {
        candidate >= insulated_until && matches_at(lines, needle, candidate, normalize)
    })
}

/// Checks whether `needle`'s consuming lines match `lines` starting at
/// `start`, honoring blank-context lines (which match zero or more blank
/// lines rather than exactly one). When `normalize` is set, typographic
/// punctuation on both sides is folded to ASCII before comparing.
fn matches_at(lines: &[String], needle: &[HunkLine], start: usize, normalize: bool) -> bool {
    let mut cursor = start;
    for hl in needle {
        match hl.kind {
            LineKind::Insert => continue,
            LineKind::Context if hl.text.is_empty() => {
                while lines.get(cursor).is_some_and(|l| l.is_empty()) {
                    cursor += 1;
                }
            }
            LineKind::Context | LineKind::Delete => match lines.get(cursor) {
                Some(l) if lines_equal(l, &hl.text, normalize) => cursor += 1,
                _ => return false,
            },
        }
    }
    true
}

fn lines_equal(a: &str, b: &str, normalize: bool) -> bool {
    if a == b {
        return true;
    }
    normalize && normalize_punctuation(a) == normalize_punctuation(b)
}

/// Folds Unicode dashes, quotes, and spaces to their closest ASCII
/// equivalent, the same normalization the host crate's `seek_sequence`
/// fallback match applies.
fn normalize_punctuation(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
            '\u{2018}' | '\u{2019}' | '\u{201B}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201F}' => '"',
            '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' => ' ',
            '\u{2026}' => '.',
            other => other,
        })
        .collect()
}

/// Rewrites `result_lines` (and the parallel provenance vectors) by
/// replacing the consuming lines at `anchor` with the hunk's output,
/// returning how many result lines the hunk actually wrote (context plus
/// insertions) — the span from `anchor` that later hunks must not
/// re-anchor into or re-delete from.
fn apply_walk(
    hunk: &Hunk,
    anchor: usize,
    result_lines: &mut Vec<String>,
    origin_map: &mut Vec<OriginEntry>,
    added_lines: &mut Vec<usize>,
    removed_original_indices: &mut Vec<usize>,
) -> usize {
    let mut cursor = anchor;
    let mut replacement: Vec<String> = Vec::new();
    let mut replacement_origin: Vec<OriginEntry> = Vec::new();

    for hl in &hunk.lines {
        match hl.kind {
            LineKind::Context if hl.text.is_empty() => {
                while result_lines.get(cursor).is_some_and(|l| l.is_empty()) {
                    replacement.push(result_lines[cursor].clone());
                    replacement_origin.push(origin_map[cursor]);
                    cursor += 1;
                }
            }
            LineKind::Context => {
                replacement.push(result_lines[cursor].clone());
                replacement_origin.push(origin_map[cursor]);
                cursor += 1;
            }
            LineKind::Delete => {
                if let Some(idx) = origin_map[cursor].original_index() {
                    removed_original_indices.push(idx);
                }
                cursor += 1;
            }
            LineKind::Insert => {
                replacement.push(hl.text.clone());
                replacement_origin.push(OriginEntry::Inserted);
            }
        }
    }

    let consumed = cursor - anchor;
    let replacement_len = replacement.len();

    result_lines.splice(anchor..anchor + consumed, replacement);
    origin_map.splice(anchor..anchor + consumed, replacement_origin);

    for (offset, entry) in origin_map[anchor..anchor + replacement_len].iter().enumerate() {
        if entry.is_inserted() {
            added_lines.push(anchor + offset);
        }
    }

    replacement_len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn patch_from(diff: &str) -> FilePatch {
        parse(diff).unwrap().into_iter().next().unwrap()
    }

    #[test]
    fn applies_simple_substitution_at_declared_anchor() {
        let patch = patch_from(
            "--- a/f\n+++ b/f\n@@ -1,3 +1,3 @@\n hello\n-world\n+rust\n there\n",
        );
        let result = apply("hello\nworld\nthere\n", &patch).unwrap();
        assert_eq!(result.text, "hello\nrust\nthere\n");
        assert_eq!(result.removed_original_indices, vec![1]);
        assert_eq!(result.added_lines, vec![1]);
    }

    #[test]
    fn fuzzy_anchor_finds_hunk_after_unrelated_insertions_shift_it() {
        let patch = patch_from("--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n a\n-b\n+B\n");
        // Declared anchor is line 0, but three unrelated lines were
        // prepended since the patch was generated.
        let original = "x\ny\nz\na\nb\n";
        let result = apply(original, &patch).unwrap();
        assert_eq!(result.text, "x\ny\nz\na\nB\n");
    }

    #[test]
    fn blank_context_line_matches_zero_blank_lines() {
        let patch = patch_from("--- a/f\n+++ b/f\n@@ -1,3 +1,3 @@\n a\n\n-b\n+B\n");
        let result = apply("a\nb\n", &patch).unwrap();
        assert_eq!(result.text, "a\nB\n");
    }

    #[test]
    fn strict_apply_fails_when_context_cannot_be_located() {
        let patch = patch_from("--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n nonexistent\n-x\n+y\n");
        let err = apply("completely\ndifferent\ntext\n", &patch).unwrap_err();
        assert_eq!(err.reason, ApplyReason::CannotLocate);
    }

    #[test]
    fn non_strict_apply_skips_unanchorable_hunk_and_keeps_others() {
        let patch = patch_from(
            "--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n ghost\n-x\n+y\n@@ -5,1 +5,1 @@\n real\n-old\n+new\n",
        );
        let result = apply_with_options(
            "real\nold\n",
            &patch,
            ApplyOptions {
                strict: false,
                fuzzy_context: 5,
            },
        )
        .unwrap();
        assert_eq!(result.skipped_hunks, vec![0]);
        assert_eq!(result.text, "real\nnew\n");
    }

    #[test]
    fn preserves_no_trailing_newline_when_original_had_none() {
        let patch = patch_from("--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n-x\n+y\n");
        let result = apply("x", &patch).unwrap();
        assert_eq!(result.text, "y");
    }

    #[test]
    fn punctuation_normalizing_fallback_anchors_against_typographic_source() {
        let patch = patch_from("--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n context\n-can't stop\n+can stop\n");
        // The source text uses a curly apostrophe; the patch was authored
        // with a plain ASCII one.
        let original = "context\ncan\u{2019}t stop\n";
        let result = apply(original, &patch).unwrap();
        assert_eq!(result.text, "context\ncan stop\n");
    }

    #[test]
    fn new_no_newline_marker_overrides_original_trailing_newline() {
        let patch = patch_from(
            "--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n-x\n+y\n\\ No newline at end of file\n",
        );
        let result = apply("x\n", &patch).unwrap();
        assert_eq!(result.text, "y");
    }
}
