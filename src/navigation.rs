//! Turns an [`ApplyResult`] into change blocks a GUI can step through with
//! next/previous-change commands.

use tracing::trace;

use crate::contracts::{ApplyResult, ValidationError};

/// Whether a [`ChangeBlock`] is an insertion or a deletion, from the point
/// of view of the applied (new) text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    /// A deletion has no span in the new text; `start == end` marks the
    /// output line position where the removed lines used to sit.
    Removed,
}

/// A contiguous run of added or removed lines. `end` is inclusive: a block
/// spanning a single line has `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeBlock {
    pub start: usize,
    pub end: usize,
    pub kind: ChangeKind,
}

/// Builds the ordered list of change blocks for `result`: runs of
/// consecutive added lines become [`ChangeKind::Added`] blocks; a removal
/// is reported as a zero-width [`ChangeKind::Removed`] block anchored at
/// the output position it would have occupied.
pub fn analyze_changes(result: &ApplyResult) -> Vec<ChangeBlock> {
    let mut blocks = Vec::new();

    let mut added = result.added_lines.clone();
    added.sort_unstable();
    let mut i = 0;
    while i < added.len() {
        let start = added[i];
        let mut end = start;
        while i + 1 < added.len() && added[i + 1] == end + 1 {
            end = added[i + 1];
            i += 1;
        }
        blocks.push(ChangeBlock {
            start,
            end,
            kind: ChangeKind::Added,
        });
        i += 1;
    }

    for &removed_index in &result.removed_original_indices {
        let output_position = result
            .origin_map
            .iter()
            .position(|o| o.original_index().is_some_and(|idx| idx > removed_index))
            .unwrap_or(result.origin_map.len());
        blocks.push(ChangeBlock {
            start: output_position,
            end: output_position,
            kind: ChangeKind::Removed,
        });
    }

    blocks.sort_by_key(|b| b.start);
    trace!(blocks = blocks.len(), "analyzed change blocks");
    blocks
}

/// Steps through a fixed set of [`ChangeBlock`]s computed once from an
/// [`ApplyResult`], answering next/previous-change navigation queries.
#[derive(Debug, Clone)]
pub struct ChangeNavigator {
    blocks: Vec<ChangeBlock>,
}

impl ChangeNavigator {
    pub fn from_result(result: &ApplyResult) -> Self {
        Self {
            blocks: analyze_changes(result),
        }
    }

    pub fn blocks(&self) -> &[ChangeBlock] {
        &self.blocks
    }

    /// The line position of the first block starting strictly after `cur`;
    /// wraps to the first block if none does. Returns `cur` unchanged when
    /// there are no changes at all.
    pub fn next_change(&self, cur: i64) -> Result<i64, ValidationError> {
        require_non_negative(cur)?;
        if self.blocks.is_empty() {
            return Ok(cur);
        }
        let found = self.blocks.iter().find(|b| b.start as i64 > cur);
        Ok(found.unwrap_or(&self.blocks[0]).start as i64)
    }

    /// The line position of the last block starting strictly before `cur`;
    /// wraps to the last block if none does. Returns `cur` unchanged when
    /// there are no changes at all.
    pub fn prev_change(&self, cur: i64) -> Result<i64, ValidationError> {
        require_non_negative(cur)?;
        if self.blocks.is_empty() {
            return Ok(cur);
        }
        let found = self.blocks.iter().rev().find(|b| (b.start as i64) < cur);
        Ok(found.unwrap_or_else(|| self.blocks.last().unwrap()).start as i64)
    }
}

fn require_non_negative(cur: i64) -> Result<(), ValidationError> {
    if cur < 0 {
        Err(ValidationError {
            field: "cur".into(),
            message: "navigation cursor must not be negative".into(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::apply;
    use crate::parser::parse;

    fn apply_diff(diff: &str, original: &str) -> ApplyResult {
        let patch = parse(diff).unwrap().into_iter().next().unwrap();
        apply(original, &patch).unwrap()
    }

    #[test]
    fn analyze_changes_merges_consecutive_additions_into_one_block() {
        let result = apply_diff(
            "--- a/f\n+++ b/f\n@@ -1,1 +1,3 @@\n a\n+b\n+c\n",
            "a\n",
        );
        let blocks = analyze_changes(&result);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, ChangeKind::Added);
        assert_eq!((blocks[0].start, blocks[0].end), (1, 2));
    }

    #[test]
    fn navigator_next_change_skips_to_first_block_after_cursor() {
        let result = apply_diff("--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n a\n-b\n+B\n", "a\nb\n");
        let nav = ChangeNavigator::from_result(&result);
        assert_eq!(nav.next_change(0).unwrap(), 1);
    }

    #[test]
    fn navigator_next_change_wraps_to_first_block_past_the_end() {
        let result = apply_diff("--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n a\n-b\n+B\n", "a\nb\n");
        let nav = ChangeNavigator::from_result(&result);
        assert_eq!(nav.next_change(100).unwrap(), 1);
    }

    #[test]
    fn navigator_prev_change_wraps_to_last_block_before_the_start() {
        let result = apply_diff(
            "--- a/f\n+++ b/f\n@@ -1,1 +1,2 @@\n a\n+b\n",
            "a\n",
        );
        let nav = ChangeNavigator::from_result(&result);
        // a single Added block at (1, 2): nothing starts before cursor 0,
        // so prev_change wraps to that same block.
        assert_eq!(nav.prev_change(0).unwrap(), 1);
    }

    #[test]
    fn negative_cursor_is_a_validation_error() {
        let result = apply_diff("--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n-a\n+b\n", "a\n");
        let nav = ChangeNavigator::from_result(&result);
        let err = nav.next_change(-5).unwrap_err();
        assert_eq!(err.field, "cur");
    }

    #[test]
    fn no_changes_returns_cursor_unchanged() {
        let result = ApplyResult {
            text: "a\nb\n".into(),
            added_lines: Vec::new(),
            removed_original_indices: Vec::new(),
            origin_map: Vec::new(),
            skipped_hunks: Vec::new(),
        };
        let nav = ChangeNavigator::from_result(&result);
        assert!(nav.blocks().is_empty());
        assert_eq!(nav.next_change(3).unwrap(), 3);
        assert_eq!(nav.prev_change(3).unwrap(), 3);
    }
}
