//! Turns unified- or context-diff text into [`FilePatch`] values.
//!
//! The grammar is recognized by hand-written line matchers rather than a
//! regex crate: each header shape (`--- `/`+++ ` pair, `@@ ... @@`, the
//! context-diff `*** n,m ****` / `n,m ----` pair) is checked structurally,
//! line by line, the way a single-pass diff reader naturally falls out.

use tracing::{debug, trace};

use crate::contracts::{FilePatch, Hunk, HunkLine, LineKind, ParseError, SKIP_PREFIXES};

/// Parses one or more files' worth of hunks out of `content`.
///
/// `content` may hold several concatenated file patches (as `git diff`
/// produces for multiple touched files); each is returned as its own
/// [`FilePatch`] in encounter order.
pub fn parse(content: &str) -> Result<Vec<FilePatch>, ParseError> {
    let lines: Vec<&str> = content.lines().map(strip_cr).collect();
    let mut cursor = Cursor {
        lines: &lines,
        pos: 0,
    };

    let mut patches = Vec::new();
    while cursor.pos < cursor.lines.len() {
        if is_skippable(cursor.peek().unwrap()) {
            cursor.pos += 1;
            continue;
        }
        if cursor.peek().unwrap().trim().is_empty() {
            cursor.pos += 1;
            continue;
        }
        let patch = parse_one_file(&mut cursor)?;
        debug!(
            old_path = %patch.old_path,
            new_path = %patch.new_path,
            hunks = patch.hunks.len(),
            "parsed file patch"
        );
        patches.push(patch);
    }

    trace!(file_count = patches.len(), "parse complete");
    Ok(patches)
}

/// Parses `content` without building the result, reporting every grammar
/// violation found rather than stopping at the first one. Returns `(true,
/// [])` when the text is well-formed.
///
/// Recovers from a malformed file patch by skipping forward to the next
/// line that looks like a file header and continuing from there, so one
/// bad hunk in a multi-file diff doesn't hide errors in the rest.
pub fn validate(content: &str) -> (bool, Vec<(usize, String)>) {
    let lines: Vec<&str> = content.lines().map(strip_cr).collect();
    let mut cursor = Cursor {
        lines: &lines,
        pos: 0,
    };

    let mut errors = Vec::new();
    while cursor.pos < cursor.lines.len() {
        let line = cursor.peek().unwrap();
        if is_skippable(line) || line.trim().is_empty() {
            cursor.pos += 1;
            continue;
        }
        let start = cursor.pos;
        match parse_one_file(&mut cursor) {
            Ok(_) => {}
            Err(e) => {
                errors.push((e.line_no, e.message));
                cursor.pos = start + 1;
                while cursor.pos < cursor.lines.len()
                    && !looks_like_new_file_header(cursor.peek().unwrap())
                {
                    cursor.pos += 1;
                }
            }
        }
    }

    errors.sort_by_key(|(line_no, _)| *line_no);
    let is_valid = errors.is_empty();
    (is_valid, errors)
}

struct Cursor<'a> {
    lines: &'a [&'a str],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    /// 1-based line number of the cursor's current position, for error
    /// reporting.
    fn line_no(&self) -> usize {
        self.pos + 1
    }

    fn advance(&mut self) -> Option<&'a str> {
        let l = self.peek();
        if l.is_some() {
            self.pos += 1;
        }
        l
    }
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

fn is_skippable(line: &str) -> bool {
    SKIP_PREFIXES.iter().any(|p| line.starts_with(p))
}

fn parse_one_file<'a>(cursor: &mut Cursor<'a>) -> Result<FilePatch, ParseError> {
    let (old_path, new_path) = parse_file_header(cursor)?;
    let mut patch = FilePatch::new(old_path, new_path);

    while let Some(line) = cursor.peek() {
        if is_skippable(line) || looks_like_new_file_header(line) {
            break;
        }
        if line.starts_with("@@ ") {
            let hunk = parse_unified_hunk(cursor, &mut patch)?;
            patch.hunks.push(hunk);
        } else if is_context_divider(line) {
            let hunk = parse_context_hunk(cursor, &mut patch)?;
            patch.hunks.push(hunk);
        } else if line.trim().is_empty() {
            cursor.pos += 1;
        } else {
            return Err(ParseError {
                line_no: cursor.line_no(),
                message: format!("expected a hunk header, found {line:?}"),
            });
        }
    }

    if patch.hunks.is_empty() {
        return Err(ParseError {
            line_no: cursor.line_no(),
            message: "file patch has no hunks".into(),
        });
    }

    Ok(patch)
}

fn looks_like_new_file_header(line: &str) -> bool {
    line.starts_with("--- ") || (line.starts_with("*** ") && !is_context_hunk_range(line))
}

fn parse_file_header<'a>(cursor: &mut Cursor<'a>) -> Result<(String, String), ParseError> {
    match cursor.peek() {
        Some(line) if line.starts_with("--- ") => {
            let old = clean_path(line.strip_prefix("--- ").unwrap());
            cursor.advance();
            let new_line = cursor.advance().ok_or_else(|| ParseError {
                line_no: cursor.line_no(),
                message: "expected a '+++ ' header line after '--- '".into(),
            })?;
            let new = new_line
                .strip_prefix("+++ ")
                .ok_or_else(|| ParseError {
                    line_no: cursor.line_no(),
                    message: format!("expected a '+++ ' header line, found {new_line:?}"),
                })?;
            Ok((old, clean_path(new)))
        }
        Some(line) if line.starts_with("*** ") && !is_context_hunk_range(line) => {
            let old = clean_path(line.strip_prefix("*** ").unwrap());
            cursor.advance();
            let new_line = cursor.advance().ok_or_else(|| ParseError {
                line_no: cursor.line_no(),
                message: "expected a '--- ' header line after '*** '".into(),
            })?;
            let new = new_line
                .strip_prefix("--- ")
                .ok_or_else(|| ParseError {
                    line_no: cursor.line_no(),
                    message: format!("expected a '--- ' header line, found {new_line:?}"),
                })?;
            Ok((old, clean_path(new)))
        }
        Some(line) => Err(ParseError {
            line_no: cursor.line_no(),
            message: format!("expected a file header ('--- ' or '*** '), found {line:?}"),
        }),
        None => Err(ParseError {
            line_no: cursor.line_no(),
            message: "expected a file header, found end of input".into(),
        }),
    }
}

/// Strips a trailing tab-terminated timestamp and a leading `a/`/`b/`
/// prefix from a header path.
fn clean_path(raw: &str) -> String {
    let path = raw.split('\t').next().unwrap_or(raw).trim();
    let path = path.strip_prefix("a/").or_else(|| path.strip_prefix("b/")).unwrap_or(path);
    path.to_string()
}

// --- unified hunks --------------------------------------------------------

fn parse_unified_hunk_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    let body = line.strip_prefix("@@ -")?;
    let (ranges, _trailer) = split_once_str(body, " @@")?;
    let (old_range, new_range) = ranges.split_once(' ')?;
    let new_range = new_range.strip_prefix('+')?;
    let (old_start, old_len) = parse_range(old_range)?;
    let (new_start, new_len) = parse_range(new_range)?;
    Some((old_start, old_len, new_start, new_len))
}

fn split_once_str<'a>(s: &'a str, pat: &str) -> Option<(&'a str, &'a str)> {
    let idx = s.find(pat)?;
    Some((&s[..idx], &s[idx + pat.len()..]))
}

/// Parses `"n"` or `"n,m"` into a 0-based `(start, len)` pair. A bare `n`
/// means a single line and is equivalent to `n,1`; the wire format is
/// 1-based, a 0 start is possible for an insertion at the very top of an
/// empty file and maps to 0-based start 0.
fn parse_range(s: &str) -> Option<(usize, usize)> {
    let (start_1based, len) = match s.split_once(',') {
        Some((a, b)) => (a.parse::<usize>().ok()?, b.parse::<usize>().ok()?),
        None => (s.parse::<usize>().ok()?, 1),
    };
    let start = start_1based.saturating_sub(1);
    Some((start, len))
}

fn parse_unified_hunk<'a>(
    cursor: &mut Cursor<'a>,
    patch: &mut FilePatch,
) -> Result<Hunk, ParseError> {
    let header_line = cursor.advance().unwrap();
    let (old_start, old_len, new_start, new_len) =
        parse_unified_hunk_header(header_line).ok_or_else(|| ParseError {
            line_no: cursor.line_no(),
            message: format!("malformed unified hunk header {header_line:?}"),
        })?;

    let mut lines = Vec::new();
    let mut no_newline_marker_after: Option<LineKind> = None;

    while let Some(line) = cursor.peek() {
        if line.starts_with("@@ ") || looks_like_new_file_header(line) || is_skippable(line) {
            break;
        }
        if line == "\\ No newline at end of file" {
            let popped: &HunkLine = lines.last().ok_or_else(|| ParseError {
                line_no: cursor.line_no(),
                message: "'\\ No newline at end of file' with no preceding line".into(),
            })?;
            no_newline_marker_after = Some(popped.kind);
            cursor.advance();
            continue;
        }
        let hunk_line = if let Some(rest) = line.strip_prefix(' ') {
            HunkLine::new(LineKind::Context, rest)
        } else if line.is_empty() {
            HunkLine::blank_context()
        } else if let Some(rest) = line.strip_prefix('+') {
            HunkLine::new(LineKind::Insert, rest)
        } else if let Some(rest) = line.strip_prefix('-') {
            HunkLine::new(LineKind::Delete, rest)
        } else {
            return Err(ParseError {
                line_no: cursor.line_no(),
                message: format!("unexpected line in hunk body: {line:?}"),
            });
        };
        lines.push(hunk_line);
        cursor.advance();
    }

    apply_no_newline_marker(patch, no_newline_marker_after);

    Ok(Hunk {
        old_start,
        old_len,
        new_start,
        new_len,
        lines,
    })
}

fn apply_no_newline_marker(patch: &mut FilePatch, kind: Option<LineKind>) {
    match kind {
        Some(LineKind::Delete) => patch.old_no_newline = true,
        Some(LineKind::Insert) => patch.new_no_newline = true,
        Some(LineKind::Context) => {
            patch.old_no_newline = true;
            patch.new_no_newline = true;
        }
        None => {}
    }
}

// --- context hunks ----------------------------------------------------------

fn is_context_divider(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| c == '*')
}

/// True for a `"*** n,m ****"`-shaped range line; distinguishes a hunk's
/// old-range header from a `"*** path"` file header, since both start with
/// `"*** "`.
fn is_context_hunk_range(line: &str) -> bool {
    parse_context_range(line, "***", "****").is_some()
}

fn parse_context_range(line: &str, open: &str, close: &str) -> Option<(usize, usize)> {
    let body = line.strip_prefix(open)?.trim();
    let body = body.strip_suffix(close)?.trim();
    let (start_1based, end_1based) = match body.split_once(',') {
        Some((a, b)) => (a.trim().parse::<usize>().ok()?, b.trim().parse::<usize>().ok()?),
        None => {
            let n = body.parse::<usize>().ok()?;
            (n, n)
        }
    };
    let start = start_1based.saturating_sub(1);
    let len = end_1based.saturating_sub(start_1based).saturating_add(1);
    Some((start, len))
}

fn parse_context_hunk<'a>(
    cursor: &mut Cursor<'a>,
    patch: &mut FilePatch,
) -> Result<Hunk, ParseError> {
    cursor.advance(); // the "***************" divider

    let old_header = cursor.advance().ok_or_else(|| ParseError {
        line_no: cursor.line_no(),
        message: "expected '*** n,m ****' after context divider".into(),
    })?;
    let (old_start, old_len) = parse_context_range(old_header, "***", "****").ok_or_else(|| ParseError {
        line_no: cursor.line_no(),
        message: format!("malformed context old-range header {old_header:?}"),
    })?;

    let mut old_block: Vec<HunkLine> = Vec::new();
    while let Some(line) = cursor.peek() {
        if line.starts_with("--- ") {
            break;
        }
        if line == "\\ No newline at end of file" {
            if old_block.last().is_some() {
                patch.old_no_newline = true;
            }
            cursor.advance();
            continue;
        }
        old_block.push(parse_context_body_line(cursor, line, true)?);
        cursor.advance();
    }

    let new_header = cursor.advance().ok_or_else(|| ParseError {
        line_no: cursor.line_no(),
        message: "expected '--- n,m ----' after old-range block".into(),
    })?;
    let (new_start, new_len) = parse_context_range(new_header, "---", "----").ok_or_else(|| ParseError {
        line_no: cursor.line_no(),
        message: format!("malformed context new-range header {new_header:?}"),
    })?;

    let mut new_block: Vec<HunkLine> = Vec::new();
    while let Some(line) = cursor.peek() {
        if line.starts_with("@@ ")
            || is_context_divider(line)
            || looks_like_new_file_header(line)
            || is_skippable(line)
        {
            break;
        }
        if line == "\\ No newline at end of file" {
            if new_block.last().is_some() {
                patch.new_no_newline = true;
            }
            cursor.advance();
            continue;
        }
        new_block.push(parse_context_body_line(cursor, line, false)?);
        cursor.advance();
    }

    let lines = merge_context_blocks(old_block, new_block);

    Ok(Hunk {
        old_start,
        old_len,
        new_start,
        new_len,
        lines,
    })
}

/// Context diffs list a hunk as two parallel blocks: the old side (context
/// and deletions) followed by the new side (context and insertions), with
/// matching context runs appearing, verbatim, in both. Merge them into one
/// body by walking both blocks together, emitting shared context once and
/// each side's changed run where it falls.
fn merge_context_blocks(old_block: Vec<HunkLine>, new_block: Vec<HunkLine>) -> Vec<HunkLine> {
    let mut merged = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < old_block.len() || j < new_block.len() {
        let old_is_context = old_block.get(i).is_some_and(|l| l.kind == LineKind::Context);
        let new_is_context = new_block.get(j).is_some_and(|l| l.kind == LineKind::Context);
        if old_is_context && new_is_context {
            merged.push(old_block[i].clone());
            i += 1;
            j += 1;
            continue;
        }
        while old_block.get(i).is_some_and(|l| l.kind != LineKind::Context) {
            merged.push(old_block[i].clone());
            i += 1;
        }
        while new_block.get(j).is_some_and(|l| l.kind != LineKind::Context) {
            merged.push(new_block[j].clone());
            j += 1;
        }
    }
    merged
}

/// `"! "` is a changed line: on the old side it's the text being replaced
/// (`Delete`), on the new side it's the replacement (`Insert`). `is_old_side`
/// picks which.
fn parse_context_body_line<'a>(
    cursor: &Cursor<'a>,
    line: &str,
    is_old_side: bool,
) -> Result<HunkLine, ParseError> {
    if let Some(rest) = line.strip_prefix("! ") {
        let kind = if is_old_side { LineKind::Delete } else { LineKind::Insert };
        Ok(HunkLine::new(kind, rest))
    } else if let Some(rest) = line.strip_prefix("- ") {
        Ok(HunkLine::new(LineKind::Delete, rest))
    } else if let Some(rest) = line.strip_prefix("+ ") {
        Ok(HunkLine::new(LineKind::Insert, rest))
    } else if let Some(rest) = line.strip_prefix("  ") {
        Ok(HunkLine::new(LineKind::Context, rest))
    } else if line.is_empty() {
        Ok(HunkLine::blank_context())
    } else {
        Err(ParseError {
            line_no: cursor.line_no(),
            message: format!("unexpected line in context hunk body: {line:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_UNIFIED: &str = "--- a/greeting.txt\n+++ b/greeting.txt\n@@ -1,3 +1,3 @@\n hello\n-world\n+rust\n there\n";

    #[test]
    fn parses_single_unified_hunk() {
        let patches = parse(SIMPLE_UNIFIED).unwrap();
        assert_eq!(patches.len(), 1);
        let patch = &patches[0];
        assert_eq!(patch.old_path, "greeting.txt");
        assert_eq!(patch.new_path, "greeting.txt");
        assert_eq!(patch.hunks.len(), 1);
        let hunk = &patch.hunks[0];
        assert_eq!(hunk.old_start, 0);
        assert_eq!(hunk.new_start, 0);
        assert_eq!(hunk.lines.len(), 4);
        assert_eq!(hunk.lines[1].kind, LineKind::Delete);
        assert_eq!(hunk.lines[1].text, "world");
        assert_eq!(hunk.lines[2].kind, LineKind::Insert);
        assert_eq!(hunk.lines[2].text, "rust");
    }

    #[test]
    fn skips_git_preamble_lines() {
        let content = "diff --git a/f.txt b/f.txt\nindex abc123..def456 100644\n--- a/f.txt\n+++ b/f.txt\n@@ -1,1 +1,1 @@\n-old\n+new\n";
        let patches = parse(content).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].old_path, "f.txt");
    }

    #[test]
    fn parses_multiple_files_concatenated() {
        let content = format!("{SIMPLE_UNIFIED}--- a/other.txt\n+++ b/other.txt\n@@ -1,1 +1,1 @@\n-x\n+y\n");
        let patches = parse(&content).unwrap();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[1].old_path, "other.txt");
    }

    #[test]
    fn bare_single_line_range_defaults_to_length_one() {
        let content = "--- a/f\n+++ b/f\n@@ -3 +3 @@\n-x\n+y\n";
        let patches = parse(content).unwrap();
        let hunk = &patches[0].hunks[0];
        assert_eq!(hunk.old_start, 2);
        assert_eq!(hunk.old_len, 1);
    }

    #[test]
    fn no_newline_marker_sets_new_no_newline_after_insertion() {
        let content = "--- a/f\n+++ b/f\n@@ -1,1 +1,1 @@\n-old\n+new\n\\ No newline at end of file\n";
        let patches = parse(content).unwrap();
        assert!(patches[0].new_no_newline);
        assert!(!patches[0].old_no_newline);
    }

    #[test]
    fn malformed_hunk_header_reports_line_number() {
        let content = "--- a/f\n+++ b/f\n@@ garbage @@\n-x\n+y\n";
        let err = parse(content).unwrap_err();
        assert_eq!(err.line_no, 3);
    }

    #[test]
    fn missing_plus_plus_plus_header_is_rejected() {
        let content = "--- a/f\n@@ -1,1 +1,1 @@\n-x\n+y\n";
        let err = parse(content).unwrap_err();
        assert!(err.message.contains("+++"));
    }

    #[test]
    fn validate_reports_same_error_as_parse() {
        let content = "--- a/f\n+++ b/f\nnot a hunk header\n";
        let (ok, errors) = validate(content);
        assert!(!ok);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn clean_path_strips_prefix_and_timestamp() {
        assert_eq!(clean_path("a/src/lib.rs\t2024-01-01"), "src/lib.rs");
        assert_eq!(clean_path("b/src/lib.rs"), "src/lib.rs");
    }

    const CONTEXT_DIFF: &str = "*** a/greeting.txt\n--- b/greeting.txt\n***************\n*** 1,3 ****\n  unchanged\n! old line\n- deleted only in old\n--- 1,3 ----\n  unchanged\n! new line\n+ added only in new\n";

    #[test]
    fn parses_context_diff_hunk() {
        let patches = parse(CONTEXT_DIFF).unwrap();
        assert_eq!(patches.len(), 1);
        let hunk = &patches[0].hunks[0];
        assert_eq!(hunk.old_start, 0);
        assert_eq!(hunk.old_len, 3);
        assert_eq!(
            hunk.lines.iter().map(|l| (l.kind, l.text.as_str())).collect::<Vec<_>>(),
            vec![
                (LineKind::Context, "unchanged"),
                (LineKind::Delete, "old line"),
                (LineKind::Delete, "deleted only in old"),
                (LineKind::Insert, "new line"),
                (LineKind::Insert, "added only in new"),
            ]
        );
    }
}
