//! C4: turns two text blobs into a line-level edit script (§4.4).
//!
//! Grounded directly on the retrieval pack's copy of `imara-diff`'s own
//! `lib.rs`: lines are interned into [`imara_diff::Token`]s via
//! [`InternedInput`], diffed with the histogram algorithm, and the
//! resulting [`Hunk`] iterator (each hunk a contiguous replaced range,
//! implicitly separated by runs of untouched/equal lines) is expanded
//! into the `equal | insert | delete` edit script spec.md §4.4 asks for.
//! Each line is its own token, so "line-hash" in the spec's language is
//! exactly imara-diff's interned `Token`.

use imara_diff::{Algorithm, Diff, InternedInput};

/// One step of the §4.4 edit script. Carries only a line count: the
/// burndown engine only needs run lengths to drive [`FileModel::update`],
/// never the line content itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEdit {
    Equal(u32),
    Insert(u32),
    Delete(u32),
}

impl LineEdit {
    pub fn len(self) -> u32 {
        match self {
            LineEdit::Equal(n) | LineEdit::Insert(n) | LineEdit::Delete(n) => n,
        }
    }
}

/// Produces the edit script for `before -> after`, both interpreted as
/// UTF-8 text split into lines. Returns `None` if either side is not
/// valid UTF-8 (§4.3's binary-content detection: the caller treats the
/// file as absent).
///
/// `cleanup` mirrors the `diff_cleanup_disabled` config flag (§6):
/// when enabled, applies imara-diff's line-oriented postprocessing
/// (`postprocess_lines`), which only ever merges/slides hunk boundaries
/// and therefore preserves the three counting equalities §4.4 requires.
pub fn diff_lines(before: &[u8], after: &[u8], cleanup: bool) -> Option<Vec<LineEdit>> {
    let before = std::str::from_utf8(before).ok()?;
    let after = std::str::from_utf8(after).ok()?;

    let input = InternedInput::new(before, after);
    let mut diff = Diff::compute(Algorithm::Histogram, &input);
    if cleanup {
        diff.postprocess_lines(&input);
    }

    Some(expand_to_script(&diff, input.before.len() as u32, input.after.len() as u32))
}

/// Walks the hunk iterator and fills the gaps between hunks (and before
/// the first / after the last) with `Equal` runs, producing the full
/// contract of §4.4: the sum of `equal`+`delete` run lengths equals the
/// old line count, and `equal`+`insert` equals the new line count; two
/// `insert`s (or two `delete`s) never appear back to back.
fn expand_to_script(diff: &Diff, before_len: u32, after_len: u32) -> Vec<LineEdit> {
    let mut script = Vec::new();
    let mut pos_before = 0u32;
    let mut pos_after = 0u32;

    for hunk in diff.hunks() {
        let equal_len = hunk.before.start - pos_before;
        debug_assert_eq!(equal_len, hunk.after.start - pos_after);
        if equal_len > 0 {
            script.push(LineEdit::Equal(equal_len));
        }

        let removed = hunk.before.end - hunk.before.start;
        let added = hunk.after.end - hunk.after.start;
        if removed > 0 {
            script.push(LineEdit::Delete(removed));
        }
        if added > 0 {
            script.push(LineEdit::Insert(added));
        }

        pos_before = hunk.before.end;
        pos_after = hunk.after.end;
    }

    // Trailing run of untouched lines after the last hunk (or the whole
    // file, if there were no hunks at all).
    let tail = before_len - pos_before;
    debug_assert_eq!(tail, after_len - pos_after);
    if tail > 0 {
        script.push(LineEdit::Equal(tail));
    }

    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_old(script: &[LineEdit]) -> u32 {
        script
            .iter()
            .filter(|e| matches!(e, LineEdit::Equal(_) | LineEdit::Delete(_)))
            .map(|e| e.len())
            .sum()
    }

    fn total_new(script: &[LineEdit]) -> u32 {
        script
            .iter()
            .filter(|e| matches!(e, LineEdit::Equal(_) | LineEdit::Insert(_)))
            .map(|e| e.len())
            .sum()
    }

    #[test]
    fn identical_text_is_all_equal() {
        let script = diff_lines(b"a\nb\nc\n", b"a\nb\nc\n", true).unwrap();
        assert!(script.iter().all(|e| matches!(e, LineEdit::Equal(_))));
    }

    #[test]
    fn append_is_a_trailing_insert() {
        let script = diff_lines(b"a\nb\n", b"a\nb\nc\n", true).unwrap();
        assert_eq!(total_old(&script), 2);
        assert_eq!(total_new(&script), 3);
        assert!(matches!(script.last(), Some(LineEdit::Insert(1))));
    }

    #[test]
    fn no_two_inserts_or_deletes_are_consecutive() {
        let before = "a\nb\nc\nd\ne\n";
        let after = "a\nX\nc\nY\ne\n";
        let script = diff_lines(before.as_bytes(), after.as_bytes(), true).unwrap();
        for w in script.windows(2) {
            let bad = matches!((w[0], w[1]), (LineEdit::Insert(_), LineEdit::Insert(_)))
                || matches!((w[0], w[1]), (LineEdit::Delete(_), LineEdit::Delete(_)));
            assert!(!bad, "script has adjacent same-kind edits: {:?}", script);
        }
        // The unchanged trailing line ("e") must surface as a final Equal
        // run, not be silently dropped.
        assert_eq!(total_old(&script), 5);
        assert_eq!(total_new(&script), 5);
        assert!(matches!(script.last(), Some(LineEdit::Equal(1))));
    }

    #[test]
    fn counts_hold_for_full_overwrite() {
        let script = diff_lines(b"a\nb\nc\n", b"x\ny\n", true).unwrap();
        assert_eq!(total_old(&script), 3);
        assert_eq!(total_new(&script), 2);
    }

    #[test]
    fn binary_content_returns_none() {
        let invalid = [0xff, 0xfe, 0x00, 0xff];
        assert!(diff_lines(&invalid, b"a\n", true).is_none());
    }

    #[test]
    fn cleanup_toggle_preserves_count_contract() {
        let before = b"fn f() {\n    a();\n}\n";
        let after = b"// comment\nfn f() {\n    a();\n    b();\n}\n";
        let with = diff_lines(before, after, true).unwrap();
        let without = diff_lines(before, after, false).unwrap();
        assert_eq!(total_old(&with), total_old(&without));
        assert_eq!(total_new(&with), total_new(&without));
    }
}
