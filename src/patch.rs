//! Applies a scheduled edit set to text in one left-to-right sweep.

use crate::edit::Edit;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("edits are not sorted: edit at {start} follows edit at {previous}")]
    Unsorted { previous: usize, start: usize },

    #[error("edits overlap: [{start}, {end}) intersects the previous edit ending at {previous_end}")]
    Overlap {
        start: usize,
        end: usize,
        previous_end: usize,
    },

    #[error("edit [{start}, {end}) is outside text of length {len}")]
    OutOfRange { start: usize, end: usize, len: usize },

    #[error("edit boundary {offset} splits a UTF-8 character")]
    NotCharBoundary { offset: usize },
}

/// Where one edit's replacement landed in the patched text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedSpan {
    pub rule_id: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patched {
    pub text: String,
    pub spans: Vec<PatchedSpan>,
}

/// Apply `edits`, which must be sorted by start and pairwise non-overlapping.
pub fn patch(source: &str, edits: &[Edit]) -> Result<Patched, PatchError> {
    let mut cursor = 0;
    let mut previous: Option<&Edit> = None;
    for edit in edits {
        if edit.start > edit.end || edit.end > source.len() {
            return Err(PatchError::OutOfRange {
                start: edit.start,
                end: edit.end,
                len: source.len(),
            });
        }
        for offset in [edit.start, edit.end] {
            if !source.is_char_boundary(offset) {
                return Err(PatchError::NotCharBoundary { offset });
            }
        }
        if let Some(prev) = previous {
            if edit.start < prev.start {
                return Err(PatchError::Unsorted {
                    previous: prev.start,
                    start: edit.start,
                });
            }
            if prev.conflicts_with(edit) {
                return Err(PatchError::Overlap {
                    start: edit.start,
                    end: edit.end,
                    previous_end: prev.end,
                });
            }
        }
        previous = Some(edit);
    }

    let delta: isize = edits.iter().map(Edit::len_delta).sum();
    let capacity = (source.len() as isize + delta).max(0) as usize;
    let mut text = String::with_capacity(capacity);
    let mut spans = Vec::with_capacity(edits.len());

    for edit in edits {
        text.push_str(&source[cursor..edit.start]);
        let start = text.len();
        text.push_str(&edit.replacement);
        spans.push(PatchedSpan {
            rule_id: edit.rule_id.clone(),
            start,
            end: text.len(),
        });
        cursor = edit.end;
    }
    text.push_str(&source[cursor..]);

    Ok(Patched { text, spans })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::schedule;
    use proptest::prelude::*;

    fn edit(start: usize, end: usize, text: &str, rule: &str) -> Edit {
        let mut edit = Edit::new(start, end, text, "");
        edit.rule_id = rule.to_string();
        edit
    }

    #[test]
    fn applies_edits_and_tracks_output_spans() {
        let source = "gci | % { $_ }";
        let patched = patch(
            source,
            &[edit(0, 3, "Get-ChildItem", "A"), edit(6, 7, "ForEach-Object", "A")],
        )
        .unwrap();
        assert_eq!(patched.text, "Get-ChildItem | ForEach-Object { $_ }");
        assert_eq!(patched.spans[0].start, 0);
        assert_eq!(patched.spans[0].end, 13);
        assert_eq!(&patched.text[patched.spans[1].start..patched.spans[1].end], "ForEach-Object");
    }

    #[test]
    fn empty_edit_list_is_identity() {
        let patched = patch("Get-Date", &[]).unwrap();
        assert_eq!(patched.text, "Get-Date");
        assert!(patched.spans.is_empty());
    }

    #[test]
    fn rejects_unsorted_and_overlapping_input() {
        let source = "0123456789";
        assert!(matches!(
            patch(source, &[edit(5, 6, "x", "A"), edit(1, 2, "y", "B")]),
            Err(PatchError::Unsorted { .. })
        ));
        assert!(matches!(
            patch(source, &[edit(1, 5, "x", "A"), edit(3, 6, "y", "B")]),
            Err(PatchError::Overlap { .. })
        ));
        assert!(matches!(
            patch(source, &[edit(4, 4, "x", "A"), edit(4, 4, "y", "B")]),
            Err(PatchError::Overlap { .. })
        ));
        assert!(matches!(
            patch(source, &[edit(8, 12, "x", "A")]),
            Err(PatchError::OutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_split_characters() {
        assert_eq!(
            patch("é", &[edit(1, 2, "e", "A")]),
            Err(PatchError::NotCharBoundary { offset: 1 })
        );
    }

    proptest! {
        #[test]
        fn scheduled_edits_always_patch(
            source in "[a-z ]{0,30}",
            raw in prop::collection::vec((0usize..30, 0usize..5, "[A-Z]{0,3}"), 0..12),
        ) {
            let edits: Vec<Edit> = raw
                .into_iter()
                .filter(|(start, len, _)| start + len <= source.len())
                .map(|(start, len, text)| Edit::replace(&source, start, start + len, text))
                .collect();
            let plan = schedule(edits);
            let patched = patch(&source, &plan.applied).unwrap();
            let expected_len = source.len() as isize
                + plan.applied.iter().map(Edit::len_delta).sum::<isize>();
            prop_assert_eq!(patched.text.len() as isize, expected_len);
            for (span, edit) in patched.spans.iter().zip(&plan.applied) {
                prop_assert_eq!(&patched.text[span.start..span.end], edit.replacement.as_str());
            }
        }
    }
}
