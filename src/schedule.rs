//! Edit scheduling and conflict resolution.
//!
//! Turns the edits collected from every rule in a pass into a sorted,
//! non-overlapping set. Losing edits are deferred rather than dropped: if the
//! analyzer still reports the violation against the patched text, the rule
//! gets another chance next iteration.

use crate::edit::Edit;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

/// Result of scheduling one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Sorted by start, pairwise non-overlapping
    pub applied: Vec<Edit>,
    /// Edits that lost a conflict this pass
    pub deferred: Vec<Edit>,
}

impl Schedule {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Total order used for scheduling: position first, then which edit should win
/// when two start at the same offset.
fn schedule_order(a: &Edit, b: &Edit) -> Ordering {
    a.start
        .cmp(&b.start)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.category.rank().cmp(&b.category.rank()))
        .then_with(|| a.rule_id.cmp(&b.rule_id))
        .then_with(|| a.end.cmp(&b.end))
        .then_with(|| a.replacement.cmp(&b.replacement))
}

/// Sort, deduplicate and resolve conflicts between `edits`.
pub fn schedule(mut edits: Vec<Edit>) -> Schedule {
    edits.sort_by(schedule_order);

    let mut seen = HashSet::new();
    let mut plan = Schedule::default();
    for edit in edits {
        if !seen.insert((edit.start, edit.end, edit.replacement.clone())) {
            debug!(rule = %edit.rule_id, start = edit.start, "dropping duplicate edit");
            continue;
        }
        match plan.applied.last() {
            Some(last) if last.conflicts_with(&edit) => {
                debug!(
                    rule = %edit.rule_id,
                    start = edit.start,
                    end = edit.end,
                    insertion = edit.is_insertion(),
                    winner = %last.rule_id,
                    "deferring conflicting edit"
                );
                plan.deferred.push(edit);
            }
            _ => plan.applied.push(edit),
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Category;
    use proptest::prelude::*;

    fn edit(start: usize, end: usize, text: &str, rule: &str, category: Category) -> Edit {
        let mut edit = Edit::new(start, end, text, "");
        edit.rule_id = rule.to_string();
        edit.category = category;
        edit
    }

    #[test]
    fn sorts_and_keeps_disjoint_edits() {
        let plan = schedule(vec![
            edit(10, 12, "b", "R2", Category::Formatting),
            edit(0, 3, "a", "R1", Category::Formatting),
            edit(12, 12, "c", "R3", Category::Formatting),
        ]);
        let starts: Vec<_> = plan.applied.iter().map(|e| e.start).collect();
        assert_eq!(starts, vec![0, 10, 12]);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn category_decides_same_span_conflicts() {
        let plan = schedule(vec![
            edit(4, 8, "fmt", "PSUseCorrectCasing", Category::Formatting),
            edit(4, 8, "sec", "PSAvoidUsingBrokenHashAlgorithms", Category::Security),
        ]);
        assert_eq!(plan.applied.len(), 1);
        assert_eq!(plan.applied[0].replacement, "sec");
        assert_eq!(plan.deferred[0].replacement, "fmt");
    }

    #[test]
    fn priority_beats_category() {
        let mut formatting = edit(0, 2, "x", "Fmt", Category::Formatting);
        formatting.priority = 5;
        let plan = schedule(vec![edit(0, 2, "y", "Sec", Category::Security), formatting]);
        assert_eq!(plan.applied[0].rule_id, "Fmt");
    }

    #[test]
    fn insertions_at_the_same_point_conflict() {
        let plan = schedule(vec![
            edit(5, 5, " ", "A", Category::Formatting),
            edit(5, 5, "<# help #>", "B", Category::Advanced),
        ]);
        assert_eq!(plan.applied.len(), 1);
        assert_eq!(plan.applied[0].rule_id, "B");
        assert_eq!(plan.deferred.len(), 1);
    }

    #[test]
    fn identical_edits_collapse() {
        let plan = schedule(vec![
            edit(1, 3, "z", "A", Category::BestPractice),
            edit(1, 3, "z", "A", Category::BestPractice),
        ]);
        assert_eq!(plan.applied.len(), 1);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn partial_overlap_is_deferred() {
        let plan = schedule(vec![
            edit(0, 6, "outer", "A", Category::Security),
            edit(3, 9, "inner", "B", Category::Security),
            edit(9, 10, "tail", "C", Category::Security),
        ]);
        let rules: Vec<_> = plan.applied.iter().map(|e| e.rule_id.as_str()).collect();
        assert_eq!(rules, vec!["A", "C"]);
        assert_eq!(plan.deferred[0].rule_id, "B");
    }

    fn arb_edit() -> impl Strategy<Value = Edit> {
        (0usize..40, 0usize..6, "[a-c]{0,3}", 0usize..4, -1i32..2).prop_map(
            |(start, len, text, category, priority)| {
                let mut e = edit(
                    start,
                    start + len,
                    &text,
                    &format!("R{category}"),
                    Category::ALL[category],
                );
                e.priority = priority;
                e
            },
        )
    }

    proptest! {
        #[test]
        fn applied_edits_never_overlap(edits in prop::collection::vec(arb_edit(), 0..24)) {
            let plan = schedule(edits);
            for pair in plan.applied.windows(2) {
                prop_assert!(pair[0].start <= pair[1].start);
                prop_assert!(!pair[0].conflicts_with(&pair[1]));
            }
        }

        #[test]
        fn every_unique_edit_is_applied_or_deferred(edits in prop::collection::vec(arb_edit(), 0..24)) {
            let unique: HashSet<_> = edits
                .iter()
                .map(|e| (e.start, e.end, e.replacement.clone()))
                .collect();
            let plan = schedule(edits);
            prop_assert_eq!(plan.applied.len() + plan.deferred.len(), unique.len());
        }

        #[test]
        fn input_order_does_not_matter(
            edits in prop::collection::vec(arb_edit(), 0..16),
            seed in any::<u64>(),
        ) {
            let mut shuffled = edits.clone();
            // Deterministic Fisher-Yates driven by the seed.
            let mut state = seed | 1;
            for i in (1..shuffled.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                shuffled.swap(i, (state % (i as u64 + 1)) as usize);
            }
            prop_assert_eq!(schedule(edits).applied, schedule(shuffled).applied);
        }
    }
}
