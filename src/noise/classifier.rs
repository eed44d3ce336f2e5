use std::sync::LazyLock;

use regex::Regex;

use super::patterns::NoisePatternSet;
use crate::diff::{ChangeSet, SegmentChange};

static NUMERIC_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\d\s,.%$€£¥]+").expect("compile numeric pattern"));

/// Share of non-numeric characters below which text counts as numbers only.
const NON_NUMERIC_RATIO: f64 = 0.2;

/// Decides whether a change set is purely cosmetic.
#[derive(Debug, Clone, Default)]
pub struct NoiseClassifier {
    patterns: NoisePatternSet,
}

impl NoiseClassifier {
    #[must_use]
    pub fn new(patterns: NoisePatternSet) -> Self {
        Self { patterns }
    }

    #[must_use]
    pub fn patterns(&self) -> &NoisePatternSet {
        &self.patterns
    }

    /// Classifier for one resource: the shared list plus the resource's own expressions.
    #[must_use]
    pub fn for_resource(&self, extra_patterns: &[String]) -> Self {
        if extra_patterns.is_empty() {
            return self.clone();
        }
        Self {
            patterns: self.patterns.with_extra(extra_patterns),
        }
    }

    /// True when every segment of the set is noise. An empty set is noise.
    #[must_use]
    pub fn is_noise(&self, change_set: &ChangeSet) -> bool {
        change_set
            .segments()
            .all(|segment| self.is_segment_noise(segment))
    }

    #[must_use]
    pub fn is_segment_noise(&self, segment: SegmentChange<'_>) -> bool {
        match segment {
            SegmentChange::Added(text) | SegmentChange::Removed(text) => {
                is_numeric_only(&self.patterns.strip(text))
            }
            // 数値判定は除去前の原文で行う
            SegmentChange::Modified(edit) => {
                self.patterns.strip(&edit.old) == self.patterns.strip(&edit.new)
                    || (is_numeric_only(&edit.old) && is_numeric_only(&edit.new))
            }
        }
    }
}

/// True when digits, whitespace, separators and currency symbols make up at
/// least 80% of `text`. Empty text qualifies.
#[must_use]
pub fn is_numeric_only(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return true;
    }
    let remaining = NUMERIC_CHARS.replace_all(text, "");
    let non_numeric = remaining.chars().count();

    #[allow(clippy::cast_precision_loss)]
    let mostly_numeric = (non_numeric as f64) < NON_NUMERIC_RATIO * total as f64;
    mostly_numeric
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{ModifiedSegment, diff};
    use rstest::rstest;

    fn classifier() -> NoiseClassifier {
        NoiseClassifier::default()
    }

    #[rstest]
    #[case("", true)]
    #[case("1,024", true)]
    #[case("$ 19.99", true)]
    #[case("42 %", true)]
    #[case("Total 1,204,551", false)]
    #[case("Item count", false)]
    fn numeric_only_detection(#[case] text: &str, #[case] expected: bool) {
        assert_eq!(is_numeric_only(text), expected);
    }

    #[test]
    fn empty_change_set_is_noise() {
        assert!(classifier().is_noise(&ChangeSet::default()));
    }

    #[test]
    fn copyright_year_bump_is_noise() {
        let old = "Council agenda for March.\n\n© 2023 City of Springfield";
        let new = "Council agenda for March.\n\n© 2024 City of Springfield";
        let set = diff(old, new);

        assert!(!set.is_empty());
        assert!(classifier().is_noise(&set));
    }

    #[test]
    fn bare_copyright_line_swap_is_noise() {
        // Too short to pair as an edit: surfaces as an add/remove of pure boilerplate.
        let set = diff("Body text\n\n© 2023", "Body text\n\n© 2024");
        assert_eq!(set.added().len(), 1);
        assert!(classifier().is_noise(&set));
    }

    #[test]
    fn counter_and_timestamp_churn_is_noise() {
        let old = "Views: 1,204\n\nReport generated at 2024-05-01T08:00:00Z for all regions";
        let new = "Views: 1,377\n\nReport generated at 2024-05-02T08:00:00Z for all regions";
        assert!(classifier().is_noise(&diff(old, new)));
    }

    #[test]
    fn numeric_table_cell_edit_is_noise() {
        let set = ChangeSet::new(
            Vec::new(),
            Vec::new(),
            vec![ModifiedSegment {
                old: "1,204.50".to_string(),
                new: "1,377.25".to_string(),
                similarity: 0.0,
            }],
        );
        assert!(classifier().is_noise(&set));
    }

    #[test]
    fn labelled_figure_edit_is_not_noise_even_when_label_is_stripped() {
        let set = ChangeSet::new(
            Vec::new(),
            Vec::new(),
            vec![ModifiedSegment {
                old: "Tickets sold 1,204".to_string(),
                new: "Tickets sold 1,377".to_string(),
                similarity: 0.6,
            }],
        );
        let scoped = classifier().for_resource(&["Tickets sold".to_string()]);

        assert!(!scoped.is_noise(&set));
    }

    #[test]
    fn one_meaningful_segment_vetoes_the_set() {
        let old = "© 2023 Acme\n\nOpening hours: 9-5";
        let new = "© 2024 Acme\n\nOpening hours: 9-5\n\nWe are closed on public holidays.";
        assert!(!classifier().is_noise(&diff(old, new)));
    }

    #[test]
    fn verdict_is_stable() {
        let set = diff("Agenda item one", "Agenda item one\n\nAgenda item two added");
        let classifier = classifier();
        assert_eq!(classifier.is_noise(&set), classifier.is_noise(&set));
    }

    #[test]
    fn resource_patterns_extend_the_shared_list() {
        let set = diff("Results\n\nsession a81f", "Results\n\nsession 99c0");
        let shared = classifier();
        assert!(!shared.is_noise(&set));

        let scoped = shared.for_resource(&["session [0-9a-f]+".to_string()]);
        assert!(scoped.is_noise(&set));
    }
}
