//! 変更セットを1行の要約文にする。

use crate::diff::ChangeSet;
use crate::util::text::truncate_with_ellipsis;

/// Upper bound on the length of any summary, in characters.
pub const MAX_SUMMARY_CHARS: usize = 180;

const SINGLE_SNIPPET_CHARS: usize = 100;
const MULTI_SNIPPET_CHARS: usize = 80;
const NO_CHANGES: &str = "No significant changes detected";

/// 変更セットを[`MAX_SUMMARY_CHARS`]文字以内で要約する。
#[must_use]
pub fn summarize(change_set: &ChangeSet) -> String {
    let added = change_set.added().len();
    let removed = change_set.removed().len();
    let modified = change_set.modified().len();
    let total = change_set.total_changes();

    let summary = match total {
        0 => NO_CHANGES.to_string(),
        1 => single_change(change_set),
        _ => {
            let mut parts = Vec::with_capacity(3);
            if added > 0 {
                parts.push(format!("{added} added"));
            }
            if removed > 0 {
                parts.push(format!("{removed} removed"));
            }
            if modified > 0 {
                parts.push(format!("{modified} modified"));
            }
            let base = format!("{total} sections changed ({})", parts.join(", "));

            match leading_text(change_set) {
                Some(text) if total <= 3 => {
                    let snippet = truncate_with_ellipsis(text, MULTI_SNIPPET_CHARS);
                    let with_snippet = format!("{base}: \"{snippet}\"");
                    if with_snippet.chars().count() <= MAX_SUMMARY_CHARS {
                        with_snippet
                    } else {
                        base
                    }
                }
                _ => base,
            }
        }
    };

    truncate_with_ellipsis(&summary, MAX_SUMMARY_CHARS)
}

fn single_change(change_set: &ChangeSet) -> String {
    if let Some(edit) = change_set.modified().first() {
        return format!(
            "Content updated: \"{}\"",
            truncate_with_ellipsis(&edit.new, SINGLE_SNIPPET_CHARS)
        );
    }
    if let Some(text) = change_set.added().first() {
        return format!(
            "New content added: \"{}\"",
            truncate_with_ellipsis(text, SINGLE_SNIPPET_CHARS)
        );
    }
    if let Some(text) = change_set.removed().first() {
        return format!(
            "Content removed: \"{}\"",
            truncate_with_ellipsis(text, SINGLE_SNIPPET_CHARS)
        );
    }
    NO_CHANGES.to_string()
}

/// 抜粋元の優先順位: 編集後テキスト、追加、削除。
fn leading_text(change_set: &ChangeSet) -> Option<&str> {
    change_set
        .modified()
        .first()
        .map(|edit| edit.new.as_str())
        .or_else(|| change_set.added().first().map(String::as_str))
        .or_else(|| change_set.removed().first().map(String::as_str))
}
