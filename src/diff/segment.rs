use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Blank-line boundary. `\s` also matches `\r`, so CRLF documents split the same way.
static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("compile blank-line pattern"));

/// 本文を空行で区切り、前後の空白を除いた空でない段落に分割する。
#[must_use]
pub fn split_segments(content: &str) -> Vec<&str> {
    BLANK_LINE
        .split(content)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// 単語集合のJaccard類似度。大文字小文字を区別せず、空白で分割する。
///
/// 両方空なら1.0、片方だけ空なら0.0。
#[must_use]
pub fn similarity(left: &str, right: &str) -> f64 {
    let left_words = word_set(left);
    let right_words = word_set(right);

    match (left_words.is_empty(), right_words.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        (false, false) => {}
    }

    let intersection = left_words.intersection(&right_words).count();
    let union = left_words.union(&right_words).count();

    #[allow(clippy::cast_precision_loss)]
    let ratio = intersection as f64 / union as f64;
    ratio
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}
