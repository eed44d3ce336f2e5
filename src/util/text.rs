//! テキスト処理ユーティリティ。
//!
//! コンテンツハッシュ、空白の正規化、文字境界を守った切り詰めを提供します。

const ELLIPSIS: &str = "...";

/// コンテンツ全体のMD5ハッシュを16進文字列で返す。
#[must_use]
pub fn content_hash(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

/// 連続する空白を1つのスペースにまとめ、前後の空白を取り除く。
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 空白を正規化したうえで、最大 `max_chars` 文字に切り詰める。
///
/// 切り詰めた場合は末尾に `...` を付け、全体が `max_chars` 以内に収まるようにする。
#[must_use]
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    let cleaned = collapse_whitespace(text);
    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let head: String = cleaned.chars().take(keep).collect();
    format!("{}{ELLIPSIS}", head.trim_end())
}

/// UTF-8の文字境界を壊さずに `max_bytes` バイト以内へ切り詰める。
///
/// 2番目の値は切り詰めが発生したかどうか。
#[must_use]
pub fn truncate_to_bytes(text: &str, max_bytes: usize) -> (&str, bool) {
    if text.len() <= max_bytes {
        return (text, false);
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (&text[..end], true)
}
