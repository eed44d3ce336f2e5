use super::segment::{similarity, split_segments};
use super::types::{ChangeSet, ModifiedSegment};

/// 2つの段落を「編集」とみなす単語集合類似度の下限。
pub const SIMILARITY_THRESHOLD: f64 = 0.6;

/// 2つのスナップショットを段落ごとに比較する。
///
/// まず完全一致を対応付ける。残った新段落は、類似度が
/// [`SIMILARITY_THRESHOLD`]以上1.0未満の未対応旧段落のうち最も近いものと組む。
/// 同点の場合は後方の旧段落を採る。残りは追加または削除として報告する。
#[must_use]
pub fn diff(old_content: &str, new_content: &str) -> ChangeSet {
    let old_segments = split_segments(old_content);
    let new_segments = split_segments(new_content);

    let mut old_matched = vec![false; old_segments.len()];
    let mut new_matched = vec![false; new_segments.len()];

    for (new_idx, new_segment) in new_segments.iter().enumerate() {
        let exact = old_segments
            .iter()
            .enumerate()
            .position(|(old_idx, old_segment)| !old_matched[old_idx] && old_segment == new_segment);
        if let Some(old_idx) = exact {
            old_matched[old_idx] = true;
            new_matched[new_idx] = true;
        }
    }

    let mut modified = Vec::new();
    for (new_idx, new_segment) in new_segments.iter().enumerate() {
        if new_matched[new_idx] {
            continue;
        }

        let mut best: Option<(usize, f64)> = None;
        let mut best_score = SIMILARITY_THRESHOLD;
        for (old_idx, old_segment) in old_segments.iter().enumerate() {
            if old_matched[old_idx] {
                continue;
            }
            let score = similarity(old_segment, new_segment);
            if score >= best_score && score < 1.0 {
                best_score = score;
                best = Some((old_idx, score));
            }
        }

        if let Some((old_idx, score)) = best {
            old_matched[old_idx] = true;
            new_matched[new_idx] = true;
            modified.push(ModifiedSegment {
                old: old_segments[old_idx].to_string(),
                new: (*new_segment).to_string(),
                similarity: score,
            });
        }
    }

    let added = unmatched(&new_segments, &new_matched);
    let removed = unmatched(&old_segments, &old_matched);

    ChangeSet::new(added, removed, modified)
}

fn unmatched(segments: &[&str], matched: &[bool]) -> Vec<String> {
    segments
        .iter()
        .zip(matched)
        .filter(|(_, matched)| !**matched)
        .map(|(segment, _)| (*segment).to_string())
        .collect()
}
