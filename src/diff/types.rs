use serde::{Deserialize, Serialize};

/// 互いの編集と判定された段落の組。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedSegment {
    pub old: String,
    pub new: String,
    pub similarity: f64,
}

/// One entry of a change set, borrowed from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentChange<'a> {
    Added(&'a str),
    Removed(&'a str),
    Modified(&'a ModifiedSegment),
}

/// スナップショット比較の構造化結果。
///
/// `{added, removed, modified, totalChanges}`としてシリアライズされ、変更レコードと一緒に保存される。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    added: Vec<String>,
    removed: Vec<String>,
    modified: Vec<ModifiedSegment>,
    #[serde(rename = "totalChanges")]
    total_changes: usize,
}

impl ChangeSet {
    #[must_use]
    pub fn new(added: Vec<String>, removed: Vec<String>, modified: Vec<ModifiedSegment>) -> Self {
        let total_changes = added.len() + removed.len() + modified.len();
        Self {
            added,
            removed,
            modified,
            total_changes,
        }
    }

    #[must_use]
    pub fn added(&self) -> &[String] {
        &self.added
    }

    #[must_use]
    pub fn removed(&self) -> &[String] {
        &self.removed
    }

    #[must_use]
    pub fn modified(&self) -> &[ModifiedSegment] {
        &self.modified
    }

    #[must_use]
    pub fn total_changes(&self) -> usize {
        self.total_changes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_changes == 0
    }

    /// Iterates every entry as a tagged variant: additions, then removals, then edits.
    pub fn segments(&self) -> impl Iterator<Item = SegmentChange<'_>> {
        self.added
            .iter()
            .map(|text| SegmentChange::Added(text))
            .chain(self.removed.iter().map(|text| SegmentChange::Removed(text)))
            .chain(self.modified.iter().map(SegmentChange::Modified))
    }
}
