//! 保存される変更ごとに付ける大まかな重要度。

use serde::{Deserialize, Serialize};

use crate::diff::ChangeSet;

const HIGH_TOTAL: usize = 5;
const HIGH_REMOVED: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// 変更セットを評価する。
    ///
    /// 5セクション以上、または削除3件以上は`High`。編集1段落のみは`Low`。それ以外は`Medium`。
    #[must_use]
    pub fn classify(change_set: &ChangeSet) -> Self {
        let total = change_set.total_changes();
        if total >= HIGH_TOTAL || change_set.removed().len() >= HIGH_REMOVED {
            return Self::High;
        }
        if total <= 1 && change_set.added().is_empty() && change_set.removed().is_empty() {
            return Self::Low;
        }
        Self::Medium
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}
