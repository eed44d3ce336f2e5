//! 監視対象のスナップショット同士を段落単位で比較する構造差分。

mod engine;
mod segment;
mod types;

pub use engine::{SIMILARITY_THRESHOLD, diff};
pub use segment::{similarity, split_segments};
pub use types::{ChangeSet, ModifiedSegment, SegmentChange};
