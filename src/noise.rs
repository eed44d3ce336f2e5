//! 日付やカウンター、定型文など見た目だけの差分を抑制する。

mod classifier;
mod patterns;

pub use classifier::{NoiseClassifier, is_numeric_only};
pub use patterns::{BUILTIN_VERSION, NoisePattern, NoisePatternError, NoisePatternSet};
