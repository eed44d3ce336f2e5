use std::{fs, path::Path};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub const BUILTIN_VERSION: &str = "builtin-v1";

const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    (
        "copyright",
        r"(?i)(?:copyright|©|\(c\))\s*\d{4}(?:\s*-\s*\d{4})?",
    ),
    (
        "last_updated",
        r"(?i)(?:last\s+(?:updated|modified)|updated\s+on|modified\s+on)\s*[:\s]*\d{1,2}[/\-.\s]\d{1,2}[/\-.\s]\d{2,4}",
    ),
    (
        "iso_timestamp",
        r"\d{4}-\d{2}-\d{2}[T\s]\d{2}:\d{2}(?::\d{2})?(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
    ),
    (
        "current_date",
        r"(?i)(?:today|now|current\s+date)[:\s]*\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4}",
    ),
    (
        "cookie_banner",
        r"(?i)(?:we\s+use\s+cookies|cookie\s+(?:policy|notice|consent)|accept\s+(?:all\s+)?cookies|manage\s+cookies)",
    ),
    (
        "promotion",
        r"(?i)(?:sponsored|advertisement|promoted|ad\s*:|promo(?:tion)?\s*:)",
    ),
    (
        "engagement_counter",
        r"(?i)(?:views?|likes?|shares?|comments?|followers?|subscribers?)[:\s]*[\d,.]+[KMBkmb]?",
    ),
];

#[derive(Debug, Error)]
pub enum NoisePatternError {
    #[error("failed to read noise pattern file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse noise pattern file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid noise pattern {name}: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
pub struct NoisePattern {
    name: String,
    regex: Regex,
}

impl NoisePattern {
    /// # Errors
    /// Returns [`NoisePatternError::InvalidPattern`] when the expression does not compile.
    pub fn new(name: impl Into<String>, expression: &str) -> Result<Self, NoisePatternError> {
        let name = name.into();
        let regex = Regex::new(expression).map_err(|source| NoisePatternError::InvalidPattern {
            name: name.clone(),
            source,
        })?;
        Ok(Self { name, regex })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Deserialize)]
struct PatternFile {
    version: String,
    patterns: Vec<PatternEntry>,
}

#[derive(Debug, Deserialize)]
struct PatternEntry {
    name: String,
    regex: String,
}

/// Versioned list of expressions whose matches are ignored when comparing content.
#[derive(Debug, Clone)]
pub struct NoisePatternSet {
    version: String,
    patterns: Vec<NoisePattern>,
}

impl NoisePatternSet {
    /// Compiles a set from `(name, expression)` pairs.
    ///
    /// # Errors
    /// Fails on the first expression that does not compile.
    pub fn from_pairs<'a>(
        version: impl Into<String>,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, NoisePatternError> {
        let patterns = pairs
            .into_iter()
            .map(|(name, expression)| NoisePattern::new(name, expression))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            version: version.into(),
            patterns,
        })
    }

    /// The list compiled into the binary.
    #[must_use]
    pub fn builtin() -> Self {
        let patterns = BUILTIN_PATTERNS
            .iter()
            .map(|(name, expression)| NoisePattern {
                name: (*name).to_string(),
                regex: Regex::new(expression).expect("compile builtin noise pattern"),
            })
            .collect();
        Self {
            version: BUILTIN_VERSION.to_string(),
            patterns,
        }
    }

    /// Parses a YAML document of the form `{version, patterns: [{name, regex}]}`.
    ///
    /// # Errors
    /// Returns an error when the document is malformed or any expression is invalid.
    pub fn from_yaml_str(raw: &str) -> Result<Self, NoisePatternError> {
        let file: PatternFile = serde_yaml::from_str(raw)?;
        Self::from_pairs(
            file.version.clone(),
            file.patterns
                .iter()
                .map(|entry| (entry.name.as_str(), entry.regex.as_str())),
        )
    }

    /// # Errors
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, NoisePatternError> {
        let raw = fs::read_to_string(path).map_err(|source| NoisePatternError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Returns a copy extended with a resource's own expressions.
    ///
    /// Expressions that fail to compile are skipped with a warning so one bad
    /// entry cannot stall monitoring of the resource.
    #[must_use]
    pub fn with_extra(&self, expressions: &[String]) -> Self {
        let mut extended = self.clone();
        for (idx, expression) in expressions.iter().enumerate() {
            match NoisePattern::new(format!("resource_{idx}"), expression) {
                Ok(pattern) => extended.patterns.push(pattern),
                Err(error) => warn!(%error, "skipping invalid resource noise pattern"),
            }
        }
        if extended.patterns.len() > self.patterns.len() {
            extended.version = format!("{}+resource", self.version);
        }
        extended
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn patterns(&self) -> &[NoisePattern] {
        &self.patterns
    }

    /// Removes every pattern match from `text`.
    #[must_use]
    pub fn strip(&self, text: &str) -> String {
        let mut stripped = text.to_string();
        for pattern in &self.patterns {
            if pattern.regex.is_match(&stripped) {
                stripped = pattern.regex.replace_all(&stripped, "").into_owned();
            }
        }
        stripped.trim().to_string()
    }
}

impl Default for NoisePatternSet {
    fn default() -> Self {
        Self::builtin()
    }
}
