//! Lock-error classification
//!
//! Provides line-oriented, case-insensitive pattern matching:
//! - Compile a pattern set once, reporting invalid patterns individually
//! - Classify free text, first match in pattern order then line order
//! - Share compiled sets across passes through a moka cache

use crate::error::PatternError;
use moka::sync::Cache;
use regex::Regex;
use std::sync::Arc;

/// Patterns applied when a monitor configures none
pub const DEFAULT_PATTERNS: &[&str] = &[
    "repository is already locked",
    "unable to create lock",
    "repository.*locked",
    "lock.*already.*exists",
];

/// Result of a successful classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockMatch {
    /// Source pattern that matched, as configured
    pub pattern: String,
    /// Matching line, trimmed
    pub line: String,
}

/// Compiled, ordered set of lock-error patterns
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    compiled: Vec<(String, Regex)>,
    errors: Vec<PatternError>,
}

impl PatternClassifier {
    /// Compile `patterns`, falling back to [`DEFAULT_PATTERNS`] when empty
    ///
    /// Invalid patterns never fail construction; they are skipped and
    /// reported through [`PatternClassifier::errors`].
    #[must_use]
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut compiled = Vec::new();
        let mut errors = Vec::new();

        let sources: Vec<&str> = if patterns.is_empty() {
            DEFAULT_PATTERNS.to_vec()
        } else {
            patterns.iter().map(|p| p.as_ref()).collect()
        };

        for pattern in sources {
            match Regex::new(&format!("(?i){pattern}")) {
                Ok(regex) => compiled.push((pattern.to_string(), regex)),
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "skipping invalid lock error pattern");
                    errors.push(PatternError {
                        pattern: pattern.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Self { compiled, errors }
    }

    /// Classifier over the built-in patterns
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new::<&str>(&[])
    }

    /// Patterns that failed to compile
    #[inline]
    #[must_use]
    pub fn errors(&self) -> &[PatternError] {
        &self.errors
    }

    /// Number of usable patterns
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    /// Find the first pattern matching any line of `text`
    ///
    /// Patterns are tried in configured order; for each pattern, lines are
    /// tried top to bottom. No match is a normal outcome.
    #[must_use]
    pub fn classify(&self, text: &str) -> Option<LockMatch> {
        if text.is_empty() {
            return None;
        }
        self.compiled.iter().find_map(|(pattern, regex)| {
            text.lines()
                .find(|line| regex.is_match(line))
                .map(|line| LockMatch {
                    pattern: pattern.clone(),
                    line: line.trim().to_string(),
                })
        })
    }
}

/// Cache of compiled classifiers keyed by their pattern list
#[derive(Debug, Clone)]
pub struct ClassifierCache {
    inner: Cache<Vec<String>, Arc<PatternClassifier>>,
}

impl ClassifierCache {
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    /// Get the classifier for `patterns`, compiling it on first use
    #[must_use]
    pub fn get(&self, patterns: &[String]) -> Arc<PatternClassifier> {
        self.inner
            .get_with(patterns.to_vec(), || Arc::new(PatternClassifier::new(patterns)))
    }

    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl Default for ClassifierCache {
    fn default() -> Self {
        Self::new(256)
    }
}
