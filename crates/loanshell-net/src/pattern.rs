//! URL patterns for request classification.

use serde::{Deserialize, Serialize};
use url::Url;

/// How a [`UrlPattern`] compares against a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// Exact URL match.
    Exact,
    /// Prefix of the full URL.
    Prefix,
    /// Suffix of the full URL.
    Suffix,
    /// Substring anywhere in the full URL.
    Contains,
    /// Prefix of the URL path only.
    Path,
}

/// URL pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPattern {
    pub kind: PatternKind,
    pub pattern: String,
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(url: &str) -> Self {
        Self::new(PatternKind::Exact, url)
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self::new(PatternKind::Prefix, prefix)
    }

    /// Create a suffix match pattern.
    pub fn suffix(suffix: &str) -> Self {
        Self::new(PatternKind::Suffix, suffix)
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self::new(PatternKind::Contains, substring)
    }

    /// Create a path-prefix pattern.
    pub fn path(prefix: &str) -> Self {
        Self::new(PatternKind::Path, prefix)
    }

    fn new(kind: PatternKind, pattern: &str) -> Self {
        Self {
            kind,
            pattern: pattern.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let url_str = url.as_str();
        match self.kind {
            PatternKind::Exact => url_str == self.pattern,
            PatternKind::Prefix => url_str.starts_with(&self.pattern),
            PatternKind::Suffix => url_str.ends_with(&self.pattern),
            PatternKind::Contains => url_str.contains(&self.pattern),
            PatternKind::Path => url.path().starts_with(&self.pattern),
        }
    }
}
