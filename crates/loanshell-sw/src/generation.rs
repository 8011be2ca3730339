//! Cache generation naming.
//!
//! A generation name is `<prefix>-<tag>` (or just `<tag>` with an empty prefix),
//! where the tag encodes a semantic version such as `v1.0.0` or `v2`.

use std::fmt;

use semver::Version;
use serde::Serialize;

/// Logical role of a cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheRole {
    /// Static application assets, populated at install.
    Shell,
    /// Dynamic API-like responses, populated on demand.
    Data,
}

impl fmt::Display for CacheRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheRole::Shell => f.write_str("shell"),
            CacheRole::Data => f.write_str("data"),
        }
    }
}

/// Build a generation name from a prefix and a version tag.
pub fn generation_name(prefix: &str, tag: &str) -> String {
    if prefix.is_empty() {
        tag.to_string()
    } else {
        format!("{prefix}-{tag}")
    }
}

/// Parse a version tag leniently: an optional leading `v`, and missing minor
/// or patch components default to zero (`v2` is 2.0.0).
pub fn parse_version_tag(tag: &str) -> Option<Version> {
    let bare = tag.strip_prefix('v').unwrap_or(tag);
    let core_end = bare.find(['-', '+']).unwrap_or(bare.len());
    let (core, rest) = bare.split_at(core_end);
    let padded = match core.matches('.').count() {
        0 => format!("{core}.0.0{rest}"),
        1 => format!("{core}.0{rest}"),
        _ => bare.to_string(),
    };
    Version::parse(&padded).ok()
}

/// A generation name split into prefix and version, when it follows the
/// naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationName {
    pub prefix: String,
    pub version: Version,
}

impl GenerationName {
    /// Split `name` at its last `-v<digit>` boundary. Names that are a bare
    /// tag have an empty prefix. Returns `None` for foreign names.
    pub fn parse(name: &str) -> Option<Self> {
        let split = name
            .match_indices("-v")
            .map(|(i, _)| i)
            .filter(|&i| {
                name[i + 2..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_digit())
            })
            .last();

        let (prefix, tag) = match split {
            Some(i) => (&name[..i], &name[i + 1..]),
            None => ("", name),
        };
        if prefix.is_empty() && !tag.starts_with('v') {
            return None;
        }

        parse_version_tag(tag).map(|version| Self {
            prefix: prefix.to_string(),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_name() {
        assert_eq!(
            generation_name("family-loan-tracker", "v1.0.0"),
            "family-loan-tracker-v1.0.0"
        );
        assert_eq!(generation_name("", "v2"), "v2");
    }

    #[test]
    fn test_parse_version_tag_pads() {
        assert_eq!(parse_version_tag("v2"), Some(Version::new(2, 0, 0)));
        assert_eq!(parse_version_tag("1.4"), Some(Version::new(1, 4, 0)));
        assert_eq!(
            parse_version_tag("v1.0.0-beta.1").map(|v| v.pre.to_string()),
            Some("beta.1".to_string())
        );
        assert_eq!(parse_version_tag("latest"), None);
    }

    #[test]
    fn test_parse_generation_name() {
        let name = GenerationName::parse("family-loan-data-v1.0.0").unwrap();
        assert_eq!(name.prefix, "family-loan-data");
        assert_eq!(name.version, Version::new(1, 0, 0));

        let bare = GenerationName::parse("v2").unwrap();
        assert_eq!(bare.prefix, "");

        assert!(GenerationName::parse("workbox-precache").is_none());
    }
}
