//! Feature layout: the single definition of which features exist and in
//! which order they are fed to the classifier.
//!
//! Adding, removing or reordering a feature means bumping [`FEATURE_VERSION`].
//! Every persisted model carries the [`FeatureSchema`] it was trained with and
//! is rejected when that schema differs from [`FeatureSchema::current`].

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current feature layout version.
pub const FEATURE_VERSION: u8 = 1;

/// Feature names in vector order.
pub const FEATURE_LAYOUT: &[&str] = &[
    // domain structure and security flags, unscaled
    "domain_length",
    "subdomain_count",
    "domain_age",
    "is_ip",
    "has_suspicious_words",
    // character classes, x0.1
    "special_char_count",
    "digit_count",
    "letter_count",
    // path and query, x0.1 except num_params
    "path_length",
    "has_query",
    "query_length",
    "num_params",
    "is_https",
    // literal character counts, x0.1
    "num_underscores",
    "num_dots",
    "num_hyphens",
    "num_percent",
    "num_slash",
    "num_colon",
    "num_semicolon",
    "num_at",
    "num_ampersand",
    "num_equal",
];

/// Must match `FEATURE_LAYOUT.len()`.
pub const FEATURE_COUNT: usize = 23;

/// CRC32 over the version byte and every name, NUL separated.
pub fn layout_hash() -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FEATURE_VERSION]);
    for name in FEATURE_LAYOUT {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize()
}

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_LAYOUT.iter().position(|&n| n == name)
}

/// Layout identity stamped on vectors and persisted models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u8,
    pub hash: u32,
    pub names: Vec<String>,
}

impl FeatureSchema {
    pub fn current() -> Self {
        Self {
            version: FEATURE_VERSION,
            hash: layout_hash(),
            names: FEATURE_LAYOUT.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Checks this schema against the layout compiled into the binary.
    pub fn validate(&self) -> Result<(), SchemaMismatch> {
        let current = Self::current();
        if self.version != current.version || self.hash != current.hash || self.names != current.names {
            return Err(SchemaMismatch {
                expected_version: current.version,
                expected_hash: current.hash,
                actual_version: self.version,
                actual_hash: self.hash,
            });
        }
        Ok(())
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::current()
    }
}

#[derive(Debug, Clone, Error)]
#[error(
    "feature layout mismatch: expected v{expected_version} (hash {expected_hash:08x}), got v{actual_version} (hash {actual_hash:08x})"
)]
pub struct SchemaMismatch {
    pub expected_version: u8,
    pub expected_hash: u32,
    pub actual_version: u8,
    pub actual_hash: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_count() {
        assert_eq!(FEATURE_LAYOUT.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_layout_hash_is_stable() {
        assert_eq!(layout_hash(), layout_hash());
        assert_ne!(layout_hash(), 0);
    }

    #[test]
    fn test_current_schema_validates() {
        assert!(FeatureSchema::current().validate().is_ok());
    }

    #[test]
    fn test_version_bump_is_rejected() {
        let mut schema = FeatureSchema::current();
        schema.version += 1;
        let err = schema.validate().unwrap_err();
        assert_eq!(err.expected_version, FEATURE_VERSION);
        assert_eq!(err.actual_version, FEATURE_VERSION + 1);
    }

    #[test]
    fn test_reordered_names_are_rejected() {
        let mut schema = FeatureSchema::current();
        schema.names.swap(0, 1);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_feature_index() {
        assert_eq!(feature_index("domain_length"), Some(0));
        assert_eq!(feature_index("domain_age"), Some(2));
        assert_eq!(feature_index("num_params"), Some(11));
        assert_eq!(feature_index("num_equal"), Some(22));
        assert_eq!(feature_index("entropy"), None);
    }
}
