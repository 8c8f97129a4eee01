use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    domain_age::{DomainAgeLookup, LookupError},
    layout::{layout_hash, FeatureSchema, SchemaMismatch, FEATURE_COUNT, FEATURE_LAYOUT, FEATURE_VERSION},
    parser::UrlParser,
    types::{FaultKind, FeatureFault, FeatureValues, ParsedUrl},
};

/// Weight applied to the low-signal lexical counts. The trained forest is
/// calibrated against it, so it must not change without a layout bump.
pub const LEXICAL_SCALE: f64 = 0.1;

/// Sentinel stored in `domain_age` when no creation date is available.
pub const UNKNOWN_DOMAIN_AGE: f64 = -1.0;

const SUSPICIOUS_WORDS: &[&str] = &["login", "signin", "verify", "secure", "account", "banking", "password"];

/// Characters counted literally in the full URL, in layout order.
const COUNTED_CHARS: [char; 10] = ['_', '.', '-', '%', '/', ':', ';', '@', '&', '='];

/// Feature values tagged with the layout they were built against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub version: u8,
    pub layout_hash: u32,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn from_values(values: [f64; FEATURE_COUNT]) -> Self {
        Self {
            version: FEATURE_VERSION,
            layout_hash: layout_hash(),
            values: values.to_vec(),
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn get_by_name(&self, name: &str) -> Option<f64> {
        crate::layout::feature_index(name).and_then(|i| self.values.get(i).copied())
    }

    /// Checks the vector against the schema a model was trained with.
    pub fn check_schema(&self, schema: &FeatureSchema) -> Result<(), SchemaMismatch> {
        if self.version != schema.version || self.layout_hash != schema.hash || self.values.len() != schema.names.len() {
            return Err(SchemaMismatch {
                expected_version: schema.version,
                expected_hash: schema.hash,
                actual_version: self.version,
                actual_hash: self.layout_hash,
            });
        }
        Ok(())
    }

    pub fn named(&self) -> FeatureValues {
        FeatureValues(FEATURE_LAYOUT.iter().copied().zip(self.values.iter().copied()).collect())
    }
}

/// Output of one extraction: the vector and whatever degraded on the way.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub vector: FeatureVector,
    pub faults: Vec<FeatureFault>,
}

impl Extraction {
    pub fn is_degraded(&self) -> bool {
        !self.faults.is_empty()
    }
}

pub struct FeatureExtractor {
    parser: Arc<UrlParser>,
    age_lookup: Arc<dyn DomainAgeLookup>,
}

impl FeatureExtractor {
    pub fn new(parser: Arc<UrlParser>, age_lookup: Arc<dyn DomainAgeLookup>) -> Self {
        Self { parser, age_lookup }
    }

    pub async fn extract_url(&self, url: &str) -> Extraction {
        let parsed = self.parser.parse(url);
        self.extract(&parsed).await
    }

    /// Never fails; a field that cannot be computed keeps its sentinel and
    /// is reported in [`Extraction::faults`].
    pub async fn extract(&self, parsed: &ParsedUrl) -> Extraction {
        let mut faults = Vec::new();

        if !parsed.has_host() {
            faults.push(FeatureFault { feature: "domain_length", kind: FaultKind::ParseDefault });
        }

        let domain_age = match self.domain_age(parsed).await {
            Ok(days) => days,
            Err(e) => {
                warn!("domain_age unavailable for {}: {}", parsed.raw, e);
                faults.push(FeatureFault {
                    feature: "domain_age",
                    kind: FaultKind::LookupFailure { reason: e.to_string() },
                });
                UNKNOWN_DOMAIN_AGE
            }
        };

        let vector = lexical_vector(parsed, domain_age);
        debug!("Extracted {} features for {}", FEATURE_COUNT, parsed.raw);
        Extraction { vector, faults }
    }

    async fn domain_age(&self, parsed: &ParsedUrl) -> Result<f64, LookupError> {
        if parsed.registrable_domain.is_empty() {
            return Err(LookupError::NoRegistrableDomain);
        }
        let created = self.age_lookup.creation_date(&parsed.registrable_domain).await?;
        Ok((Utc::now() - created).num_days() as f64)
    }
}

/// Builds the vector from a parsed URL and an already resolved domain age.
pub fn lexical_vector(parsed: &ParsedUrl, domain_age: f64) -> FeatureVector {
    let url = parsed.raw.as_str();
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    let scaled = |n: usize| n as f64 * LEXICAL_SCALE;

    let special_chars = url.chars().filter(|c| !c.is_ascii_alphanumeric() && !c.is_whitespace()).count();
    let digits = url.chars().filter(|c| c.is_ascii_digit()).count();
    let letters = url.chars().filter(|c| c.is_ascii_alphabetic()).count();

    let query = parsed.query_string.as_str();
    let num_params = if query.is_empty() { 0 } else { query.split('&').count() };

    let mut values = [0.0; FEATURE_COUNT];
    values[0] = parsed.domain_label.chars().count() as f64;
    values[1] = parsed.subdomain_count() as f64;
    values[2] = domain_age;
    values[3] = flag(is_dotted_quad(&parsed.domain_label));
    values[4] = flag(has_suspicious_words(url));
    values[5] = scaled(special_chars);
    values[6] = scaled(digits);
    values[7] = scaled(letters);
    values[8] = scaled(parsed.path.chars().count());
    values[9] = flag(!query.is_empty()) * LEXICAL_SCALE;
    values[10] = scaled(query.chars().count());
    values[11] = num_params as f64;
    values[12] = flag(parsed.scheme == "https") * LEXICAL_SCALE;
    for (slot, ch) in values[13..].iter_mut().zip(COUNTED_CHARS) {
        *slot = scaled(url.matches(ch).count());
    }

    FeatureVector::from_values(values)
}

fn is_dotted_quad(label: &str) -> bool {
    let parts: Vec<&str> = label.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| (1..=3).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_digit()))
}

fn has_suspicious_words(url: &str) -> bool {
    let lowered = url.to_lowercase();
    SUSPICIOUS_WORDS.iter().any(|w| lowered.contains(w))
}
