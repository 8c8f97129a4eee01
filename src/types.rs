use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedUrl {
    /// The input exactly as received; character counts are taken from it.
    pub raw: String,
    pub scheme: String,
    pub full_host: String,
    pub subdomain: String,
    pub domain_label: String,
    pub suffix: String,
    /// `domain_label.suffix`, empty when either part is missing.
    pub registrable_domain: String,
    pub path: String,
    pub query_string: String,
}

impl ParsedUrl {
    /// Key used by the whitelist gate: `{domain_label}.{suffix}` verbatim.
    pub fn whitelist_key(&self) -> String {
        format!("{}.{}", self.domain_label, self.suffix)
    }

    pub fn subdomain_count(&self) -> usize {
        if self.subdomain.is_empty() {
            0
        } else {
            self.subdomain.split('.').count()
        }
    }

    pub fn has_host(&self) -> bool {
        !self.full_host.is_empty()
    }
}

/// Why a single feature fell back to its default value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultKind {
    /// The URL had no recognisable host; host-derived fields are zero.
    ParseDefault,
    /// The domain-age lookup failed; the field holds `-1`.
    LookupFailure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureFault {
    pub feature: &'static str,
    #[serde(flatten)]
    pub kind: FaultKind,
}

/// Named feature values in layout order, serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureValues(pub Vec<(&'static str, f64)>);

impl FeatureValues {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }
}

impl Serialize for FeatureValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// What the `features` field of a result carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureReport {
    /// Only the whitelist fired; no vector was computed.
    Whitelisted { is_legitimate: bool },
    Extracted(FeatureValues),
}

impl FeatureReport {
    pub fn empty() -> Self {
        FeatureReport::Extracted(FeatureValues::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    /// `None` (JSON `null`) when scoring failed.
    pub is_phishing: Option<bool>,
    pub confidence: f64,
    pub features: FeatureReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<FeatureFault>,
}

impl PredictionResult {
    pub fn whitelisted() -> Self {
        Self {
            is_phishing: Some(false),
            confidence: 0.99,
            features: FeatureReport::Whitelisted { is_legitimate: true },
            error: None,
            degraded: Vec::new(),
        }
    }

    pub fn failed(err: impl ToString) -> Self {
        Self {
            is_phishing: None,
            confidence: 0.0,
            features: FeatureReport::empty(),
            error: Some(err.to_string()),
            degraded: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeForm {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub url: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub result: PredictionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub model_loaded: bool,
    pub feature_version: u8,
    pub layout_hash: String,
    pub timestamp: String,
}
