use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Instant};
use tracing::{debug, error, info};

use crate::{
    classifier::Classifier,
    config::Config,
    domain_age,
    error::{internal_error, AppError},
    features::FeatureExtractor,
    parser::UrlParser,
    types::{FeatureReport, PredictionResult},
    whitelist::Whitelist,
};

/// Scores URLs: whitelist gate first, then feature extraction and the
/// classifier. Everything is fixed at construction and only read afterwards.
pub struct DetectionEngine {
    parser: Arc<UrlParser>,
    whitelist: Whitelist,
    extractor: FeatureExtractor,
    classifier: Classifier,
}

impl DetectionEngine {
    pub fn new(parser: Arc<UrlParser>, whitelist: Whitelist, extractor: FeatureExtractor, classifier: Classifier) -> Self {
        Self { parser, whitelist, extractor, classifier }
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        info!("Initializing detection engine...");

        let parser = Arc::new(build_parser(config)?);
        let whitelist = Whitelist::with_extra(&config.whitelist.extra);
        let extractor = FeatureExtractor::new(parser.clone(), domain_age::from_config(&config.whois));
        let classifier = Classifier::load(&config.model.path)?;

        info!(
            "Detection engine ready: {} whitelisted domains, model loaded: {}",
            whitelist.len(),
            classifier.is_loaded()
        );
        Ok(Self::new(parser, whitelist, extractor, classifier))
    }

    /// Never fails. Errors and panics inside scoring come back as a result
    /// with `error` set and `is_phishing` unknown. Without a model only the
    /// whitelist runs; other URLs are not extracted, so no WHOIS query is made.
    pub async fn score(&self, url: &str) -> PredictionResult {
        let start = Instant::now();
        metrics::counter!("phishguard_requests_total").increment(1);

        let result = match AssertUnwindSafe(self.try_score(url)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Scoring failed for {}: {}", url, e);
                metrics::counter!("phishguard_errors_total").increment(1);
                PredictionResult::failed(e)
            }
            Err(panic) => {
                let e = internal_error(&panic_message(panic.as_ref()));
                error!("Scoring panicked for {}: {}", url, e);
                metrics::counter!("phishguard_errors_total").increment(1);
                PredictionResult::failed(e)
            }
        };

        metrics::histogram!("phishguard_score_duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    async fn try_score(&self, url: &str) -> Result<PredictionResult, AppError> {
        let parsed = self.parser.parse(url);

        if self.whitelist.contains(&parsed) {
            metrics::counter!("phishguard_whitelist_hits_total").increment(1);
            return Ok(PredictionResult::whitelisted());
        }

        // nothing to score with; skip the lookup
        if !self.classifier.is_loaded() {
            return Err(AppError::ModelUnavailable);
        }

        let extraction = self.extractor.extract(&parsed).await;
        let prediction = self.classifier.predict(&extraction.vector)?;
        debug!(
            "Scored {}: phishing={} confidence={:.3} degraded={}",
            url,
            prediction.is_phishing,
            prediction.confidence,
            extraction.faults.len()
        );

        Ok(PredictionResult {
            is_phishing: Some(prediction.is_phishing),
            confidence: prediction.confidence,
            features: FeatureReport::Extracted(extraction.vector.named()),
            error: None,
            degraded: extraction.faults,
        })
    }

    pub fn model_loaded(&self) -> bool {
        self.classifier.is_loaded()
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }
}

/// Suffix list from `psl_path` when configured, the bundled snapshot otherwise.
pub fn build_parser(config: &Config) -> Result<UrlParser, AppError> {
    match &config.psl_path {
        Some(path) => UrlParser::from_file(path),
        None => UrlParser::new(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "scoring panicked".to_string()
    }
}
