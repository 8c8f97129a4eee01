use futures::{stream, StreamExt};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::{
    classifier::Classifier,
    dataset::LabeledUrl,
    error::{validation_error, AppError},
    features::FeatureExtractor,
    forest::ForestParams,
};

/// Share of the dataset held out for evaluation.
pub const TEST_FRACTION: f64 = 0.2;

/// Concurrent extractions while building the training matrix.
const EXTRACTION_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub train_size: usize,
    pub test_size: usize,
    /// Samples whose vector had at least one defaulted feature.
    pub degraded_samples: usize,
    pub accuracy: f64,
    pub legitimate: ClassMetrics,
    pub phishing: ClassMetrics,
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "train samples: {}  test samples: {}", self.train_size, self.test_size)?;
        writeln!(f, "degraded samples: {}", self.degraded_samples)?;
        writeln!(f, "accuracy: {:.4}", self.accuracy)?;
        writeln!(f)?;
        writeln!(f, "{:>12} {:>10} {:>10} {:>10} {:>10}", "", "precision", "recall", "f1-score", "support")?;
        for (name, m) in [("legitimate", &self.legitimate), ("phishing", &self.phishing)] {
            writeln!(
                f,
                "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, m.precision, m.recall, m.f1, m.support
            )?;
        }
        Ok(())
    }
}

/// Extracts features with the serving extractor, holds out a seeded test
/// split, fits a forest on the rest and evaluates it.
pub async fn train(
    extractor: &FeatureExtractor,
    samples: &[LabeledUrl],
    params: &ForestParams,
) -> Result<(Classifier, TrainingReport), AppError> {
    let test_size = (samples.len() as f64 * TEST_FRACTION).ceil() as usize;
    if samples.len() < 2 || test_size >= samples.len() {
        return Err(validation_error(&format!(
            "need at least 2 samples to train, got {}",
            samples.len()
        )));
    }

    info!("Extracting features for {} URLs...", samples.len());
    let extractions: Vec<_> = stream::iter(samples)
        .map(|sample| extractor.extract_url(&sample.url))
        .buffered(EXTRACTION_CONCURRENCY)
        .collect()
        .await;
    let degraded_samples = extractions.iter().filter(|e| e.is_degraded()).count();

    let mut order: Vec<usize> = (0..samples.len()).collect();
    order.shuffle(&mut StdRng::seed_from_u64(params.seed));
    let (test_idx, train_idx) = order.split_at(test_size);

    let train_vectors: Vec<_> = train_idx.iter().map(|&i| extractions[i].vector.clone()).collect();
    let train_labels: Vec<bool> = train_idx.iter().map(|&i| samples[i].is_phishing).collect();

    info!("Training on {} samples, {} held out", train_idx.len(), test_idx.len());
    let classifier = Classifier::train(&train_vectors, &train_labels, params)?;

    let mut truth = Vec::with_capacity(test_idx.len());
    let mut predicted = Vec::with_capacity(test_idx.len());
    for &i in test_idx {
        truth.push(samples[i].is_phishing);
        predicted.push(classifier.predict(&extractions[i].vector)?.is_phishing);
    }

    let (accuracy, legitimate, phishing) = evaluate(&truth, &predicted);
    let report = TrainingReport {
        train_size: train_idx.len(),
        test_size: test_idx.len(),
        degraded_samples,
        accuracy,
        legitimate,
        phishing,
    };
    info!("Training finished: accuracy {:.4}", report.accuracy);
    Ok((classifier, report))
}

/// Accuracy plus per-class metrics (legitimate, phishing). Undefined ratios
/// are reported as 0.
pub fn evaluate(truth: &[bool], predicted: &[bool]) -> (f64, ClassMetrics, ClassMetrics) {
    let total = truth.len();
    let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
    let accuracy = if total == 0 { 0.0 } else { correct as f64 / total as f64 };
    (accuracy, class_metrics(truth, predicted, false), class_metrics(truth, predicted, true))
}

fn class_metrics(truth: &[bool], predicted: &[bool], class: bool) -> ClassMetrics {
    let pairs = || truth.iter().zip(predicted);
    let tp = pairs().filter(|(t, p)| **t == class && **p == class).count() as f64;
    let predicted_pos = pairs().filter(|(_, p)| **p == class).count() as f64;
    let support = pairs().filter(|(t, _)| **t == class).count();

    let ratio = |num: f64, den: f64| if den == 0.0 { 0.0 } else { num / den };
    let precision = ratio(tp, predicted_pos);
    let recall = ratio(tp, support as f64);
    let f1 = ratio(2.0 * precision * recall, precision + recall);
    ClassMetrics { precision, recall, f1, support }
}
