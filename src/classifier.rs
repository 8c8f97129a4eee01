use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};
use tracing::{debug, info};

use crate::{
    error::AppError,
    features::FeatureVector,
    forest::{ForestParams, RandomForest},
    layout::FeatureSchema,
};

/// What gets written to disk: the forest plus the layout it was fitted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema: FeatureSchema,
    pub trained_at: DateTime<Utc>,
    pub params: ForestParams,
    pub forest: RandomForest,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub is_phishing: bool,
    /// Posterior of the predicted class, in `[0.5, 1.0]`.
    pub confidence: f64,
    /// Raw phishing probability.
    pub probability: f64,
}

impl Prediction {
    fn from_probability(probability: f64) -> Self {
        let is_phishing = probability > 0.5;
        let confidence = if is_phishing { probability } else { 1.0 - probability };
        Self { is_phishing, confidence, probability }
    }
}

/// Holds at most one trained model. Having none is a valid state: the
/// service still starts and answers whitelist hits.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    artifact: Option<ModelArtifact>,
}

impl Classifier {
    pub fn unloaded() -> Self {
        Self { artifact: None }
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, AppError> {
        artifact.schema.validate()?;
        Ok(Self { artifact: Some(artifact) })
    }

    /// A missing file yields an unloaded classifier; a file written for a
    /// different feature layout is an error.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            info!("No model at {}, classifier starts unloaded", path.display());
            return Ok(Self::unloaded());
        }

        let reader = BufReader::new(File::open(path)?);
        let artifact: ModelArtifact = bincode::deserialize_from(reader)?;
        let classifier = Self::from_artifact(artifact)?;
        if let Some(artifact) = &classifier.artifact {
            info!(
                "Loaded model from {}: {} trees, layout v{}, trained {}",
                path.display(),
                artifact.forest.n_trees(),
                artifact.schema.version,
                artifact.trained_at.to_rfc3339()
            );
        }
        Ok(classifier)
    }

    pub fn train(vectors: &[FeatureVector], labels: &[bool], params: &ForestParams) -> Result<Self, AppError> {
        let schema = FeatureSchema::current();
        let mut rows = Vec::with_capacity(vectors.len());
        for vector in vectors {
            vector.check_schema(&schema)?;
            rows.push(vector.values.clone());
        }

        let forest = RandomForest::fit(&rows, labels, params)?;
        Ok(Self {
            artifact: Some(ModelArtifact {
                schema,
                trained_at: Utc::now(),
                params: params.clone(),
                forest,
            }),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let artifact = self.artifact.as_ref().ok_or(AppError::ModelUnavailable)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, artifact)?;
        writer.flush()?;
        info!("Saved model to {}", path.display());
        Ok(())
    }

    pub fn predict(&self, vector: &FeatureVector) -> Result<Prediction, AppError> {
        let artifact = self.artifact.as_ref().ok_or(AppError::ModelUnavailable)?;
        vector.check_schema(&artifact.schema)?;

        let prediction = Prediction::from_probability(artifact.forest.predict_proba(vector.as_slice()));
        debug!(
            "Prediction: phishing={} p={:.3}",
            prediction.is_phishing, prediction.probability
        );
        Ok(prediction)
    }

    pub fn is_loaded(&self) -> bool {
        self.artifact.is_some()
    }

    pub fn artifact(&self) -> Option<&ModelArtifact> {
        self.artifact.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{feature_index, FEATURE_COUNT};

    fn vector_with(age: f64, is_ip: f64) -> FeatureVector {
        let mut values = [0.0; FEATURE_COUNT];
        values[feature_index("domain_age").unwrap()] = age;
        values[feature_index("is_ip").unwrap()] = is_ip;
        FeatureVector::from_values(values)
    }

    fn training_set() -> (Vec<FeatureVector>, Vec<bool>) {
        let mut vectors = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30 {
            let phishing = i % 2 == 0;
            let vector = if phishing {
                vector_with(-1.0 + (i % 3) as f64, 1.0)
            } else {
                vector_with(1000.0 + i as f64 * 10.0, 0.0)
            };
            vectors.push(vector);
            labels.push(phishing);
        }
        (vectors, labels)
    }

    fn trained() -> Classifier {
        let (vectors, labels) = training_set();
        Classifier::train(&vectors, &labels, &ForestParams { n_trees: 15, ..Default::default() }).unwrap()
    }

    #[test]
    fn test_unloaded_predict_fails() {
        let classifier = Classifier::unloaded();
        let err = classifier.predict(&vector_with(10.0, 0.0)).unwrap_err();
        assert!(matches!(err, AppError::ModelUnavailable));
        assert_eq!(err.to_string(), "model not loaded");
    }

    #[test]
    fn test_confidence_is_posterior_of_predicted_class() {
        let low = Prediction::from_probability(0.2);
        assert!(!low.is_phishing);
        assert!((low.confidence - 0.8).abs() < 1e-12);

        let high = Prediction::from_probability(0.9);
        assert!(high.is_phishing);
        assert_eq!(high.confidence, 0.9);

        let tie = Prediction::from_probability(0.5);
        assert!(!tie.is_phishing);
        assert_eq!(tie.confidence, 0.5);
    }

    #[test]
    fn test_trained_model_separates_classes() {
        let classifier = trained();
        assert!(classifier.predict(&vector_with(0.0, 1.0)).unwrap().is_phishing);
        assert!(!classifier.predict(&vector_with(2000.0, 0.0)).unwrap().is_phishing);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("phishing_model.bin");
        let classifier = trained();
        classifier.save(&path).unwrap();

        let loaded = Classifier::load(&path).unwrap();
        assert!(loaded.is_loaded());
        let point = vector_with(0.0, 1.0);
        assert_eq!(
            loaded.predict(&point).unwrap(),
            classifier.predict(&point).unwrap()
        );
    }

    #[test]
    fn test_missing_file_is_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = Classifier::load(&dir.path().join("absent.bin")).unwrap();
        assert!(!classifier.is_loaded());
    }

    #[test]
    fn test_model_from_other_layout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.bin");

        let mut artifact = trained().artifact().cloned().unwrap();
        artifact.schema.version += 1;
        artifact.schema.names.pop();
        let file = File::create(&path).unwrap();
        bincode::serialize_into(file, &artifact).unwrap();

        let result = Classifier::load(&path);
        assert!(matches!(result, Err(AppError::SchemaMismatch(_))));
    }

    #[test]
    fn test_vector_from_other_layout_is_rejected() {
        let classifier = trained();
        let mut vector = vector_with(0.0, 1.0);
        vector.layout_hash ^= 0xff;
        assert!(matches!(
            classifier.predict(&vector),
            Err(AppError::SchemaMismatch(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_write_is_reported() {
        let result = trained().save(Path::new("/dev/full"));
        assert!(matches!(result, Err(AppError::Io(_)) | Err(AppError::ModelEncoding(_))));
    }

    #[test]
    fn test_saving_without_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Classifier::unloaded().save(&dir.path().join("model.bin"));
        assert!(matches!(result, Err(AppError::ModelUnavailable)));
    }
}
