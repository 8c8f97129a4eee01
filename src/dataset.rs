use serde::Deserialize;
use std::{fs::File, io::Read, path::Path};
use tracing::info;

use crate::error::{validation_error, AppError};

/// One labelled row of a training CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledUrl {
    pub url: String,
    pub is_phishing: bool,
}

#[derive(Debug, Deserialize)]
struct Record {
    url: String,
    is_phishing: String,
}

/// Reads a `url,is_phishing` CSV with labels `0` or `1`.
pub fn load_csv(path: &Path) -> Result<Vec<LabeledUrl>, AppError> {
    let samples = from_reader(File::open(path)?)?;
    let phishing = samples.iter().filter(|s| s.is_phishing).count();
    info!(
        "Loaded {} samples from {} ({} phishing, {} legitimate)",
        samples.len(),
        path.display(),
        phishing,
        samples.len() - phishing
    );
    Ok(samples)
}

pub fn from_reader<R: Read>(reader: R) -> Result<Vec<LabeledUrl>, AppError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut samples = Vec::new();

    for (i, record) in csv.deserialize::<Record>().enumerate() {
        let record = record?;
        // header is line 1
        let line = i + 2;
        let is_phishing = match record.is_phishing.as_str() {
            "1" => true,
            "0" => false,
            other => {
                return Err(validation_error(&format!(
                    "line {}: is_phishing must be 0 or 1, got {:?}",
                    line, other
                )))
            }
        };
        if record.url.is_empty() {
            return Err(validation_error(&format!("line {}: empty url", line)));
        }
        samples.push(LabeledUrl { url: record.url, is_phishing });
    }

    Ok(samples)
}
