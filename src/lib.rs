pub mod classifier;
pub mod config;
pub mod dataset;
pub mod domain_age;
pub mod engine;
pub mod error;
pub mod features;
pub mod forest;
pub mod layout;
pub mod parser;
pub mod routes;
pub mod training;
pub mod types;
pub mod whitelist;

pub use engine::DetectionEngine;
pub use error::AppError;
pub use types::PredictionResult;
