pub mod adapter;
pub mod evaluation;
pub mod inference;
pub mod ml_model;
pub mod mobilenet;
pub mod training;

pub use adapter::ModelAdapter;
pub use evaluation::{BatchEvaluator, EvaluationOutcome};
pub use inference::InferenceEngine;
pub use ml_model::{ModelConfig, SpeciesClassifier};
pub use mobilenet::{feature_width, MobileNetV3};
pub use training::{train_model, SpeciesBatch, SpeciesBatcher, SpeciesDataset, SpeciesItem, TrainingReport};
