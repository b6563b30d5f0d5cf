use std::path::PathBuf;

use thiserror::Error;

/// A landmark vector did not have the 21 x 3 layout the pipeline expects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LandmarkError {
    #[error("expected {expected} landmark values (21 points x 3 coordinates), got {actual}")]
    Length { expected: usize, actual: usize },
}

/// Failures raised while running the classification model.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model input has {actual} features, expected {expected}")]
    InputWidth { expected: usize, actual: usize },
    #[error("inference backend failed: {0}")]
    Backend(String),
    #[error("model returned no outputs")]
    NoOutput,
    #[error("model produced {actual} scores, vocabulary has {expected} labels")]
    OutputWidth { expected: usize, actual: usize },
    #[error("model produced a non-finite score at index {index}")]
    NonFinite { index: usize },
    #[error("model session lock poisoned")]
    Poisoned,
}

/// Startup problems: the service refuses to come up with these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("label vocabulary is empty")]
    EmptyVocabulary,
    #[error("label vocabulary contains duplicate label '{0}'")]
    DuplicateLabel(String),
    #[error("vocabulary has {labels} labels but the model produces {outputs} scores")]
    VocabularyMismatch { labels: usize, outputs: usize },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse label file {path}: {source}")]
    ParseLabels {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to load model {path}: {message}")]
    Model { path: PathBuf, message: String },
    #[error("failed to probe model output width: {0}")]
    Probe(#[from] InferenceError),
}

/// Errors returned by the classifier adapter.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Landmarks(#[from] LandmarkError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("top-k must be at least 1, got {0}")]
    InvalidTopK(usize),
}
