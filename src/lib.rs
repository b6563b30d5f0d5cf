pub mod classifier;
pub mod config;
pub mod error;
pub mod labels;
pub mod landmarks;
pub mod model_download;
pub mod pipeline;
pub mod recognizer;
pub mod server;
pub mod startup;
pub mod types;

pub use classifier::{LogitModel, OrtLogitModel, SignClassifier};
pub use labels::LabelVocabulary;
pub use landmarks::{LandmarkVector, normalize};
pub use recognizer::{PredictRequest, PredictResponse, Recognizer};
