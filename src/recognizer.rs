use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    classifier::SignClassifier,
    error::ClassifyError,
    landmarks::LandmarkVector,
    pipeline::{
        frame::{FrameError, Orientation, decode_frame},
        handpose::HandDetector,
    },
    types::{Classification, Frame, Prediction},
};

pub const NO_HAND_MESSAGE: &str = "No hand detected in image";

#[derive(Debug, Error)]
pub enum RecognizeError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("hand detection failed: {0:#}")]
    Detector(anyhow::Error),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("recognition task failed: {0}")]
    Task(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct PredictRequest {
    /// Base64 encoded PNG or JPEG, optionally as a data URL.
    pub image: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopPrediction {
    pub letter: String,
    pub confidence: f32,
}

impl From<Prediction> for TopPrediction {
    fn from(p: Prediction) -> Self {
        Self {
            letter: p.label,
            confidence: p.confidence,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub letter: String,
    pub confidence: f32,
    pub landmarks_detected: bool,
    pub processing_time_ms: f64,
    pub error: Option<String>,
    pub top_predictions: Vec<TopPrediction>,
}

impl PredictResponse {
    pub fn failure(message: impl Into<String>, started: Instant) -> Self {
        Self {
            processing_time_ms: elapsed_ms(started),
            error: Some(message.into()),
            ..Self::default()
        }
    }

    fn no_hand(started: Instant) -> Self {
        Self::failure(NO_HAND_MESSAGE, started)
    }

    fn recognized(classification: Classification, started: Instant) -> Self {
        Self {
            letter: classification.best.label,
            confidence: classification.best.confidence,
            landmarks_detected: true,
            processing_time_ms: elapsed_ms(started),
            error: None,
            top_predictions: classification
                .top
                .into_iter()
                .map(TopPrediction::from)
                .collect(),
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Frame-level pipeline: decode, orient, detect, normalize, classify.
///
/// Everything inside is immutable after startup, so a single instance is
/// shared by all request handlers.
pub struct Recognizer {
    detector: Arc<dyn HandDetector>,
    classifier: Arc<SignClassifier>,
    orientation: Orientation,
    top_k: usize,
}

impl Recognizer {
    pub fn new(
        detector: Arc<dyn HandDetector>,
        classifier: Arc<SignClassifier>,
        orientation: Orientation,
        top_k: usize,
    ) -> Result<Self, ClassifyError> {
        if top_k == 0 {
            return Err(ClassifyError::InvalidTopK(top_k));
        }
        Ok(Self {
            detector,
            classifier,
            orientation,
            top_k,
        })
    }

    pub fn classifier(&self) -> &SignClassifier {
        &self.classifier
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Landmarks of the hand in `frame`, or `None` when no hand is visible.
    pub fn detect(&self, frame: &Frame) -> Result<Option<LandmarkVector>, RecognizeError> {
        self.detector
            .detect(frame)
            .map_err(RecognizeError::Detector)
    }

    /// Runs the pipeline on an already decoded frame. `Ok(None)` means no hand.
    pub fn recognize_frame(
        &self,
        frame: &Frame,
    ) -> Result<Option<Classification>, RecognizeError> {
        let Some(raw) = self.detect(frame)? else {
            return Ok(None);
        };
        let normalized = raw.normalized();
        let classification = self.classifier.classify(normalized.as_slice(), self.top_k)?;
        Ok(Some(classification))
    }

    pub fn try_recognize(&self, payload: &str) -> Result<Option<Classification>, RecognizeError> {
        let frame = decode_frame(payload, self.orientation)?;
        self.recognize_frame(&frame)
    }

    /// Never fails: problems are reported through `PredictResponse::error`.
    pub fn recognize(&self, payload: &str) -> PredictResponse {
        let started = Instant::now();
        match self.try_recognize(payload) {
            Ok(Some(classification)) => {
                let response = PredictResponse::recognized(classification, started);
                log::debug!(
                    "recognized '{}' ({:.2}) in {:.1} ms",
                    response.letter,
                    response.confidence,
                    response.processing_time_ms
                );
                response
            }
            Ok(None) => PredictResponse::no_hand(started),
            Err(err) => {
                log::warn!("prediction failed: {err}");
                PredictResponse::failure(err.to_string(), started)
            }
        }
    }
}
