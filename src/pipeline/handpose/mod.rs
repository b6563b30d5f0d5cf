//! Hand landmark detection: image in, 21 raw landmarks out.

pub mod common;
pub mod palm;

use std::{path::Path, sync::Mutex};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use self::{
    common::{INPUT_SIZE, decode_landmarks, prepare_rotated_crop},
    palm::{PalmDetector, PalmDetectorConfig, crop_from_palm, pick_primary_region},
};
use crate::{landmarks::LandmarkVector, types::Frame};

/// Finds at most one hand in a frame.
///
/// Implementations return landmarks in image-relative coordinates (x and y
/// roughly in `0..1`), point 0 being the wrist. `Ok(None)` means no hand.
pub trait HandDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Option<LandmarkVector>>;
}

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// Palm score and landmark presence below this count as "no hand".
    pub min_detection_confidence: f32,
    pub intra_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.5,
            intra_threads: 2,
        }
    }
}

/// Two-stage MediaPipe pipeline: palm detection, then landmark regression on a
/// rotated crop around the best palm.
pub struct MediapipeHandDetector {
    engine: Mutex<Engine>,
    min_confidence: f32,
}

struct Engine {
    palm_detector: PalmDetector,
    handpose: Session,
}

/// Raw estimator output for one crop.
#[derive(Clone, Debug)]
struct HandposeOutput {
    landmarks: Vec<[f32; 3]>,
    confidence: f32,
    handedness: f32,
}

fn palm_config(cfg: &DetectorConfig) -> PalmDetectorConfig {
    PalmDetectorConfig {
        score_threshold: cfg.min_detection_confidence,
        intra_threads: cfg.intra_threads,
        ..PalmDetectorConfig::default()
    }
}

impl MediapipeHandDetector {
    pub fn new(
        palm_detector_model_path: &Path,
        handpose_model_path: &Path,
        cfg: &DetectorConfig,
    ) -> Result<Self> {
        let handpose = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(cfg.intra_threads)?
            .commit_from_file(handpose_model_path)
            .with_context(|| {
                format!(
                    "failed to load handpose estimator from {}",
                    handpose_model_path.display()
                )
            })?;

        let palm_detector = PalmDetector::new(palm_detector_model_path, palm_config(cfg))?;

        log::info!(
            "hand detector ready using {} and palm detector {}",
            handpose_model_path.display(),
            palm_detector_model_path.display()
        );

        Ok(Self {
            engine: Mutex::new(Engine {
                palm_detector,
                handpose,
            }),
            min_confidence: cfg.min_detection_confidence,
        })
    }
}

impl HandDetector for MediapipeHandDetector {
    fn detect(&self, frame: &Frame) -> Result<Option<LandmarkVector>> {
        let mut engine = self
            .engine
            .lock()
            .map_err(|_| anyhow!("hand detector lock poisoned"))?;

        let palm_regions = engine.palm_detector.detect(frame)?;
        let Some(selected) = pick_primary_region(&palm_regions) else {
            log::debug!("no palm found in {}x{} frame", frame.width, frame.height);
            return Ok(None);
        };
        let palm_score = selected.score;
        let (center, side, angle) = crop_from_palm(selected);

        let (input, transform) = prepare_rotated_crop(frame, center, side, angle, INPUT_SIZE)?;
        let output = engine.estimate(input)?;

        let confidence = (output.confidence * palm_score).clamp(0.0, 1.0);
        if output.confidence < self.min_confidence {
            log::debug!(
                "hand presence {:.2} below threshold {:.2}",
                output.confidence,
                self.min_confidence
            );
            return Ok(None);
        }
        log::debug!(
            "hand detected: confidence {confidence:.2}, handedness {:.2}",
            output.handedness
        );

        let points = transform.to_image_relative(&output.landmarks);
        Ok(Some(LandmarkVector::from_points(&points)?))
    }
}

impl Engine {
    fn estimate(&mut self, input: ndarray::Array4<f32>) -> Result<HandposeOutput> {
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .handpose
            .run(ort::inputs![tensor])
            .context("failed to run handpose session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("handpose model returned no outputs"));
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let landmarks = decode_landmarks(&flattened)?;

        let scalar = |idx: usize| -> f32 {
            if outputs.len() > idx {
                outputs[idx]
                    .try_extract_array::<f32>()
                    .ok()
                    .and_then(|arr| arr.iter().next().copied())
                    .unwrap_or(0.0)
            } else {
                0.0
            }
        };

        Ok(HandposeOutput {
            landmarks,
            confidence: scalar(1),
            handedness: scalar(2),
        })
    }
}
