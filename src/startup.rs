//! One-time construction of the shared, read-only recognition state.

use std::sync::Arc;

use anyhow::Context;

use crate::{
    classifier::{OrtLogitModel, SignClassifier},
    config::ModelConfig,
    labels::LabelVocabulary,
    model_download::{DetectorModel, ensure_detector_model_ready},
    pipeline::handpose::{HandDetector, MediapipeHandDetector},
    recognizer::Recognizer,
};

pub fn load_vocabulary(cfg: &ModelConfig) -> anyhow::Result<LabelVocabulary> {
    let vocabulary = match &cfg.labels {
        Some(path) => LabelVocabulary::from_file(path)?,
        None => LabelVocabulary::alphabet(),
    };
    log::info!(
        "label vocabulary: {} labels ({})",
        vocabulary.len(),
        cfg.labels
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in A-Z".to_string())
    );
    Ok(vocabulary)
}

pub fn load_classifier(cfg: &ModelConfig) -> anyhow::Result<SignClassifier> {
    let vocabulary = load_vocabulary(cfg)?;
    let model = OrtLogitModel::load(&cfg.classifier_model)?;
    let classifier = SignClassifier::new(Box::new(model), vocabulary).with_context(|| {
        format!(
            "classifier model {} does not fit the label vocabulary",
            cfg.classifier_model.display()
        )
    })?;
    Ok(classifier)
}

pub fn load_detector(cfg: &ModelConfig) -> anyhow::Result<MediapipeHandDetector> {
    let palm = ensure_detector_model_ready(DetectorModel::PalmDetector, &cfg.models_dir, cfg.offline)?;
    let handpose =
        ensure_detector_model_ready(DetectorModel::HandposeEstimator, &cfg.models_dir, cfg.offline)?;
    MediapipeHandDetector::new(&palm, &handpose, &cfg.detector)
}

/// Loads every model and returns the recognizer shared by all requests.
pub fn build_recognizer(cfg: &ModelConfig) -> anyhow::Result<Recognizer> {
    let classifier = load_classifier(cfg)?;
    let detector: Arc<dyn HandDetector> = Arc::new(load_detector(cfg)?);
    log::info!(
        "recognizer ready: rotate {} deg, mirror {}, top-{}",
        cfg.orientation.rotation.degrees(),
        cfg.orientation.mirror,
        cfg.top_k
    );
    let recognizer =
        Recognizer::new(detector, Arc::new(classifier), cfg.orientation, cfg.top_k)?;
    Ok(recognizer)
}
