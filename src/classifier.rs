use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::Context;
use ndarray::Array2;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::{Tensor, ValueType},
};

use crate::{
    error::{ClassifyError, ConfigError, InferenceError},
    labels::LabelVocabulary,
    landmarks::{LANDMARK_VALUES, LandmarkVector},
    types::{Classification, Prediction},
};

/// Anything that maps a 63-value landmark vector to one raw score per label.
pub trait LogitModel: Send + Sync {
    fn logits(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError>;

    /// Number of scores the model produces. The default runs the model once on
    /// an all-zero vector.
    fn output_width(&self) -> Result<usize, InferenceError> {
        self.logits(&[0.0; LANDMARK_VALUES]).map(|scores| scores.len())
    }
}

/// ONNX model taking a `(1, 63)` float tensor and returning logits as its first output.
pub struct OrtLogitModel {
    session: Mutex<Session>,
    path: PathBuf,
}

impl OrtLogitModel {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let session = build_session(path).map_err(|err| ConfigError::Model {
            path: path.to_path_buf(),
            message: format!("{err:#}"),
        })?;
        log::info!("loaded sign classifier model from {}", path.display());

        Ok(Self {
            session: Mutex::new(session),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn declared_output_width(&self) -> Result<Option<usize>, InferenceError> {
        let session = self.session.lock().map_err(|_| InferenceError::Poisoned)?;
        let Some(output) = session.outputs.first() else {
            return Err(InferenceError::NoOutput);
        };
        let width = match &output.output_type {
            ValueType::Tensor { shape, .. } => shape
                .last()
                .copied()
                .filter(|dim| *dim > 0)
                .map(|dim| dim as usize),
            _ => None,
        };
        Ok(width)
    }
}

fn build_session(path: &Path) -> anyhow::Result<Session> {
    if !path.exists() {
        anyhow::bail!("model file does not exist");
    }
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(1)?
        .commit_from_file(path)
        .with_context(|| format!("failed to load ORT session from {}", path.display()))?;
    Ok(session)
}

impl LogitModel for OrtLogitModel {
    fn logits(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
        if features.len() != LANDMARK_VALUES {
            return Err(InferenceError::InputWidth {
                expected: LANDMARK_VALUES,
                actual: features.len(),
            });
        }

        let input = Array2::from_shape_vec((1, LANDMARK_VALUES), features.to_vec())
            .map_err(|err| InferenceError::Backend(err.to_string()))?;
        let tensor =
            Tensor::from_array(input).map_err(|err| InferenceError::Backend(err.to_string()))?;

        let mut session = self.session.lock().map_err(|_| InferenceError::Poisoned)?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|err| InferenceError::Backend(err.to_string()))?;

        if outputs.len() < 1 {
            return Err(InferenceError::NoOutput);
        }

        let logits = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|err| InferenceError::Backend(err.to_string()))?;
        Ok(logits.iter().copied().collect())
    }

    fn output_width(&self) -> Result<usize, InferenceError> {
        match self.declared_output_width()? {
            Some(width) => Ok(width),
            None => self
                .logits(&[0.0; LANDMARK_VALUES])
                .map(|scores| scores.len()),
        }
    }
}

/// Turns normalized landmark vectors into label predictions.
///
/// The model and vocabulary are fixed at construction; every method takes
/// `&self`, so one instance can be shared across request threads.
pub struct SignClassifier {
    model: Box<dyn LogitModel>,
    labels: LabelVocabulary,
}

impl SignClassifier {
    /// Fails when the model's output width does not match the vocabulary size.
    pub fn new(model: Box<dyn LogitModel>, labels: LabelVocabulary) -> Result<Self, ConfigError> {
        let outputs = model.output_width()?;
        if outputs != labels.len() {
            return Err(ConfigError::VocabularyMismatch {
                labels: labels.len(),
                outputs,
            });
        }
        log::info!("sign classifier ready with {} labels", labels.len());

        Ok(Self { model, labels })
    }

    pub fn labels(&self) -> &LabelVocabulary {
        &self.labels
    }

    /// Softmax distribution over the vocabulary, in label index order.
    pub fn probabilities(&self, normalized: &[f32]) -> Result<Vec<f32>, ClassifyError> {
        let input = LandmarkVector::from_slice(normalized)?;
        let logits = self.model.logits(input.as_slice())?;

        if logits.len() != self.labels.len() {
            return Err(InferenceError::OutputWidth {
                expected: self.labels.len(),
                actual: logits.len(),
            }
            .into());
        }
        if let Some(index) = logits.iter().position(|v| !v.is_finite()) {
            return Err(InferenceError::NonFinite { index }.into());
        }

        Ok(softmax(&logits))
    }

    pub fn predict(&self, normalized: &[f32]) -> Result<Prediction, ClassifyError> {
        let probabilities = self.probabilities(normalized)?;
        let best = argmax(&probabilities).unwrap_or(0);
        Ok(self.prediction(best, &probabilities))
    }

    pub fn predict_top_k(
        &self,
        normalized: &[f32],
        k: usize,
    ) -> Result<Vec<Prediction>, ClassifyError> {
        if k == 0 {
            return Err(ClassifyError::InvalidTopK(k));
        }
        let probabilities = self.probabilities(normalized)?;
        Ok(self.top_k(&probabilities, k))
    }

    /// `predict` and `predict_top_k` from a single model run.
    pub fn classify(
        &self,
        normalized: &[f32],
        k: usize,
    ) -> Result<Classification, ClassifyError> {
        if k == 0 {
            return Err(ClassifyError::InvalidTopK(k));
        }
        let probabilities = self.probabilities(normalized)?;
        let best = argmax(&probabilities).unwrap_or(0);

        Ok(Classification {
            best: self.prediction(best, &probabilities),
            top: self.top_k(&probabilities, k),
        })
    }

    fn top_k(&self, probabilities: &[f32], k: usize) -> Vec<Prediction> {
        rank(probabilities)
            .into_iter()
            .take(k)
            .map(|idx| self.prediction(idx, probabilities))
            .collect()
    }

    fn prediction(&self, index: usize, probabilities: &[f32]) -> Prediction {
        Prediction {
            label: self.labels.get(index).unwrap_or_default().to_string(),
            confidence: probabilities[index],
        }
    }
}

/// Numerically stable softmax: the maximum is subtracted before exponentiating.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Indices sorted by descending value; equal values keep ascending index order.
pub fn rank(values: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| values[*b].total_cmp(&values[*a]));
    order
}

/// First index holding the maximum value.
fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (idx, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((idx, v)),
        })
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::normalize;

    struct FixedLogits(Vec<f32>);

    impl LogitModel for FixedLogits {
        fn logits(&self, _features: &[f32]) -> Result<Vec<f32>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    /// Scores each label by the dot product of the input with a per-label weight row.
    struct LinearModel {
        weights: Vec<Vec<f32>>,
    }

    impl LogitModel for LinearModel {
        fn logits(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
            Ok(self
                .weights
                .iter()
                .map(|row| row.iter().zip(features).map(|(w, x)| w * x).sum::<f32>())
                .collect())
        }
    }

    struct Broken;

    impl LogitModel for Broken {
        fn logits(&self, _features: &[f32]) -> Result<Vec<f32>, InferenceError> {
            Err(InferenceError::Backend("device lost".into()))
        }

        fn output_width(&self) -> Result<usize, InferenceError> {
            Ok(3)
        }
    }

    fn abc() -> LabelVocabulary {
        LabelVocabulary::new(vec!["A".into(), "B".into(), "C".into()]).unwrap()
    }

    fn fixed(logits: &[f32]) -> SignClassifier {
        SignClassifier::new(Box::new(FixedLogits(logits.to_vec())), abc()).unwrap()
    }

    fn input() -> Vec<f32> {
        let raw: Vec<f32> = (0..LANDMARK_VALUES).map(|i| (i as f32 * 0.37).sin()).collect();
        normalize(&raw).unwrap().as_slice().to_vec()
    }

    #[test]
    fn softmax_matches_reference_values() {
        let probs = softmax(&[2.0, 1.0, 0.1]);
        assert!((probs[0] - 0.659).abs() < 1e-3);
        assert!((probs[1] - 0.242).abs() < 1e-3);
        assert!((probs[2] - 0.099).abs() < 1e-3);
    }

    #[test]
    fn softmax_is_a_distribution_even_for_huge_logits() {
        for logits in [
            vec![1000.0, 999.0, -1000.0],
            vec![-50.0, -50.0, -50.0, -50.0],
            vec![0.0],
            vec![3.5, -2.25, 7.0, 0.0, 1e-3],
        ] {
            let probs = softmax(&logits);
            let sum: f32 = probs.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "sum {sum} for {logits:?}");
            assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn predicts_reference_scenario() {
        let classifier = fixed(&[2.0, 1.0, 0.1]);

        let best = classifier.predict(&input()).unwrap();
        assert_eq!(best.label, "A");
        assert!((best.confidence - 0.659).abs() < 1e-3);

        let top = classifier.predict_top_k(&input(), 2).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].label, "A");
        assert_eq!(top[1].label, "B");
        assert!((top[1].confidence - 0.242).abs() < 1e-3);
    }

    #[test]
    fn top_k_is_clamped_and_sorted() {
        let classifier = fixed(&[0.5, 3.0, -1.0]);
        let all = classifier.predict_top_k(&input(), 10).unwrap();
        let labels: Vec<&str> = all.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["B", "A", "C"]);
        assert!(all.windows(2).all(|w| w[0].confidence >= w[1].confidence));

        let best = classifier.predict(&input()).unwrap();
        assert_eq!(best, all[0]);
    }

    #[test]
    fn ties_rank_by_lower_index() {
        let classifier = fixed(&[1.0, 2.0, 2.0]);
        let top = classifier.predict_top_k(&input(), 3).unwrap();
        let labels: Vec<&str> = top.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["B", "C", "A"]);
        assert_eq!(classifier.predict(&input()).unwrap().label, "B");
    }

    #[test]
    fn classify_agrees_with_separate_calls() {
        let vocab = LabelVocabulary::alphabet();
        let weights = (0..vocab.len())
            .map(|row| {
                (0..LANDMARK_VALUES)
                    .map(|col| ((row * 7 + col * 3) % 11) as f32 * 0.1 - 0.5)
                    .collect()
            })
            .collect();
        let classifier = SignClassifier::new(Box::new(LinearModel { weights }), vocab).unwrap();

        let x = input();
        let combined = classifier.classify(&x, 5).unwrap();
        assert_eq!(combined.best, classifier.predict(&x).unwrap());
        assert_eq!(combined.top, classifier.predict_top_k(&x, 5).unwrap());

        let full = classifier.predict_top_k(&x, 26).unwrap();
        assert_eq!(full.len(), 26);
        assert_eq!(full[0].confidence, combined.best.confidence);
        let sum: f32 = full.iter().map(|p| p.confidence).sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn rejects_zero_k() {
        let classifier = fixed(&[2.0, 1.0, 0.1]);
        assert!(matches!(
            classifier.predict_top_k(&input(), 0),
            Err(ClassifyError::InvalidTopK(0))
        ));
        assert!(matches!(
            classifier.classify(&input(), 0),
            Err(ClassifyError::InvalidTopK(0))
        ));
    }

    #[test]
    fn rejects_wrong_input_width() {
        let classifier = fixed(&[2.0, 1.0, 0.1]);
        let err = classifier.predict(&[0.0; 42]).unwrap_err();
        assert!(matches!(err, ClassifyError::Landmarks(_)));
        assert!(err.to_string().contains("got 42"));
    }

    #[test]
    fn vocabulary_mismatch_fails_at_construction() {
        let err = SignClassifier::new(Box::new(FixedLogits(vec![0.0; 4])), abc())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ConfigError::VocabularyMismatch {
                labels: 3,
                outputs: 4
            }
        ));
    }

    #[test]
    fn backend_failure_is_an_inference_error() {
        let classifier = SignClassifier::new(Box::new(Broken), abc()).unwrap();
        let err = classifier.predict(&input()).unwrap_err();
        assert!(matches!(
            err,
            ClassifyError::Inference(InferenceError::Backend(_))
        ));
    }

    #[test]
    fn non_finite_logits_are_rejected() {
        let classifier = fixed(&[1.0, f32::NAN, 0.0]);
        assert!(matches!(
            classifier.predict(&input()),
            Err(ClassifyError::Inference(InferenceError::NonFinite { index: 1 }))
        ));
    }

    #[test]
    fn rank_orders_descending() {
        assert_eq!(rank(&[0.1, 0.7, 0.2]), vec![1, 2, 0]);
        assert_eq!(rank(&[]), Vec::<usize>::new());
        assert_eq!(argmax(&[0.3, 0.3, 0.1]), Some(0));
        assert_eq!(argmax(&[]), None);
    }
}
