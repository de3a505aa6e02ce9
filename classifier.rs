use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::models::RawLabel;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

/// A loaded image classifier. Implementations need not be reentrant; the
/// inference slot only ever calls one at a time.
pub trait Classifier: Send {
    fn classify(&mut self, input: &Array4<f32>) -> Result<ProbabilityVector>;
}

/// Numeric faults raised while reading model output.
#[derive(Debug, Error)]
pub enum InferenceFault {
    #[error("model returned an empty score vector")]
    Empty,
    #[error("score {value} at class {index} is not finite")]
    NonFinite { index: usize, value: f32 },
    #[error("expected {expected} scores, model returned {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("model panicked: {0}")]
    Panicked(String),
}

/// Ranked scores, one per class index.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityVector {
    scores: Vec<f32>,
}

impl ProbabilityVector {
    pub fn new(scores: Vec<f32>) -> Result<Self> {
        if scores.is_empty() {
            return Err(Error::inference("unusable model output", InferenceFault::Empty));
        }
        if let Some((index, &value)) = scores.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(Error::inference(
                "unusable model output",
                InferenceFault::NonFinite { index, value },
            ));
        }
        Ok(Self { scores })
    }

    /// Class indices by descending score; ties keep the lower index first.
    pub fn ranked_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.scores.len()).collect();
        // scores are finite here; -0.0 and 0.0 must compare equal
        indices.sort_by(|&a, &b| {
            self.scores[b]
                .partial_cmp(&self.scores[a])
                .unwrap_or(Ordering::Equal)
        });
        indices
    }

    /// Primary and runner-up. `second` is `None` only for a single-class model.
    pub fn top_two(&self) -> ((usize, f32), Option<(usize, f32)>) {
        let ranked = self.ranked_indices();
        let primary = ranked[0];
        let second = ranked.get(1).map(|&idx| (idx, self.scores[idx]));
        ((primary, self.scores[primary]), second)
    }

    pub fn softmax(&self) -> Self {
        let max = self
            .scores
            .iter()
            .fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let exps: Vec<f32> = self.scores.iter().map(|v| (v - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        Self {
            scores: exps.into_iter().map(|v| v / sum).collect(),
        }
    }
}

/// One ranked class with the label the resolver will consume.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub index: usize,
    pub score: f32,
    pub label: RawLabel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub primary: Candidate,
    pub second: Option<Candidate>,
}

/// Class names the model was trained with, by index.
#[derive(Debug, Clone, Default)]
pub struct LabelSpace {
    names: Vec<String>,
}

impl LabelSpace {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Reads `{"class_names": [...]}`. A missing file yields an empty space, in
    /// which every index maps to its `Class_<n>` token.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::warn!(
                "Label metadata not found at {}; using synthetic class tokens",
                path.display()
            );
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let meta: serde_json::Value = serde_json::from_str(&raw)?;
        let names = meta
            .get("class_names")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| item.as_str().unwrap_or_default().to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        log::info!("Loaded {} class names from {}", names.len(), path.display());
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn raw_label(&self, index: usize) -> RawLabel {
        match self.names.get(index).filter(|name| !name.trim().is_empty()) {
            Some(name) => RawLabel::parse(name),
            None => RawLabel::SyntheticToken(index as u32),
        }
    }

    pub fn rank(&self, scores: &ProbabilityVector) -> Ranking {
        let ((primary_idx, primary_score), second) = scores.top_two();
        Ranking {
            primary: Candidate {
                index: primary_idx,
                score: primary_score,
                label: self.raw_label(primary_idx),
            },
            second: second.map(|(index, score)| Candidate {
                index,
                score,
                label: self.raw_label(index),
            }),
        }
    }
}

/// ONNX Runtime backed classifier.
pub struct OnnxClassifier {
    session: Session,
    apply_softmax: bool,
    expected_classes: Option<usize>,
}

impl OnnxClassifier {
    pub fn load(model_path: &Path, config: &ModelConfig, labels: &LabelSpace) -> Result<Self> {
        if !model_path.exists() {
            return Err(Error::ModelUnavailable(format!(
                "Model not found: {}",
                model_path.display()
            )));
        }
        let _ = ort::init().with_name("plant-doctor").commit();
        let session = Session::builder()
            .map_err(|e| Error::ModelUnavailable(format!("{e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level1)
            .map_err(|e| Error::ModelUnavailable(format!("{e}")))?
            .with_intra_threads(4)
            .map_err(|e| Error::ModelUnavailable(format!("{e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                Error::ModelUnavailable(format!(
                    "Failed to load ONNX model {}: {e}",
                    model_path.display()
                ))
            })?;
        log::info!("Loaded classifier: {}", model_path.display());
        Ok(Self {
            session,
            apply_softmax: config.apply_softmax,
            expected_classes: (!labels.is_empty()).then_some(labels.len()),
        })
    }
}

impl Classifier for OnnxClassifier {
    fn classify(&mut self, input: &Array4<f32>) -> Result<ProbabilityVector> {
        let tensor = Tensor::from_array(input.clone())
            .map_err(|e| Error::inference("Failed to create input tensor", e))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| Error::inference("Model run failed", e))?;
        let output = outputs.values().next().ok_or_else(|| {
            Error::inference("unusable model output", InferenceFault::Empty)
        })?;
        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::inference("Failed to extract output tensor", e))?;
        let scores: Vec<f32> = data.to_vec();
        if let Some(expected) = self.expected_classes {
            if scores.len() != expected {
                return Err(Error::inference(
                    "unusable model output",
                    InferenceFault::LengthMismatch {
                        expected,
                        actual: scores.len(),
                    },
                ));
            }
        }
        let vector = ProbabilityVector::new(scores)?;
        Ok(if self.apply_softmax {
            vector.softmax()
        } else {
            vector
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_two_takes_highest_scores() {
        let v = ProbabilityVector::new(vec![0.1, 0.6, 0.05, 0.25]).unwrap();
        let ((p, ps), second) = v.top_two();
        assert_eq!((p, ps), (1, 0.6));
        assert_eq!(second, Some((3, 0.25)));
    }

    #[test]
    fn ties_resolve_to_lower_index() {
        let v = ProbabilityVector::new(vec![0.2, 0.4, 0.4, 0.0]).unwrap();
        assert_eq!(v.ranked_indices(), vec![1, 2, 0, 3]);
        let ((p, _), second) = v.top_two();
        assert_eq!(p, 1);
        assert_eq!(second.map(|s| s.0), Some(2));

        let flat = ProbabilityVector::new(vec![0.25; 4]).unwrap();
        assert_eq!(flat.ranked_indices(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn signed_zeros_tie_to_lower_index() {
        let v = ProbabilityVector::new(vec![-0.0, 0.0, -1.0]).unwrap();
        assert_eq!(v.top_two(), ((0, -0.0), Some((1, 0.0))));
        let v = ProbabilityVector::new(vec![0.0, -0.0]).unwrap();
        assert_eq!(v.ranked_indices(), vec![0, 1]);
    }

    #[test]
    fn second_guess_never_equals_primary() {
        let vectors = [
            vec![1.0, 1.0],
            vec![0.0, 0.0, 0.0],
            vec![0.3, 0.1, 0.9, 0.9, 0.2],
            vec![-1.0, -0.5, -2.0],
        ];
        for scores in vectors {
            let v = ProbabilityVector::new(scores).unwrap();
            let ((p, _), second) = v.top_two();
            let (s, _) = second.unwrap();
            assert_ne!(p, s);
            assert_eq!(s, v.ranked_indices()[1]);
        }
    }

    #[test]
    fn single_class_has_no_second_guess() {
        let v = ProbabilityVector::new(vec![0.7]).unwrap();
        assert_eq!(v.top_two(), ((0, 0.7), None));
    }

    #[test]
    fn non_finite_scores_are_rejected_with_cause() {
        use std::error::Error as _;
        let err = ProbabilityVector::new(vec![0.1, f32::NAN]).unwrap_err();
        assert!(matches!(err, Error::Inference { .. }));
        assert!(err.source().unwrap().to_string().contains("class 1"));
        assert!(ProbabilityVector::new(vec![]).is_err());
        assert!(ProbabilityVector::new(vec![f32::INFINITY]).is_err());
    }

    #[test]
    fn softmax_sums_to_one_and_keeps_order() {
        let v = ProbabilityVector::new(vec![1.0, 3.0, 2.0]).unwrap().softmax();
        let sum: f32 = v.scores.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(v.ranked_indices(), vec![1, 2, 0]);
    }

    #[test]
    fn label_space_maps_names_and_synthetic_tokens() {
        let labels = LabelSpace::new(vec!["Apple scab".into(), "7".into(), "".into()]);
        assert_eq!(labels.raw_label(0), RawLabel::TextLabel("Apple scab".into()));
        assert_eq!(labels.raw_label(1), RawLabel::NumericIndex(7));
        assert_eq!(labels.raw_label(2), RawLabel::SyntheticToken(2));
        assert_eq!(labels.raw_label(38), RawLabel::SyntheticToken(38));
    }

    #[test]
    fn rank_builds_candidates() {
        let labels = LabelSpace::default();
        let v = ProbabilityVector::new(vec![0.1, 0.2, 0.7]).unwrap();
        let ranking = labels.rank(&v);
        assert_eq!(ranking.primary.label, RawLabel::SyntheticToken(2));
        assert_eq!(ranking.second.unwrap().label, RawLabel::SyntheticToken(1));
    }

    #[test]
    fn label_metadata_loads_class_names() {
        let path = std::env::temp_dir().join(format!("pd_meta_{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"class_names": ["Apple scab", "Apple healthy"]}"#).unwrap();
        let labels = LabelSpace::load(&path).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.raw_label(1), RawLabel::TextLabel("Apple healthy".into()));

        let missing = LabelSpace::load(&path.with_extension("missing")).unwrap();
        assert_eq!(missing.len(), 0);
    }

    #[test]
    fn missing_model_is_unavailable() {
        let err = OnnxClassifier::load(
            Path::new("/nonexistent/model.onnx"),
            &ModelConfig::default(),
            &LabelSpace::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::ModelUnavailable(_)));
    }
}
