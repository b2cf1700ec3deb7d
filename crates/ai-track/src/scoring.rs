//! Fixed linear classifier used by `/predict`.
//!
//! `score = sigmoid(dot(features, w) + b)` where the dot product runs over the
//! shorter of the two vectors. Extra features or extra weights are ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

/// Pre-trained weights, loaded once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WeightModel {
    #[serde(default)]
    w: Vec<f64>,
    #[serde(default)]
    b: f64,
}

impl WeightModel {
    pub fn new(w: Vec<f64>, b: f64) -> Result<Self, ModelError> {
        Self { w, b }.validated()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|err| match err {
            ModelError::Parse { source, .. } => ModelError::Parse {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        let model: WeightModel =
            serde_json::from_str(raw).map_err(|source| ModelError::Parse { path: None, source })?;
        model.validated()
    }

    fn validated(self) -> Result<Self, ModelError> {
        if let Some(index) = self.w.iter().position(|weight| !weight.is_finite()) {
            return Err(ModelError::NonFinite(format!("w[{index}]")));
        }
        if !self.b.is_finite() {
            return Err(ModelError::NonFinite("b".to_string()));
        }
        Ok(self)
    }

    pub fn weights(&self) -> &[f64] {
        &self.w
    }

    pub fn bias(&self) -> f64 {
        self.b
    }

    /// Probability in the open interval (0, 1). Pure and deterministic.
    pub fn score(&self, features: &[f64]) -> f64 {
        let z = dot(features, &self.w) + self.b;
        // f64 saturates to exactly 0 or 1 for large magnitudes
        sigmoid(z).clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON)
    }
}

/// Dot product over the shorter vector. Each term saturates at `±f64::MAX`,
/// so opposite overflows cancel instead of producing NaN. NaN terms are dropped.
pub fn dot(features: &[f64], weights: &[f64]) -> f64 {
    features
        .iter()
        .zip(weights)
        .map(|(feature, weight)| (feature * weight).clamp(f64::MIN, f64::MAX))
        .fold(0.0, |sum, term| {
            let next = sum + term;
            if next.is_nan() {
                sum
            } else {
                next
            }
        })
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Accepts a JSON array whose elements are all numbers.
pub fn features_from_value(value: &Value) -> Result<Vec<f64>, ScoringError> {
    let items = value.as_array().ok_or(ScoringError::NotASequence)?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| item.as_f64().ok_or(ScoringError::NotANumber { index }))
        .collect()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScoringError {
    #[error("features must be an array of numbers")]
    NotASequence,
    #[error("features[{index}] is not a number")]
    NotANumber { index: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unable to read weight model {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed weight model: {source}")]
    Parse {
        path: Option<PathBuf>,
        source: serde_json::Error,
    },
    #[error("weight model value {0} is not finite")]
    NonFinite(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model(w: &[f64], b: f64) -> WeightModel {
        WeightModel::new(w.to_vec(), b).expect("valid model")
    }

    #[test]
    fn empty_features_score_to_sigmoid_of_bias() {
        let scorer = model(&[3.0, -1.0, 7.5], 0.4);
        assert_eq!(scorer.score(&[]), sigmoid(0.4));
    }

    #[test]
    fn trailing_features_are_ignored() {
        let scorer = model(&[0.5, 0.5], 0.0);
        assert_eq!(scorer.score(&[1.0, 2.0, 3.0]), scorer.score(&[1.0, 2.0]));
    }

    #[test]
    fn trailing_weights_are_ignored() {
        let long = model(&[0.5, 0.5, 9.0], 0.1);
        let short = model(&[0.5, 0.5], 0.1);
        assert_eq!(long.score(&[1.0, 2.0]), short.score(&[1.0, 2.0]));
    }

    #[test]
    fn score_stays_strictly_inside_unit_interval() {
        let scorer = model(&[1.0], 0.0);
        for feature in [-1.0e6, -50.0, -1.0, 0.0, 1.0, 50.0, 1.0e6] {
            let score = scorer.score(&[feature]);
            assert!(score > 0.0 && score < 1.0, "score {score} for {feature}");
            assert_eq!(score, scorer.score(&[feature]));
        }
    }

    #[test]
    fn opposite_overflows_do_not_produce_nan() {
        let scorer = model(&[2.0, 2.0], 0.0);
        let score = scorer.score(&[1e308, -1e308]);
        assert!(score > 0.0 && score < 1.0, "score {score}");
        assert_eq!(score, 0.5);

        let lopsided = model(&[2.0, 2.0, 2.0], 0.0);
        let score = lopsided.score(&[1e308, 1e308, -1e308]);
        assert!(score > 0.0 && score < 1.0, "score {score}");
    }

    #[test]
    fn nan_features_still_score_inside_unit_interval() {
        let scorer = model(&[1.0], 0.3);
        let score = scorer.score(&[f64::NAN]);
        assert!(score > 0.0 && score < 1.0, "score {score}");
    }

    #[test]
    fn matches_hand_computed_probability() {
        let scorer = model(&[0.25, -0.5], 0.1);
        let expected = 1.0 / (1.0 + (-(0.25 * 2.0 - 0.5 * 1.0 + 0.1_f64)).exp());
        assert!((scorer.score(&[2.0, 1.0]) - expected).abs() < 1e-12);
    }

    #[test]
    fn features_must_be_an_array_of_numbers() {
        assert_eq!(
            features_from_value(&json!([1, 2.5, -3])),
            Ok(vec![1.0, 2.5, -3.0])
        );
        assert_eq!(features_from_value(&json!([])), Ok(Vec::new()));
        for value in [json!(null), json!("1,2"), json!(3), json!({"0": 1}), json!(true)] {
            assert_eq!(
                features_from_value(&value),
                Err(ScoringError::NotASequence),
                "{value}"
            );
        }
        assert_eq!(
            features_from_value(&json!([1, "2"])),
            Err(ScoringError::NotANumber { index: 1 })
        );
    }

    #[test]
    fn missing_fields_default_like_an_untrained_model() {
        let scorer = WeightModel::from_json("{}").expect("empty object is a model");
        assert!(scorer.weights().is_empty());
        assert_eq!(scorer.bias(), 0.0);
        assert_eq!(scorer.score(&[4.0]), 0.5);
    }

    #[test]
    fn malformed_models_are_rejected() {
        assert!(matches!(
            WeightModel::from_json(r#"{"w": "nope", "b": 0}"#),
            Err(ModelError::Parse { .. })
        ));
        assert!(matches!(
            WeightModel::from_json("not json"),
            Err(ModelError::Parse { .. })
        ));
        assert!(matches!(
            WeightModel::new(vec![f64::NAN], 0.0),
            Err(ModelError::NonFinite(_))
        ));
    }
}
