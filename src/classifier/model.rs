use serde::{Deserialize, Serialize};

use crate::classifier::features::FeatureVector;
use crate::domain::Label;
use crate::error::ValidationError;

/// Single-split decision tree used as a weak learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stump {
    /// Feature index used for the split.
    pub feature_index: u32,
    /// Threshold in feature units.
    pub threshold: f32,
    /// Contribution for `feature <= threshold`.
    pub left_value: f32,
    /// Contribution for `feature > threshold`.
    pub right_value: f32,
}

impl Stump {
    pub fn predict(&self, features: &[f32]) -> f32 {
        let value = features
            .get(self.feature_index as usize)
            .copied()
            .unwrap_or(0.0);
        if value <= self.threshold {
            self.left_value
        } else {
            self.right_value
        }
    }
}

/// Boosted decision-stump ensemble scoring the log-odds of IMPORTANT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    /// Vocabulary version the model was trained against.
    pub vocab_version: u64,
    /// Number of features per input vector.
    pub feature_len: usize,
    pub learning_rate: f32,
    /// Raw score before any stump is applied.
    pub init_raw: f32,
    pub stumps: Vec<Stump>,
}

/// Label plus the probabilities behind it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: Label,
    /// Probability of the predicted label (max-class probability).
    pub confidence: f32,
    pub p_important: f32,
}

impl Prediction {
    /// Resolve a probability of IMPORTANT into a label.
    ///
    /// Exactly 0.5 resolves to JUNK: a borderline email is never promoted.
    pub fn from_probability(p_important: f32) -> Self {
        let p_important = if p_important.is_finite() {
            p_important.clamp(0.0, 1.0)
        } else {
            0.5
        };
        let label = if p_important > 0.5 {
            Label::Important
        } else {
            Label::Junk
        };
        Self {
            label,
            confidence: p_important.max(1.0 - p_important),
            p_important,
        }
    }
}

impl FittedModel {
    pub fn validate(&self) -> Result<(), String> {
        if !self.init_raw.is_finite() || !self.learning_rate.is_finite() {
            return Err("model has non-finite parameters".to_string());
        }
        for (i, stump) in self.stumps.iter().enumerate() {
            if stump.feature_index as usize >= self.feature_len {
                return Err(format!(
                    "stump {i} splits on feature {} but the model has {} features",
                    stump.feature_index, self.feature_len
                ));
            }
            if !(stump.threshold.is_finite()
                && stump.left_value.is_finite()
                && stump.right_value.is_finite())
            {
                return Err(format!("stump {i} has non-finite parameters"));
            }
        }
        Ok(())
    }

    pub fn predict_raw(&self, features: &[f32]) -> f32 {
        self.stumps.iter().fold(self.init_raw, |raw, stump| {
            raw + self.learning_rate * stump.predict(features)
        })
    }

    pub fn predict_proba(&self, features: &[f32]) -> f32 {
        sigmoid(self.predict_raw(features))
    }

    /// Classify raw feature values. Pure, callable from any thread.
    pub fn predict_values(&self, features: &[f32]) -> Prediction {
        Prediction::from_probability(self.predict_proba(features))
    }
}

/// Classify a vector, rejecting one built from a different vocabulary.
pub fn predict(vector: &FeatureVector, model: &FittedModel) -> Result<Prediction, ValidationError> {
    if vector.vocab_version != model.vocab_version {
        return Err(ValidationError::VocabularyMismatch {
            expected: model.vocab_version,
            actual: vector.vocab_version,
        });
    }
    if vector.dim() != model.feature_len {
        return Err(ValidationError::DimensionMismatch {
            expected: model.feature_len,
            actual: vector.dim(),
        });
    }
    Ok(model.predict_values(&vector.values))
}

pub fn sigmoid(raw: f32) -> f32 {
    if raw >= 0.0 {
        1.0 / (1.0 + (-raw).exp())
    } else {
        let e = raw.exp();
        e / (1.0 + e)
    }
}
