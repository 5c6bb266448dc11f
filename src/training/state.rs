use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classifier::{FittedModel, Prediction, Vocabulary};

/// Lifecycle of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    /// No usable persisted state was found. Only passed through inside
    /// `TrainingCoordinator::start`, which always leaves it for a fitted
    /// phase; it appears in logs, never from `phase()`.
    Cold,
    /// Serving a model fitted on the built-in synthetic examples.
    Bootstrapped,
    /// Serving a model fitted on the current ledger.
    Ready,
    /// Feedback arrived since the last fit; the previous fit still serves.
    Stale,
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrainingPhase::Cold => "cold",
            TrainingPhase::Bootstrapped => "bootstrapped",
            TrainingPhase::Ready => "ready",
            TrainingPhase::Stale => "stale",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateOrigin {
    Bootstrap { table_version: u32 },
    Feedback { examples: usize },
}

/// Everything needed to classify: vocabulary plus fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierState {
    /// Bumped by every successful fit.
    pub version: u64,
    pub vocabulary: Vocabulary,
    pub model: FittedModel,
    /// Highest ledger sequence number covered by this fit.
    pub trained_through: u64,
    pub origin: StateOrigin,
}

impl ClassifierState {
    pub fn classify_text(&self, text: &str) -> Prediction {
        let vector = self.vocabulary.transform(text);
        self.model.predict_values(&vector.values)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.vocabulary.validate()?;
        self.model.validate()?;
        if self.model.vocab_version != self.vocabulary.version {
            return Err(format!(
                "model was trained on vocabulary v{} but the state carries v{}",
                self.model.vocab_version, self.vocabulary.version
            ));
        }
        if self.model.feature_len != self.vocabulary.len() {
            return Err(format!(
                "model expects {} features but the vocabulary has {}",
                self.model.feature_len,
                self.vocabulary.len()
            ));
        }
        Ok(())
    }
}
