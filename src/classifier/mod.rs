//! Text classification: TF-IDF features feeding a boosted decision-stump
//! ensemble that scores IMPORTANT against JUNK.

pub mod features;
pub mod model;
pub mod train;

pub use features::{DEFAULT_MAX_FEATURES, FeatureVector, FitOptions, Vocabulary};
pub use model::{FittedModel, Prediction, Stump, predict};
pub use train::{LabeledVector, TrainOptions, train};
