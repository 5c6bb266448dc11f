//! Training coordination: owns the classifier state, decides when to refit
//! it, and keeps it persisted.

pub mod bootstrap;
pub mod coordinator;
pub mod state;
pub mod worker;

pub use coordinator::{RetrainOutcome, TrainingCoordinator, TrainingOptions};
pub use state::{ClassifierState, StateOrigin, TrainingPhase};
pub use worker::RetrainWorker;
