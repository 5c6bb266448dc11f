//! Durable storage: the feedback ledger and the persisted classifier state.

pub mod ledger;
pub mod memory;
pub mod sqlite;
pub mod state_file;

pub use ledger::{Examples, FeedbackLedger, LedgerRow, NewExample, TrainingExample};
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;
pub use state_file::{JsonStateStore, StateStore};
