//! Mail triage: classify incoming mail as important or junk and learn from
//! the labels the user assigns.

pub mod auth;
pub mod classifier;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod logging;
pub mod mail;
pub mod reconcile;
pub mod session;
pub mod store;
pub mod summarize;
pub mod terminal;
pub mod training;
