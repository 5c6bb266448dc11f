//! Mailbox access.

pub mod decoders;
pub mod imap_client;

use crate::domain::{EmailId, EmailRecord};
use crate::error::CollaboratorError;

pub use imap_client::{ImapClient, ImapLogin};

/// The remote mailbox. Every call is blocking network I/O and may fail
/// softly; callers never roll back local state because of it.
pub trait Mailbox: Send + Sync {
    /// Up to `n` of the newest messages, newest first.
    fn fetch_recent(&self, n: usize) -> Result<Vec<EmailRecord>, CollaboratorError>;

    /// Attach the label (or folder) called `name` to message `id`.
    fn apply_label(&self, id: EmailId, name: &str) -> Result<(), CollaboratorError>;

    fn mark_read(&self, id: EmailId) -> Result<(), CollaboratorError>;
}
