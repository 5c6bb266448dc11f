use std::collections::VecDeque;

use crate::classifier::FeatureVector;
use crate::domain::{Fingerprint, Label};
use crate::error::LedgerError;

/// Rows fetched per round trip while iterating the ledger.
const PAGE_SIZE: usize = 256;

/// An entry about to be appended.
#[derive(Debug, Clone)]
pub struct NewExample {
    pub fingerprint: Fingerprint,
    pub label: Label,
    pub vector: FeatureVector,
    /// Subject, sender and body as classified; allows re-extraction after a
    /// vocabulary refit.
    pub source_text: Option<String>,
}

/// An entry of the ledger. `seq` grows strictly with insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub seq: u64,
    pub fingerprint: Fingerprint,
    pub label: Label,
    pub vector: FeatureVector,
    pub source_text: Option<String>,
    pub recorded_at: i64,
}

/// One decoded ledger entry, or the reason it could not be decoded.
pub type LedgerRow = Result<TrainingExample, LedgerError>;

/// Append-only ledger of labeled examples.
///
/// Entries are never updated or deleted. Readers page through the ledger by
/// sequence number, so iteration is lazy and can be restarted at will.
pub trait FeedbackLedger: Send + Sync {
    /// Append an example and return its sequence number.
    fn append(&self, example: NewExample) -> Result<u64, LedgerError>;

    /// Up to `limit` entries with `seq > after`, in insertion order.
    ///
    /// A row that cannot be decoded comes back as
    /// [`LedgerError::CorruptRow`] in its place; the outer error is reserved
    /// for failures of the read itself.
    fn page(&self, after: u64, limit: usize) -> Result<Vec<LedgerRow>, LedgerError>;

    /// Sequence number of the newest entry, 0 when empty.
    fn last_seq(&self) -> Result<u64, LedgerError>;

    fn len(&self) -> Result<usize, LedgerError>;

    fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }

    /// Lazy iterator over every entry in insertion order.
    fn all(&self) -> Examples<'_>;
}

/// Lazy, finite walk over a ledger.
pub struct Examples<'a> {
    ledger: &'a dyn FeedbackLedger,
    after: u64,
    buf: VecDeque<LedgerRow>,
    done: bool,
}

impl<'a> Examples<'a> {
    pub fn new(ledger: &'a dyn FeedbackLedger) -> Self {
        Self {
            ledger,
            after: 0,
            buf: VecDeque::new(),
            done: false,
        }
    }
}

impl Iterator for Examples<'_> {
    type Item = Result<TrainingExample, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() && !self.done {
            match self.ledger.page(self.after, PAGE_SIZE) {
                Ok(rows) => {
                    if rows.len() < PAGE_SIZE {
                        self.done = true;
                    }
                    self.buf.extend(rows);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        let next = self.buf.pop_front()?;
        // Unreadable rows still advance the cursor.
        match &next {
            Ok(ex) => self.after = ex.seq,
            Err(LedgerError::CorruptRow { seq, .. }) => self.after = *seq,
            Err(_) => {}
        }
        Some(next)
    }
}

pub(crate) fn validate(example: &NewExample) -> Result<(), LedgerError> {
    // Fingerprints can be deserialized without going through `Fingerprint::new`.
    Fingerprint::new(example.fingerprint.as_str())?;
    Ok(())
}
