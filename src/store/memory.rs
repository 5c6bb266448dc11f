use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::LedgerError;
use crate::store::ledger::{self, Examples, FeedbackLedger, LedgerRow, NewExample, TrainingExample};

/// Ledger kept in process memory. Used in tests and as the fallback when the
/// on-disk ledger cannot be opened.
#[derive(Default)]
pub struct MemoryLedger {
    rows: Mutex<Vec<TrainingExample>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeedbackLedger for MemoryLedger {
    fn append(&self, example: NewExample) -> Result<u64, LedgerError> {
        ledger::validate(&example)?;
        let mut rows = self.rows.lock().map_err(|_| LedgerError::Poisoned)?;
        let seq = rows.last().map(|r| r.seq).unwrap_or(0) + 1;
        rows.push(TrainingExample {
            seq,
            fingerprint: example.fingerprint,
            label: example.label,
            vector: example.vector,
            source_text: example.source_text,
            recorded_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
        });
        Ok(seq)
    }

    fn page(&self, after: u64, limit: usize) -> Result<Vec<LedgerRow>, LedgerError> {
        let rows = self.rows.lock().map_err(|_| LedgerError::Poisoned)?;
        Ok(rows
            .iter()
            .filter(|r| r.seq > after)
            .take(limit)
            .map(|r| Ok(r.clone()))
            .collect())
    }

    fn last_seq(&self) -> Result<u64, LedgerError> {
        let rows = self.rows.lock().map_err(|_| LedgerError::Poisoned)?;
        Ok(rows.last().map(|r| r.seq).unwrap_or(0))
    }

    fn len(&self) -> Result<usize, LedgerError> {
        Ok(self.rows.lock().map_err(|_| LedgerError::Poisoned)?.len())
    }

    fn all(&self) -> Examples<'_> {
        Examples::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::FeatureVector;
    use crate::domain::{Fingerprint, Label};

    fn example(fp: &str, label: Label) -> NewExample {
        NewExample {
            fingerprint: Fingerprint::new(fp).unwrap(),
            label,
            vector: FeatureVector::new(1, vec![1.0, 0.0]),
            source_text: None,
        }
    }

    #[test]
    fn all_is_restartable_and_ordered() {
        let ledger = MemoryLedger::new();
        for i in 0..600 {
            let label = if i % 2 == 0 { Label::Important } else { Label::Junk };
            ledger.append(example(&format!("f{i}"), label)).unwrap();
        }
        let first: Vec<u64> = ledger.all().map(|r| r.unwrap().seq).collect();
        let second: Vec<u64> = ledger.all().map(|r| r.unwrap().seq).collect();
        assert_eq!(first.len(), 600);
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn duplicates_are_kept() {
        let ledger = MemoryLedger::new();
        ledger.append(example("f1", Label::Important)).unwrap();
        ledger.append(example("f1", Label::Junk)).unwrap();
        assert_eq!(ledger.len().unwrap(), 2);
        assert_eq!(ledger.last_seq().unwrap(), 2);
    }
}
