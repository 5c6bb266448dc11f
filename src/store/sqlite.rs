use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};

use crate::classifier::FeatureVector;
use crate::domain::{Fingerprint, Label};
use crate::error::LedgerError;
use crate::store::ledger::{self, Examples, FeedbackLedger, LedgerRow, NewExample, TrainingExample};

/// Feedback ledger stored in a SQLite database.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.migrate()?;
        Ok(ledger)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    fn migrate(&self) -> Result<(), LedgerError> {
        let conn = self.conn()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint   TEXT NOT NULL,
                label         TEXT NOT NULL,
                vocab_version INTEGER NOT NULL,
                dim           INTEGER NOT NULL,
                vector        TEXT NOT NULL,
                source_text   TEXT,
                recorded_at   INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS feedback_fingerprint ON feedback (fingerprint);
            "#,
        )?;
        Ok(())
    }
}

struct RawRow {
    seq: i64,
    fingerprint: String,
    label: String,
    vocab_version: i64,
    dim: i64,
    vector: String,
    source_text: Option<String>,
    recorded_at: i64,
}

impl RawRow {
    fn decode(self) -> Result<TrainingExample, LedgerError> {
        let seq = self.seq as u64;
        let corrupt = |reason: String| LedgerError::CorruptRow { seq, reason };

        let fingerprint = Fingerprint::new(self.fingerprint).map_err(|e| corrupt(e.to_string()))?;
        let label: Label = self.label.parse().map_err(|e: crate::error::ValidationError| corrupt(e.to_string()))?;
        let values: Vec<f32> =
            serde_json::from_str(&self.vector).map_err(|e| corrupt(format!("bad vector: {e}")))?;
        if values.len() as i64 != self.dim {
            return Err(corrupt(format!(
                "vector has {} entries but the row records {}",
                values.len(),
                self.dim
            )));
        }

        Ok(TrainingExample {
            seq,
            fingerprint,
            label,
            vector: FeatureVector::new(self.vocab_version as u64, values),
            source_text: self.source_text,
            recorded_at: self.recorded_at,
        })
    }
}

impl FeedbackLedger for SqliteLedger {
    fn append(&self, example: NewExample) -> Result<u64, LedgerError> {
        ledger::validate(&example)?;
        let vector = serde_json::to_string(&example.vector.values).map_err(|e| LedgerError::CorruptRow {
            seq: 0,
            reason: format!("vector not encodable: {e}"),
        })?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO feedback (fingerprint, label, vocab_version, dim, vector, source_text, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                example.fingerprint.as_str(),
                example.label.as_str(),
                example.vector.vocab_version as i64,
                example.vector.dim() as i64,
                vector,
                example.source_text,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    fn page(&self, after: u64, limit: usize) -> Result<Vec<LedgerRow>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT seq, fingerprint, label, vocab_version, dim, vector, source_text, recorded_at
            FROM feedback
            WHERE seq > ?1
            ORDER BY seq ASC
            LIMIT ?2
            "#,
        )?;

        let mut rows = stmt.query(params![after as i64, limit as i64])?;
        let mut out = Vec::new();

        while let Some(r) = rows.next()? {
            let raw = RawRow {
                seq: r.get(0)?,
                fingerprint: r.get(1)?,
                label: r.get(2)?,
                vocab_version: r.get(3)?,
                dim: r.get(4)?,
                vector: r.get(5)?,
                source_text: r.get(6)?,
                recorded_at: r.get(7)?,
            };
            out.push(raw.decode());
        }
        Ok(out)
    }

    fn last_seq(&self) -> Result<u64, LedgerError> {
        let conn = self.conn()?;
        let seq: Option<i64> = conn
            .query_row("SELECT MAX(seq) FROM feedback", [], |r| r.get(0))
            .optional()?
            .flatten();
        Ok(seq.unwrap_or(0) as u64)
    }

    fn len(&self) -> Result<usize, LedgerError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM feedback", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    fn all(&self) -> Examples<'_> {
        Examples::new(self)
    }
}
