use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Mailbox-assigned id (IMAP UID).
pub type EmailId = u32;

/// One message as fetched from the mailbox. Never mutated after fetch.
#[derive(Debug, Clone)]
pub struct EmailRecord {
    pub id: EmailId,
    pub message_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub date_epoch: i64,
}

impl EmailRecord {
    /// Text fed to the feature extractor: subject, sender, then body.
    pub fn classification_text(&self) -> String {
        format!("{} {} {}", self.subject, self.sender, self.body)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        match self.message_id.as_deref().map(str::trim) {
            Some(mid) if !mid.is_empty() => Fingerprint(mid.to_string()),
            _ => Fingerprint(format!("uid:{}", self.id)),
        }
    }
}

/// Stable identifier correlating feedback with its source email.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::EmptyFingerprint);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
