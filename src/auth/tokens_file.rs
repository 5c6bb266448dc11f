use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Short-lived access token cached between runs. The refresh token never
/// lands here; it lives in the keyring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    pub user_email: String,
    pub access_token: String,
    /// Epoch seconds.
    pub expires_at_epoch: i64,
}

impl CachedToken {
    /// Valid for `user_email` at `now`, with a minute of slack.
    pub fn usable(&self, user_email: &str, now: i64) -> bool {
        self.user_email == user_email && now + 60 < self.expires_at_epoch
    }
}

#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("tokens.json"))
    }

    pub fn save(&self, token: &CachedToken) -> Result<()> {
        let s = serde_json::to_string_pretty(token)?;
        fs::write(&self.path, s).with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }

    /// Load the cached token if present. An unreadable cache is treated as
    /// empty.
    pub fn load(&self) -> Result<Option<CachedToken>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        match serde_json::from_str(&s) {
            Ok(t) => Ok(Some(t)),
            Err(e) => {
                log::warn!("ignoring unreadable token cache {}: {e}", self.path.display());
                Ok(None)
            }
        }
    }
}
