use anyhow::{Result, anyhow};
use keyring::{Entry, Error as KeyringError};

const SERVICE: &str = "mail_triage";

/// What a keyring entry holds. Each kind gets its own entry namespace so an
/// email address can key both a refresh token and an app password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Secret {
    RefreshToken,
    ClientSecret,
    AppPassword,
}

impl Secret {
    fn prefix(self) -> &'static str {
        match self {
            Secret::RefreshToken => "refresh",
            Secret::ClientSecret => "client",
            Secret::AppPassword => "password",
        }
    }
}

fn entry(kind: Secret, key: &str) -> Result<Entry> {
    Entry::new(SERVICE, &format!("{}:{key}", kind.prefix())).map_err(|e| anyhow!(e.to_string()))
}

pub fn save(kind: Secret, key: &str, value: &str) -> Result<()> {
    entry(kind, key)?
        .set_password(value)
        .map_err(|e| anyhow!(e.to_string()))
}

/// `Ok(None)` when nothing is stored under `key`.
pub fn load(kind: Secret, key: &str) -> Result<Option<String>> {
    match entry(kind, key)?.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(KeyringError::NoEntry) => Ok(None),
        Err(e) => Err(anyhow!(e.to_string())),
    }
}

pub fn save_refresh_token(user_email: &str, refresh_token: &str) -> Result<()> {
    save(Secret::RefreshToken, user_email, refresh_token)
}

pub fn load_refresh_token(user_email: &str) -> Result<Option<String>> {
    load(Secret::RefreshToken, user_email)
}

pub fn save_client_secret(client_id: &str, client_secret: &str) -> Result<()> {
    save(Secret::ClientSecret, client_id, client_secret)
}

pub fn load_client_secret(client_id: &str) -> Result<Option<String>> {
    load(Secret::ClientSecret, client_id)
}

pub fn save_app_password(user_email: &str, password: &str) -> Result<()> {
    save(Secret::AppPassword, user_email, password)
}

pub fn load_app_password(user_email: &str) -> Result<Option<String>> {
    load(Secret::AppPassword, user_email)
}
