use anyhow::{Result, anyhow};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::tokens_file::{CachedToken, TokenCache};
use crate::auth::{oauth, token_store};
use crate::config::Config;

const GMAIL_SCOPE: &str = "https://mail.google.com/";

#[derive(Clone)]
pub struct TokenManager {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub user_email: String,
    cache: TokenCache,
}

impl TokenManager {
    pub fn from_config(cfg: &Config, data_dir: &Path) -> Result<Self> {
        let client_id = cfg.client_id.clone();
        if client_id.trim().is_empty() {
            return Err(anyhow!("client_id not set in config"));
        }
        let user_email = cfg.user_email()?.to_string();
        let redirect_uri = cfg
            .redirect_uri
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:8080/callback".to_string());

        let client_secret = token_store::load_client_secret(&client_id)?
            .or_else(|| std::env::var("OAUTH_CLIENT_SECRET").ok());

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            user_email,
            cache: TokenCache::in_dir(data_dir),
        })
    }

    /// Returns a valid access token; refreshes or runs the browser flow if
    /// needed.
    pub fn get_access_token(&self) -> Result<String> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;

        // 1) cached & not expired
        if let Some(cached) = self.cache.load()?
            && cached.usable(&self.user_email, now)
        {
            return Ok(cached.access_token);
        }

        // 2) refresh if possible
        if let Some(rt) = token_store::load_refresh_token(&self.user_email)? {
            match oauth::refresh_access_token(&self.client_id, self.client_secret.as_deref(), &rt) {
                Ok(t) => return self.remember(t, now),
                Err(e) => log::warn!("refresh token rejected ({e}); starting browser sign-in"),
            }
        }

        // 3) otherwise PKCE
        let t = oauth::perform_pkce_flow(
            &self.client_id,
            self.client_secret.as_deref(),
            &self.redirect_uri,
            GMAIL_SCOPE,
        )?;
        if let Some(refresh) = &t.refresh_token
            && let Err(e) = token_store::save_refresh_token(&self.user_email, refresh)
        {
            log::warn!("could not store refresh token in keyring: {e}");
        }
        self.remember(t, now)
    }

    fn remember(&self, t: oauth::Tokens, now: i64) -> Result<String> {
        let expires_at_epoch = t.expires_in.map(|s| now + s as i64).unwrap_or(now + 3500);
        let cached = CachedToken {
            user_email: self.user_email.clone(),
            access_token: t.access_token,
            expires_at_epoch,
        };
        if let Err(e) = self.cache.save(&cached) {
            log::warn!("could not cache access token: {e}");
        }
        Ok(cached.access_token)
    }
}
