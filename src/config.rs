use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::classifier::DEFAULT_MAX_FEATURES;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    Oauth2,
    Password,
}

/// How a label is expressed in the mailbox.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LabelMode {
    /// Gmail labels via `X-GM-LABELS`.
    #[default]
    Gmail,
    /// Plain IMAP: copy into a folder named after the label.
    Folder,
}

/// When feedback is folded back into the model.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrainPolicy {
    /// After every correction, in the background.
    #[default]
    Eager,
    /// Once, when the session ends.
    SessionEnd,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SummarizerConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    pub notify_important: bool,
    /// Apply labels automatically when the prediction is at least this
    /// confident. Unset means never.
    pub auto_label_threshold: Option<f32>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            notify_important: true,
            auto_label_threshold: None,
        }
    }
}

fn default_imap_server() -> String {
    "imap.gmail.com".to_string()
}

fn default_imap_port() -> u16 {
    993
}

// Gmail reserves `Important` for its own system label.
fn default_important_label() -> String {
    "Triage/Important".to_string()
}

fn default_junk_label() -> String {
    "Triage/Junk".to_string()
}

fn default_fetch_count() -> usize {
    5
}

fn default_max_features() -> usize {
    DEFAULT_MAX_FEATURES
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub client_id: String,
    pub user_email: Option<String>,
    #[serde(default = "default_imap_server")]
    pub imap_server: String,
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub auth: AuthMethod,
    #[serde(default)]
    pub label_mode: LabelMode,
    #[serde(default = "default_important_label")]
    pub important_label: String,
    #[serde(default = "default_junk_label")]
    pub junk_label: String,
    /// Mark a message read once it has been labeled.
    #[serde(default = "default_true")]
    pub mark_read: bool,
    #[serde(default = "default_fetch_count")]
    pub fetch_count: usize,
    #[serde(default)]
    pub retrain: RetrainPolicy,
    #[serde(default = "default_max_features")]
    pub max_features: usize,
    pub data_dir: Option<String>,
    pub summarizer: Option<SummarizerConfig>,
    #[serde(default)]
    pub watch: WatchConfig,
}

impl Config {
    fn template() -> Self {
        Self {
            client_id: "YOUR_CLIENT_ID.apps.googleusercontent.com".to_string(),
            user_email: Some("you@example.com".to_string()),
            imap_server: default_imap_server(),
            imap_port: default_imap_port(),
            redirect_uri: Some("http://127.0.0.1:8080/callback".to_string()),
            auth: AuthMethod::Oauth2,
            label_mode: LabelMode::Gmail,
            important_label: default_important_label(),
            junk_label: default_junk_label(),
            mark_read: true,
            fetch_count: default_fetch_count(),
            retrain: RetrainPolicy::Eager,
            max_features: default_max_features(),
            data_dir: None,
            summarizer: Some(SummarizerConfig::default()),
            watch: WatchConfig::default(),
        }
    }

    pub fn user_email(&self) -> Result<&str> {
        self.user_email
            .as_deref()
            .ok_or_else(|| anyhow!("user_email not set in config"))
    }
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow!("no config dir available"))?
        .join("mail_triage"))
}

pub fn config_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("config.toml");
    Ok(p)
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

/// Parse `path`, writing a template there first if it does not exist.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        let tom = toml::to_string_pretty(&Config::template())?;
        fs::write(path, tom).with_context(|| format!("writing {}", path.display()))?;
        return Err(anyhow!(
            "Created template config at {}; edit it and run again",
            path.display()
        ));
    }
    let s = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let cfg: Config = toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))?;
    if cfg.fetch_count == 0 {
        return Err(anyhow!("fetch_count must be at least 1"));
    }
    Ok(cfg)
}

/// Directory holding the ledger, the classifier state and the log file.
pub fn resolve_data_dir(cfg: &Config) -> Result<PathBuf> {
    let dir = match &cfg.data_dir {
        Some(p) => PathBuf::from(p),
        None => dirs::data_dir()
            .ok_or_else(|| anyhow!("no data dir available"))?
            .join("mail_triage"),
    };
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir)
}
