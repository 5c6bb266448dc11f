//! Email summaries from an OpenAI-compatible chat-completions endpoint.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::SummarizerConfig;
use crate::error::SummarizationError;

/// Longest body sent to the model, in characters.
pub const MAX_INPUT_CHARS: usize = 12_000;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes emails concisely.";

pub trait Summarizer: Send + Sync {
    fn summarize(&self, text: &str) -> Result<String, SummarizationError>;
}

/// Stand-in used when no API key is available. Every call fails softly.
pub struct DisabledSummarizer {
    reason: String,
}

impl DisabledSummarizer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Summarizer for DisabledSummarizer {
    fn summarize(&self, _text: &str) -> Result<String, SummarizationError> {
        Err(SummarizationError::NotConfigured(self.reason.clone()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatTurn<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct OpenAiSummarizer {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiSummarizer {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Result<Self, SummarizationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SummarizationError::Network(e.to_string()))?;
        Ok(Self::with_client(client, endpoint, model, api_key))
    }

    pub fn with_client(
        client: Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    /// Read the API key from the configured environment variable.
    pub fn from_config(cfg: &SummarizerConfig) -> Result<Self, SummarizationError> {
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SummarizationError::NotConfigured(cfg.api_key_env.clone()))?;
        Self::new(cfg.endpoint.clone(), cfg.model.clone(), api_key)
    }
}

/// Build the summarizer named by the configuration, or a disabled one.
pub fn from_config(cfg: Option<&SummarizerConfig>) -> Box<dyn Summarizer> {
    let Some(cfg) = cfg else {
        return Box::new(DisabledSummarizer::new("[summarizer] in config.toml"));
    };
    match OpenAiSummarizer::from_config(cfg) {
        Ok(s) => Box::new(s),
        Err(e) => {
            log::warn!("summaries disabled: {e}");
            Box::new(DisabledSummarizer::new(cfg.api_key_env.clone()))
        }
    }
}

/// Cut `text` to [`MAX_INPUT_CHARS`], marking the cut.
pub fn truncate_input(text: &str) -> String {
    match text.char_indices().nth(MAX_INPUT_CHARS) {
        Some((cut, _)) => format!("{}... [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

fn user_prompt(text: &str) -> String {
    format!(
        "Please summarize the following email in 3-5 bullet points. Focus on the main points, \
         actions required, and any important details.\n\nEmail:\n{}",
        truncate_input(text)
    )
}

impl Summarizer for OpenAiSummarizer {
    fn summarize(&self, text: &str) -> Result<String, SummarizationError> {
        let prompt = user_prompt(text);
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatTurn {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatTurn {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.3,
            max_tokens: 500,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| SummarizationError::Network(e.to_string()))?;

        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(SummarizationError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(SummarizationError::Auth),
            s if !s.is_success() => {
                let body = resp.text().unwrap_or_default();
                return Err(SummarizationError::Api(format!("{s}: {}", body.trim())));
            }
            _ => {}
        }

        let parsed: ChatResponse = resp
            .json()
            .map_err(|e| SummarizationError::Api(format!("unreadable response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SummarizationError::Api("response had no content".to_string()))
    }
}
