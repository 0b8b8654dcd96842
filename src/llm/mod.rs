//! Conversational endpoint abstraction.
//!
//! A [`ChatEndpoint`] opens sessions bound to a grounding instruction; a
//! [`ChatSession`] exchanges one user text for one response text per turn
//! and keeps its own turn history. The session manager only ever talks to
//! these traits, so tests swap in a scripted fake.
//!
//! # Providers
//!
//! | `llm.provider` | Implementation | Credential |
//! |----------------|----------------|------------|
//! | `gemini` | [`gemini::GeminiEndpoint`] (`generateContent`) | API key from `llm.api_key_env` |
//! | `ollama` | [`ollama::OllamaEndpoint`] (`/api/chat`) | none |

pub mod gemini;
pub mod ollama;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::error::{ConfigurationError, SendError};

/// One open conversation.
#[async_trait]
pub trait ChatSession: Send {
    /// Sends a user turn and returns the response text.
    ///
    /// A failed turn leaves the history untouched so the user can retry.
    async fn send(&mut self, text: &str) -> Result<String, SendError>;

    /// Ends the conversation; later sends fail with [`SendError::Closed`].
    fn close(&mut self);
}

/// Factory for sessions bound to an instruction.
#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    async fn open_session(&self, instruction: &str) -> Result<Box<dyn ChatSession>, SendError>;
}

/// Speaker of a recorded turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

/// Builds the endpoint named by `llm.provider`.
///
/// Fails with [`ConfigurationError::MissingCredential`] when the provider
/// needs an API key and the configured environment variable is unset.
pub fn create_endpoint(config: &LlmConfig) -> Result<Arc<dyn ChatEndpoint>, ConfigurationError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.provider.as_str() {
        "gemini" => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| ConfigurationError::MissingCredential {
                    provider: "gemini".to_string(),
                    env_var: config.api_key_env.clone(),
                })?;
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| gemini::DEFAULT_BASE_URL.to_string());
            Ok(Arc::new(gemini::GeminiEndpoint::new(
                base_url,
                config.model.clone(),
                api_key,
                timeout,
            )?))
        }
        "ollama" => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| ollama::DEFAULT_BASE_URL.to_string());
            Ok(Arc::new(ollama::OllamaEndpoint::new(
                base_url,
                config.model.clone(),
                timeout,
            )?))
        }
        other => Err(ConfigurationError::Invalid(format!(
            "unknown llm provider: {other}"
        ))),
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ConfigurationError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigurationError::Invalid(format!("failed to build HTTP client: {e}")))
}

/// Pulls a readable message out of an error response body.
pub(crate) fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.get("error") {
            if let Some(message) = err.get("message").and_then(|v| v.as_str()) {
                return message.to_string();
            }
            if let Some(message) = err.as_str() {
                return message.to_string();
            }
        }
    }

    trimmed.to_string()
}
