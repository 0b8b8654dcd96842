//! Gemini `generateContent` sessions.
//!
//! The REST API is stateless, so the session resends the system instruction
//! and the accumulated turns on every request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{http_client, normalize_err_body, ChatEndpoint, ChatSession, Turn, TurnRole};
use crate::error::{ConfigurationError, SendError};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiEndpoint {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiEndpoint {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ChatEndpoint for GeminiEndpoint {
    async fn open_session(&self, instruction: &str) -> Result<Box<dyn ChatSession>, SendError> {
        Ok(Box::new(GeminiSession {
            client: self.client.clone(),
            url: format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ),
            api_key: self.api_key.clone(),
            instruction: instruction.to_string(),
            history: Vec::new(),
            closed: false,
        }))
    }
}

struct GeminiSession {
    client: Client,
    url: String,
    api_key: String,
    instruction: String,
    history: Vec<Turn>,
    closed: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: ContentReq<'a>,
    contents: Vec<ContentReq<'a>>,
}

#[derive(Serialize)]
struct ContentReq<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<PartReq<'a>>,
}

#[derive(Serialize)]
struct PartReq<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResp>,
}

#[derive(Deserialize)]
struct ContentResp {
    #[serde(default)]
    parts: Vec<PartResp>,
}

#[derive(Deserialize)]
struct PartResp {
    text: Option<String>,
}

fn build_request<'a>(instruction: &'a str, history: &'a [Turn], text: &'a str) -> GenerateRequest<'a> {
    let mut contents: Vec<ContentReq<'a>> = history
        .iter()
        .map(|turn| ContentReq {
            role: Some(match turn.role {
                TurnRole::User => "user",
                TurnRole::Model => "model",
            }),
            parts: vec![PartReq { text: &turn.text }],
        })
        .collect();
    contents.push(ContentReq {
        role: Some("user"),
        parts: vec![PartReq { text }],
    });
    GenerateRequest {
        system_instruction: ContentReq {
            role: None,
            parts: vec![PartReq { text: instruction }],
        },
        contents,
    }
}

/// Text of the first candidate, all parts concatenated.
fn response_text(response: GenerateResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl ChatSession for GeminiSession {
    async fn send(&mut self, text: &str) -> Result<String, SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(&self.instruction, &self.history, text))
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Status {
                status: status.as_u16(),
                body: normalize_err_body(&body),
            });
        }

        let reply = response_text(response.json::<GenerateResponse>().await?)
            .ok_or(SendError::EmptyResponse)?;

        self.history.push(Turn {
            role: TurnRole::User,
            text: text.to_string(),
        });
        self.history.push(Turn {
            role: TurnRole::Model,
            text: reply.clone(),
        });
        tracing::debug!(turns = self.history.len(), "gemini turn complete");
        Ok(reply)
    }

    fn close(&mut self) {
        self.closed = true;
        self.history.clear();
    }
}
