//! Ollama `/api/chat` sessions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{http_client, normalize_err_body, ChatEndpoint, ChatSession, Turn, TurnRole};
use crate::error::{ConfigurationError, SendError};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

pub struct OllamaEndpoint {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaEndpoint {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl ChatEndpoint for OllamaEndpoint {
    async fn open_session(&self, instruction: &str) -> Result<Box<dyn ChatSession>, SendError> {
        Ok(Box::new(OllamaSession {
            client: self.client.clone(),
            url: format!("{}/api/chat", self.base_url),
            model: self.model.clone(),
            instruction: instruction.to_string(),
            history: Vec::new(),
            closed: false,
        }))
    }
}

struct OllamaSession {
    client: Client,
    url: String,
    model: String,
    instruction: String,
    history: Vec<Turn>,
    closed: bool,
}

#[derive(Serialize)]
struct ChatReq<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResp {
    message: ChatRespMessage,
}

#[derive(Deserialize)]
struct ChatRespMessage {
    content: String,
}

fn build_request<'a>(
    model: &'a str,
    instruction: &'a str,
    history: &'a [Turn],
    text: &'a str,
) -> ChatReq<'a> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage {
        role: "system",
        content: instruction,
    });
    messages.extend(history.iter().map(|turn| ChatMessage {
        role: match turn.role {
            TurnRole::User => "user",
            TurnRole::Model => "assistant",
        },
        content: &turn.text,
    }));
    messages.push(ChatMessage {
        role: "user",
        content: text,
    });
    ChatReq {
        model,
        messages,
        stream: false,
    }
}

#[async_trait]
impl ChatSession for OllamaSession {
    async fn send(&mut self, text: &str) -> Result<String, SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }

        let response = self
            .client
            .post(&self.url)
            .json(&build_request(&self.model, &self.instruction, &self.history, text))
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

        let reply = response.json::<ChatResp>().await?.message.content;
        if reply.trim().is_empty() {
            return Err(SendError::EmptyResponse);
        }

        self.history.push(Turn {
            role: TurnRole::User,
            text: text.to_string(),
        });
        self.history.push(Turn {
            role: TurnRole::Model,
            text: reply.clone(),
        });
        Ok(reply)
    }

    fn close(&mut self) {
        self.closed = true;
        self.history.clear();
    }
}
