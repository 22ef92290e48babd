use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model rate limited: {0}")]
    RateLimited(String),

    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::RateLimited(_) | ModelError::Unavailable(_))
    }

    pub fn from_status(status: StatusCode, body: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            ModelError::RateLimited(body)
        } else if status.is_server_error() {
            ModelError::Unavailable(format!("{}: {}", status, body))
        } else {
            ModelError::InvalidResponse(format!("{}: {}", status, body))
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ModelError::InvalidResponse(err.to_string())
        } else {
            ModelError::Unavailable(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// One user/assistant exchange, appended to a conversation history.
    pub fn exchange(prompt: impl Into<String>, response: impl Into<String>) -> [Message; 2] {
        [Self::user(prompt), Self::assistant(response)]
    }
}

/// A single chat-completion call.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub prompt: String,
    pub history: Vec<Message>,
    pub system_prompt: Option<String>,
    /// Ask the model for a JSON object.
    pub json_response: bool,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.json_response = true;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// System prompt, history, then the new user prompt.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message {
                role: Role::System,
                content: system.clone(),
            });
        }
        messages.extend(self.history.iter().cloned());
        messages.push(Message::user(self.prompt.clone()));
        messages
    }
}

/// Chat-completion collaborator. Implementations own their retry and timeout policy.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<String, ModelError>;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>, // "json" for structured output
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ModelError> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "llama3".to_string(),
        )
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, ModelError> {
        let url = format!("{}/api/chat", self.base_url);

        let body = OllamaChatRequest {
            model: &self.model,
            messages: request.messages(),
            stream: false,
            format: request.json_response.then_some("json"),
            options: request.max_tokens.map(|num_predict| OllamaOptions { num_predict }),
        };

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::from_status(status, text));
        }

        let ollama_response: OllamaChatResponse = response.json().await?;
        Ok(ollama_response.message.content)
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn chat(&self, request: ChatRequest) -> Result<String, ModelError> {
        self.retry
            .retry("ollama_chat", ModelError::is_retryable, || self.send(&request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_order() {
        let request = ChatRequest::new("next")
            .with_system_prompt("be brief")
            .with_history(Message::exchange("first", "answer").to_vec());

        let roles: Vec<Role> = request.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(request.messages().last().unwrap().content, "next");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ModelError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ModelError::RateLimited(_)
        ));
        assert!(ModelError::from_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(!ModelError::from_status(StatusCode::BAD_REQUEST, String::new()).is_retryable());
    }

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest::new("hi").json().with_max_tokens(128);
        let body = OllamaChatRequest {
            model: "llama3",
            messages: request.messages(),
            stream: false,
            format: request.json_response.then_some("json"),
            options: request.max_tokens.map(|num_predict| OllamaOptions { num_predict }),
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["format"], "json");
        assert_eq!(value["options"]["num_predict"], 128);
        assert_eq!(value["messages"][0]["role"], "user");
    }
}
