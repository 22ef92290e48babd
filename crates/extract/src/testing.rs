//! Deterministic chat model for tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use crate::llm::{ChatModel, ChatRequest, ModelError};
use crate::schema::ObjectKind;

type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, ModelError> + Send + Sync>;
type Delay = Box<dyn Fn(&ChatRequest) -> Option<Duration> + Send + Sync>;

/// Answers every request through a closure and records what it was asked.
pub struct ScriptedChat {
    responder: Responder,
    delay: Option<Delay>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<String, ModelError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering when `delay` returns a duration.
    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&ChatRequest) -> Option<Duration> + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn chat(&self, request: ChatRequest) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push(request.clone());

        if let Some(pause) = self.delay.as_ref().and_then(|delay| delay(&request)) {
            tokio::time::sleep(pause).await;
        }

        (self.responder)(&request)
    }
}

/// Which extraction array a prompt asks for, if any.
pub fn requested_kind(request: &ChatRequest) -> Option<ObjectKind> {
    if request.prompt.contains("\"relations\"") {
        Some(ObjectKind::Relations)
    } else if request.prompt.contains("\"entities\"") {
        Some(ObjectKind::Entities)
    } else {
        None
    }
}

/// The `TEXT:` section of an extraction prompt.
pub fn prompt_text(request: &ChatRequest) -> &str {
    request
        .prompt
        .split("TEXT:\n")
        .nth(1)
        .and_then(|rest| rest.split("\n\nJSON OUTPUT:").next())
        .unwrap_or_default()
}
