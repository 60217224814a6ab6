//! Reasoning oracle client.
//!
//! The engine talks to one external reasoning service through the
//! `ReasoningOracle` trait: a prompt goes in, text comes out, and every
//! caller is prepared for that text to be malformed. `OllamaOracle` is the
//! production implementation; `ScriptedOracle` replays queued responses
//! for deterministic tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vera_common::{EngineError, OracleConfig};

/// External reasoning service
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// One round trip: system prompt + user prompt -> raw response text.
    async fn ask(&self, system_prompt: &str, user_prompt: &str) -> Result<String, EngineError>;
}

/// Extract the JSON object from text that may wrap it in prose.
pub fn extract_json(text: &str) -> &str {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return &text[start..=end];
        }
    }
    text
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

/// Ollama-compatible HTTP client
pub struct OllamaOracle {
    http_client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaOracle {
    pub fn new(config: &OracleConfig) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            url: config.url.clone(),
            model: config.model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check if the endpoint is reachable
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.url);
        self.http_client.get(&url).send().await.is_ok()
    }
}

#[async_trait]
impl ReasoningOracle for OllamaOracle {
    async fn ask(&self, system_prompt: &str, user_prompt: &str) -> Result<String, EngineError> {
        let url = format!("{}/api/chat", self.url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            stream: false,
            format: Some("json".to_string()),
        };

        info!("Oracle call [{}] ({} chars)", self.model, user_prompt.len());

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::OracleUnavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::OracleUnavailable(format!(
                "endpoint returned {}: {}",
                status, body
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| EngineError::OracleUnavailable(format!("bad response body: {}", e)))?;

        debug!("Oracle response ({} chars)", chat.message.content.len());
        Ok(chat.message.content)
    }
}

/// Test oracle replaying queued responses in order. Once the queue is
/// empty, further calls fail the way an unreachable endpoint would.
pub struct ScriptedOracle {
    responses: Mutex<VecDeque<String>>,
    calls: Arc<AtomicUsize>,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_response(self, response: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(response.to_string());
        self
    }

    /// Shared call counter; clone before moving the oracle into an
    /// orchestrator.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn calls_made(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    async fn ask(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::OracleUnavailable("no scripted response left".to_string()))
    }
}
