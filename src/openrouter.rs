//! OpenRouter chat client
//!
//! Speaks the OpenAI-compatible chat-completions wire format used by the
//! classifier and the action selector.
//! Uses a long-lived reqwest::Client for connection pooling.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::{ReviewError, Result};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// One message in a chat-completions exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: String) -> Self {
        Self {
            role: "system".to_string(),
            content,
        }
    }

    pub fn user(content: String) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

/// Function declaration offered to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Tool invocation requested by the model. `arguments` is the raw JSON
/// string exactly as the model produced it.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub arguments: String,
}

/// First-choice reply, flattened so callers never touch the wire shape.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub content: Option<String>,
    pub tool_call: Option<ToolCall>,
    pub finish_reason: Option<String>,
}

impl ChatReply {
    /// True when the model asked for a tool rather than answering in text.
    pub fn is_tool_call(&self) -> bool {
        self.tool_call.is_some() || self.finish_reason.as_deref() == Some("tool_calls")
    }
}

/// Transport seam for chat completions
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply>;
}

/// Reusable OpenRouter client (connection-pooled)
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl ChatApi for OpenRouterClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply> {
        if self.api_key.is_empty() {
            return Err(ReviewError::Classifier(
                "OPENROUTER_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}/chat/completions", self.base_url);

        let mut request_builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request);

        // openrouter.ai ranks traffic by these optional attribution headers
        if self.base_url.contains("openrouter.ai") {
            if let Ok(referer) = std::env::var("OPENROUTER_HTTP_REFERER") {
                request_builder = request_builder.header("HTTP-Referer", referer);
            }
            if let Ok(title) = std::env::var("OPENROUTER_TITLE") {
                request_builder = request_builder.header("X-Title", title);
            }
        }

        info!("Calling OpenRouter model {}", request.model);

        let response = request_builder.send().await.map_err(|e| {
            error!("OpenRouter request failed: {}", e);
            ReviewError::Classifier(format!("OpenRouter request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("OpenRouter error response ({}): {}", status, error_text);
            return Err(ReviewError::Classifier(format!(
                "OpenRouter returned {}: {}",
                status, error_text
            )));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            error!("Failed to parse OpenRouter response: {}", e);
            ReviewError::Classifier(format!("OpenRouter parse error: {}", e))
        })?;

        let choice = completion.choices.into_iter().next().ok_or_else(|| {
            ReviewError::Classifier("No choices in OpenRouter response".to_string())
        })?;

        let tool_call = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|call| ToolCall {
                name: call.function.name,
                arguments: call.function.arguments,
            });

        info!(
            "OpenRouter reply received (finish_reason: {})",
            choice.finish_reason.as_deref().unwrap_or("unknown")
        );

        Ok(ChatReply {
            content: choice.message.content,
            tool_call,
            finish_reason: choice.finish_reason,
        })
    }
}

//
// ================= Wire response shapes =================
//

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

//
// ================= Scripted transport =================
//

/// Scripted chat transport for development & testing
/// Keeps review flows runnable without an API key
pub struct MockChatApi {
    replies: Mutex<VecDeque<ChatReply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockChatApi {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a plain-text reply.
    pub async fn push_text(&self, text: &str) {
        self.replies.lock().await.push_back(ChatReply {
            content: Some(text.to_string()),
            tool_call: None,
            finish_reason: Some("stop".to_string()),
        });
    }

    /// Queue a tool-call reply.
    pub async fn push_tool_call(&self, name: &str, arguments: &str) {
        self.replies.lock().await.push_back(ChatReply {
            content: None,
            tool_call: Some(ToolCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            }),
            finish_reason: Some("tool_calls".to_string()),
        });
    }

    /// Requests recorded so far, oldest first.
    pub async fn seen_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

impl Default for MockChatApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply> {
        self.requests.lock().await.push(request);

        self.replies.lock().await.pop_front().ok_or_else(|| {
            ReviewError::Classifier("Mock transport has no scripted reply".to_string())
        })
    }
}
