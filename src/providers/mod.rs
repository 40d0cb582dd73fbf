//! LLM provider abstraction layer.
//!
//! Defines the [`LlmProvider`] trait and the request/response types the chat
//! engine speaks. [`anthropic::AnthropicProvider`] implements it over the
//! Anthropic `/v1/messages` API; tests substitute scripted providers.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod anthropic;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Conversation participant role as seen by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The customer, and tool results fed back to the model.
    User,
    /// The model (and human agents speaking on its behalf in history).
    Assistant,
}

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// Message content, text or structured parts.
    pub content: MessageContent,
}

impl Message {
    /// Plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Plain-text assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
}

/// The content of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Structured content blocks (text, tool calls, tool results).
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Extract plain text from the content, joining all text parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Parts(parts) => extract_text(parts),
        }
    }
}

/// A single structured content part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Tool use request from the assistant.
    ToolUse {
        /// Unique call identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input as JSON.
        input: serde_json::Value,
    },
    /// Result of a tool call.
    ToolResult {
        /// Matching call identifier.
        tool_use_id: String,
        /// Result content.
        content: String,
        /// Whether the tool reported an error.
        is_error: bool,
    },
}

/// JSON Schema definition for a tool the LLM can call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Description shown to the LLM.
    pub description: String,
    /// JSON Schema object for the tool's parameters.
    pub input_schema: serde_json::Value,
}

/// Join all text parts of a response, ignoring tool blocks.
pub fn extract_text(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// A request to an LLM provider for a completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Conversation history including the latest customer message.
    pub messages: Vec<Message>,
    /// System prompt.
    pub system: Option<String>,
    /// Tools available to the LLM for this call.
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens in the response.
    pub max_tokens: Option<u32>,
}

/// The reason a completion stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Normal end of turn.
    EndTurn,
    /// The model wants to call a tool.
    ToolUse,
    /// Max token limit reached.
    MaxTokens,
    /// A stop sequence was hit.
    StopSequence,
    /// Provider-specific other reason.
    Other(String),
}

/// Usage statistics for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageStats {
    /// Tokens used in the prompt.
    pub input_tokens: u32,
    /// Tokens generated in the response.
    pub output_tokens: u32,
}

impl UsageStats {
    /// Input plus output tokens.
    pub fn total(&self) -> u64 {
        u64::from(self.input_tokens).saturating_add(u64::from(self.output_tokens))
    }
}

/// The response from an LLM provider.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Response content (text and/or tool calls).
    pub content: Vec<ContentPart>,
    /// Why the model stopped.
    pub stop_reason: StopReason,
    /// Token usage for budget tracking.
    pub usage: UsageStats,
    /// The model identifier that served this response.
    pub model: String,
}

impl CompletionResponse {
    /// Tool calls requested in this response, in order.
    pub fn tool_calls(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by model providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Upstream provider responded with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitised response body.
        body: String,
    },
}

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure, `ProviderError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

/// Collapse whitespace, redact key-shaped tokens and truncate an error body
/// so it is safe to log.
pub fn sanitize_http_error_body(raw: &str) -> String {
    const MAX_ERROR_BODY_CHARS: usize = 256;

    let mut sanitized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    for pattern in [
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"pcsk_[A-Za-z0-9_\-]{10,}",
        r"SB-Mid-server-[A-Za-z0-9_\-]{8,}",
        r"Mid-server-[A-Za-z0-9_\-]{8,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }
    sanitized
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Core LLM provider interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Request a completion from the LLM.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API, network, or parse failure.
    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;

    /// The model identifier this provider is instantiated for.
    fn model_id(&self) -> &str;
}
