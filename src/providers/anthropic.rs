//! Anthropic provider implementation using the `/v1/messages` API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    check_http_response, CompletionRequest, CompletionResponse, ContentPart, LlmProvider,
    MessageContent, ProviderError, Role, StopReason, UsageStats,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const REQUEST_TIMEOUT_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Anthropic messages API request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<AnthropicMessage>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Optional system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Tool definitions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<AnthropicTool>,
}

/// A message in Anthropic format.
#[doc(hidden)]
#[derive(Debug, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// Role: "user" or "assistant".
    pub role: String,
    /// Content blocks.
    pub content: Value,
}

/// A tool definition in Anthropic format.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct AnthropicTool {
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema for tool input.
    pub input_schema: Value,
}

/// Anthropic API response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    /// Content blocks in the response.
    pub content: Vec<AnthropicContentBlock>,
    /// Model that served the response.
    pub model: String,
    /// Why the model stopped generating.
    pub stop_reason: Option<String>,
    /// Token usage.
    pub usage: AnthropicUsage,
}

/// A content block in the Anthropic response.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    /// Text content.
    Text {
        /// The text.
        text: String,
    },
    /// Tool use request.
    ToolUse {
        /// Call identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input.
        input: Value,
    },
    /// Any block type this client does not use.
    #[serde(other)]
    Unsupported,
}

/// Anthropic usage statistics.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AnthropicUsage {
    /// Input tokens consumed.
    pub input_tokens: u32,
    /// Output tokens generated.
    pub output_tokens: u32,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Anthropic messages API provider authenticated with an API key.
#[derive(Clone)]
pub struct AnthropicProvider {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl AnthropicProvider {
    /// Create a provider for `model` using the public API endpoint.
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to build HTTP client with timeout, using default");
                reqwest::Client::default()
            });
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_BASE.to_owned(),
            client,
        }
    }

    /// Point the provider at a different API base (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build an Anthropic API request from a completion request.
#[doc(hidden)]
pub fn build_request(model: &str, request: &CompletionRequest) -> AnthropicRequest {
    let messages = request
        .messages
        .iter()
        .map(|msg| AnthropicMessage {
            role: match msg.role {
                Role::User => "user".to_owned(),
                Role::Assistant => "assistant".to_owned(),
            },
            content: match &msg.content {
                MessageContent::Text(t) => Value::String(t.clone()),
                MessageContent::Parts(parts) => {
                    Value::Array(parts.iter().map(content_part_to_value).collect())
                }
            },
        })
        .collect();

    let tools = request
        .tools
        .iter()
        .map(|t| AnthropicTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
        })
        .collect();

    AnthropicRequest {
        model: model.to_owned(),
        messages,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: request.system.clone(),
        tools,
    }
}

/// Parse an Anthropic API response into a completion response.
///
/// # Errors
///
/// Returns `ProviderError::Parse` if the response cannot be deserialized.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<CompletionResponse, ProviderError> {
    let resp: AnthropicResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let content = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            AnthropicContentBlock::Text { text } => Some(ContentPart::Text { text }),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                Some(ContentPart::ToolUse { id, name, input })
            }
            AnthropicContentBlock::Unsupported => None,
        })
        .collect();

    let stop_reason = match resp.stop_reason.as_deref() {
        Some("end_turn") | None => StopReason::EndTurn,
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        Some(other) => StopReason::Other(other.to_owned()),
    };

    Ok(CompletionResponse {
        content,
        stop_reason,
        usage: UsageStats {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
        },
        model: resp.model,
    })
}

fn content_part_to_value(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ContentPart::ToolUse { id, name, input } => {
            serde_json::json!({"type": "tool_use", "id": id, "name": name, "input": input})
        }
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

// ---------------------------------------------------------------------------
// Trait impl
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let api_request = build_request(&self.model, &request);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .json(&api_request)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        parse_response(&payload)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
