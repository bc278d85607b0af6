//! Model provider layer.
//!
//! Defines the provider-agnostic chat/tool-calling types, the
//! [`ModelProvider`] trait, and concrete providers:
//!
//! - `openai` - OpenAI-compatible chat completions (batch + SSE streaming)
//! - `anthropic` - Anthropic messages API (batch)
//!
//! Provider selection and model-name normalization live in `resolver`.

mod anthropic;
mod openai;
pub mod resolver;
mod retry;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use resolver::{
    resolve, resolved_kind, CredentialResolver, ModelOptions, ProviderKind, ProviderResolver,
    ReasoningEffort,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;

/// Role of a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Typed content part of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        /// Base64-encoded image bytes.
        data: String,
    },
    File {
        name: String,
        url: String,
    },
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool result message.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Model-facing description of a callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// One conversational message, persisted and sent to providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<Part>,
    /// Tool calls attached to an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `Role::Tool` messages: the call id this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For `Role::Tool` messages: the tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    fn with_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text { text: text.into() }],
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_text(Role::Assistant, text)
    }

    /// Assistant message carrying tool calls (content may be empty).
    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        let parts = match content {
            Some(text) if !text.is_empty() => vec![Part::Text { text }],
            _ => Vec::new(),
        };
        Self {
            role: Role::Assistant,
            parts,
            tool_calls,
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// Tool result message answering a specific call id.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![Part::Text {
                text: content.into(),
            }],
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
        }
    }

    /// Concatenated text content of all text parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Part::Text { text } = part {
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(text);
            }
        }
        out
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        // Extend an existing trailing text part rather than fragmenting.
        if let Some(Part::Text { text: existing }) = self.parts.last_mut() {
            existing.push_str("\n\n");
            existing.push_str(&text);
        } else {
            self.parts.push(Part::Text { text });
        }
    }

    pub fn push_image(&mut self, media_type: impl Into<String>, data: impl Into<String>) {
        self.parts.push(Part::Image {
            media_type: media_type.into(),
            data: data.into(),
        });
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage from a single model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulate usage across the steps of a multi-step turn.
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A completion request with tools attached.
#[derive(Debug, Clone)]
pub struct ToolCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    /// System prompt; placement (separate field vs first message) is decided
    /// by the caller's assembly plan before the request is built.
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ToolCompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            messages,
            tools,
            system: None,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Response from a tool-capable completion call.
#[derive(Debug, Clone, Default)]
pub struct ToolCompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

/// Event emitted on a streaming completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text from the assistant.
    TextDelta(String),
    /// A fully assembled tool call.
    ToolCall(ToolCall),
    /// Token usage for the call (emitted once, before `Done`).
    Usage(TokenUsage),
    /// The provider finished this call.
    Done,
    /// The provider failed mid-stream.
    Error(String),
}

/// A resolved, callable model handle.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable provider key ("openai", "anthropic", ...).
    fn provider_key(&self) -> &str;

    /// Concrete model name sent on the wire.
    fn model_name(&self) -> &str;

    /// One batch completion call with tools attached.
    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, ProviderError>;

    /// Streaming completion. The default implementation degrades to a batch
    /// call emitted as a single delta, for providers without a stream path.
    async fn stream_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let response = self.complete_with_tools(request).await?;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            if let Some(text) = response.content {
                if !text.is_empty() {
                    let _ = tx.send(StreamEvent::TextDelta(text)).await;
                }
            }
            for call in response.tool_calls {
                let _ = tx.send(StreamEvent::ToolCall(call)).await;
            }
            let _ = tx.send(StreamEvent::Usage(response.usage)).await;
            let _ = tx.send(StreamEvent::Done).await;
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_concatenates_text_parts_only() {
        let mut msg = ChatMessage::user("hello");
        msg.push_image("image/png", "aGk=");
        msg.push_text("world");
        assert_eq!(msg.text(), "hello\n\nworld");
    }

    #[test]
    fn push_text_extends_trailing_part() {
        let mut msg = ChatMessage::user("a");
        msg.push_text("b");
        assert_eq!(msg.parts.len(), 1);
    }

    #[test]
    fn assistant_with_empty_content_has_no_parts() {
        let msg = ChatMessage::assistant_with_tool_calls(Some(String::new()), vec![]);
        assert!(msg.parts.is_empty());
    }

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        total.add(TokenUsage {
            input_tokens: 7,
            output_tokens: 3,
        });
        assert_eq!(total.input_tokens, 17);
        assert_eq!(total.output_tokens, 8);
        assert_eq!(total.total(), 25);
    }
}
