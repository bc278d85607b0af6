//! OpenAI-compatible chat completions provider.
//!
//! Speaks the standard chat completions API with bearer-key auth, in both
//! batch and SSE streaming modes. Also serves any OpenAI-compatible
//! endpoint via `with_base_url`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::llm::retry::{backoff_delay, is_retryable_status};
use crate::llm::{
    ChatMessage, ModelOptions, ModelProvider, Part, Role, StreamEvent, TokenUsage, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const MAX_RETRIES: u32 = 2;

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
    options: ModelOptions,
}

impl OpenAiProvider {
    pub fn new(model: impl Into<String>, api_key: SecretString, options: ModelOptions) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            api_key,
            options,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, request: &ToolCompletionRequest, stream: bool) -> ApiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system) = request.system {
            messages.push(ApiMessage::system(system));
        }
        messages.extend(request.messages.iter().map(ApiMessage::from_chat));

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| ApiTool {
                        tool_type: "function".to_string(),
                        function: ApiFunctionDef {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };

        ApiRequest {
            model: self.model.clone(),
            messages,
            tools,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            reasoning_effort: self
                .options
                .reasoning_effort
                .map(|e| e.as_str().to_string()),
            stream,
            stream_options: if stream {
                Some(ApiStreamOptions {
                    include_usage: true,
                })
            } else {
                None
            },
        }
    }

    async fn post(&self, body: &ApiRequest) -> Result<reqwest::Response, ProviderError> {
        let url = self.api_url();
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            tracing::debug!(url = %url, attempt = attempt + 1, "openai request");

            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
                .json(body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(ProviderError::Http(e));
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                let text = response.text().await.unwrap_or_default();
                return Err(ProviderError::Authentication {
                    provider: "openai".to_string(),
                    reason: format!("HTTP {}: {}", status, text),
                });
            }
            if is_retryable_status(status) && attempt < MAX_RETRIES {
                tracing::warn!(status, attempt, "openai transient error, retrying");
                tokio::time::sleep(backoff_delay(attempt)).await;
                continue;
            }
            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(std::time::Duration::from_secs);
                return Err(ProviderError::RateLimited {
                    provider: "openai".to_string(),
                    retry_after,
                });
            }
            if !(200..300).contains(&status) {
                let text = response.text().await.unwrap_or_default();
                return Err(ProviderError::RequestFailed {
                    provider: "openai".to_string(),
                    reason: format!("HTTP {}: {}", status, text),
                });
            }
            return Ok(response);
        }

        Err(last_err.unwrap_or_else(|| ProviderError::RequestFailed {
            provider: "openai".to_string(),
            reason: "retries exhausted".to_string(),
        }))
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_key(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, ProviderError> {
        let body = self.build_body(&request, false);
        let response = self.post(&body).await?;
        let api: ApiResponse = response.json().await.map_err(ProviderError::Http)?;

        let choice = api
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: "openai".to_string(),
                reason: "response contained no choices".to_string(),
            })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(ApiToolCall::into_tool_call)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ToolCompletionResponse {
            content: choice.message.content,
            tool_calls,
            usage: api.usage.map(ApiUsage::into_usage).unwrap_or_default(),
        })
    }

    async fn stream_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let body = self.build_body(&request, true);
        let response = self.post(&body).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            let mut assembler = ToolCallAssembler::default();
            let mut usage = TokenUsage::default();

            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let data = match line.strip_prefix("data:") {
                        Some(d) => d.trim(),
                        None => continue,
                    };
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    let parsed: ApiStreamChunk = match serde_json::from_str(data) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping unparseable stream chunk");
                            continue;
                        }
                    };
                    if let Some(u) = parsed.usage {
                        usage = u.into_usage();
                    }
                    for choice in parsed.choices {
                        if let Some(delta) = choice.delta {
                            if let Some(text) = delta.content {
                                if !text.is_empty()
                                    && tx.send(StreamEvent::TextDelta(text)).await.is_err()
                                {
                                    return;
                                }
                            }
                            for fragment in delta.tool_calls.unwrap_or_default() {
                                assembler.push(fragment);
                            }
                        }
                    }
                }
            }

            for call in assembler.finish() {
                if tx.send(StreamEvent::ToolCall(call)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(StreamEvent::Usage(usage)).await;
            let _ = tx.send(StreamEvent::Done).await;
        });

        Ok(rx)
    }
}

/// Accumulates streamed tool-call fragments keyed by choice index.
#[derive(Default)]
struct ToolCallAssembler {
    partial: Vec<PartialToolCall>,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAssembler {
    fn push(&mut self, fragment: ApiToolCallDelta) {
        let index = fragment.index as usize;
        while self.partial.len() <= index {
            self.partial.push(PartialToolCall::default());
        }
        let slot = &mut self.partial[index];
        if let Some(id) = fragment.id {
            slot.id = id;
        }
        if let Some(function) = fragment.function {
            if let Some(name) = function.name {
                slot.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                slot.arguments.push_str(&arguments);
            }
        }
    }

    fn finish(self) -> Vec<ToolCall> {
        self.partial
            .into_iter()
            .filter(|p| !p.name.is_empty())
            .map(|p| {
                let arguments = serde_json::from_str(&p.arguments)
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                ToolCall {
                    id: p.id,
                    name: p.name,
                    arguments,
                }
            })
            .collect()
    }
}

// --- wire types ---

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<ApiStreamOptions>,
}

#[derive(Serialize)]
struct ApiStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ApiFunctionDef,
}

#[derive(Serialize)]
struct ApiFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCallOut>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Serialize)]
struct ApiToolCallOut {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: ApiFunctionCallOut,
}

#[derive(Serialize)]
struct ApiFunctionCallOut {
    name: String,
    arguments: String,
}

impl ApiMessage {
    fn system(text: &str) -> Self {
        Self {
            role: "system",
            content: Some(serde_json::Value::String(text.to_string())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    fn from_chat(message: &ChatMessage) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };

        let content = content_value(&message.parts);

        let tool_calls = if !message.has_tool_calls() {
            None
        } else {
            Some(
                message
                    .tool_calls
                    .iter()
                    .map(|tc| ApiToolCallOut {
                        id: tc.id.clone(),
                        call_type: "function",
                        function: ApiFunctionCallOut {
                            name: tc.name.clone(),
                            arguments: tc.arguments.to_string(),
                        },
                    })
                    .collect(),
            )
        };

        Self {
            role,
            content,
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
            name: message.tool_name.clone(),
        }
    }
}

/// Render message parts as the chat-completions content field: plain string
/// for text-only messages, a typed part array when images are present.
fn content_value(parts: &[Part]) -> Option<serde_json::Value> {
    let has_image = parts.iter().any(|p| matches!(p, Part::Image { .. }));
    if !has_image {
        let text = parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            return None;
        }
        return Some(serde_json::Value::String(text));
    }

    let blocks: Vec<serde_json::Value> = parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
            Part::Image { media_type, data } => Some(serde_json::json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{};base64,{}", media_type, data)}
            })),
            // File parts are extracted to text upstream; never sent raw.
            Part::File { .. } => None,
        })
        .collect();
    Some(serde_json::Value::Array(blocks))
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunctionCall,
}

#[derive(Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

impl ApiToolCall {
    fn into_tool_call(self) -> Result<ToolCall, ProviderError> {
        let arguments = serde_json::from_str(&self.function.arguments).map_err(|e| {
            ProviderError::InvalidResponse {
                provider: "openai".to_string(),
                reason: format!("tool call arguments are not JSON: {}", e),
            }
        })?;
        Ok(ToolCall {
            id: self.id,
            name: self.function.name,
            arguments,
        })
    }
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl ApiUsage {
    fn into_usage(self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
        }
    }
}

#[derive(Deserialize)]
struct ApiStreamChunk {
    #[serde(default)]
    choices: Vec<ApiStreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiStreamChoice {
    delta: Option<ApiStreamDelta>,
}

#[derive(Deserialize)]
struct ApiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCallDelta>>,
}

#[derive(Deserialize)]
struct ApiToolCallDelta {
    index: u32,
    id: Option<String>,
    function: Option<ApiFunctionDelta>,
}

#[derive(Deserialize)]
struct ApiFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
