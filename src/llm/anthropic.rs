//! Anthropic messages API provider.
//!
//! Batch completion with tool-use blocks. The system prompt travels in the
//! top-level `system` field, not the message list; streaming falls back to
//! the default single-delta path.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::llm::retry::{backoff_delay, is_retryable_status};
use crate::llm::{
    ModelProvider, Part, Role, TokenUsage, ToolCall, ToolCompletionRequest,
    ToolCompletionResponse,
};

const BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_RETRIES: u32 = 2;

pub struct AnthropicProvider {
    client: Client,
    model: String,
    api_key: SecretString,
}

impl AnthropicProvider {
    pub fn new(model: impl Into<String>, api_key: SecretString) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            model: model.into(),
            api_key,
        }
    }

    fn build_body(&self, request: &ToolCompletionRequest) -> ApiRequest {
        // Anthropic rejects system/tool roles in the message list; tool
        // results become user-role tool_result blocks.
        let mut messages: Vec<ApiMessage> = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            match message.role {
                Role::System => {
                    // Folded into the system field by the caller's assembly
                    // plan; a stray one degrades to user text.
                    messages.push(ApiMessage {
                        role: "user",
                        content: vec![ApiBlock::text(message.text())],
                    });
                }
                Role::User => messages.push(ApiMessage {
                    role: "user",
                    content: blocks_from_parts(&message.parts),
                }),
                Role::Assistant => {
                    let mut content = Vec::new();
                    let text = message.text();
                    if !text.is_empty() {
                        content.push(ApiBlock::text(text));
                    }
                    for tc in &message.tool_calls {
                        content.push(ApiBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input: tc.arguments.clone(),
                        });
                    }
                    if content.is_empty() {
                        content.push(ApiBlock::text(String::new()));
                    }
                    messages.push(ApiMessage {
                        role: "assistant",
                        content,
                    });
                }
                Role::Tool => messages.push(ApiMessage {
                    role: "user",
                    content: vec![ApiBlock::ToolResult {
                        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                        content: message.text(),
                    }],
                }),
            }
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| ApiTool {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        input_schema: t.parameters.clone(),
                    })
                    .collect(),
            )
        };

        ApiRequest {
            model: self.model.clone(),
            system: request.system.clone(),
            messages,
            tools,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn provider_key(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, ProviderError> {
        let body = self.build_body(&request);
        let url = format!("{}/v1/messages", BASE_URL);

        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            let response = self
                .client
                .post(&url)
                .header("x-api-key", self.api_key.expose_secret())
                .header("anthropic-version", API_VERSION)
                .json(&body)
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
                    provider: "anthropic".to_string(),
                    reason: format!("HTTP {}: {}", status, text),
                });
            }
            if is_retryable_status(status) && attempt < MAX_RETRIES {
                tracing::warn!(status, attempt, "anthropic transient error, retrying");
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
                    provider: "anthropic".to_string(),
                    retry_after,
                });
            }
            if !(200..300).contains(&status) {
                let text = response.text().await.unwrap_or_default();
                return Err(ProviderError::RequestFailed {
                    provider: "anthropic".to_string(),
                    reason: format!("HTTP {}: {}", status, text),
                });
            }

            let api: ApiResponse = response.json().await.map_err(ProviderError::Http)?;
            return Ok(api.into_response());
        }

        Err(last_err.unwrap_or_else(|| ProviderError::RequestFailed {
            provider: "anthropic".to_string(),
            reason: "retries exhausted".to_string(),
        }))
    }
}

fn blocks_from_parts(parts: &[Part]) -> Vec<ApiBlock> {
    let blocks: Vec<ApiBlock> = parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(ApiBlock::text(text.clone())),
            Part::Image { media_type, data } => Some(ApiBlock::Image {
                source: ApiImageSource {
                    source_type: "base64",
                    media_type: media_type.clone(),
                    data: data.clone(),
                },
            }),
            Part::File { .. } => None,
        })
        .collect();
    if blocks.is_empty() {
        vec![ApiBlock::text(String::new())]
    } else {
        blocks
    }
}

// --- wire types ---

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        text: String,
    },
    Image {
        source: ApiImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl ApiBlock {
    fn text(text: String) -> Self {
        Self::Text { text }
    }
}

#[derive(Serialize)]
struct ApiImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ApiResponseBlock>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl ApiResponse {
    fn into_response(self) -> ToolCompletionResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in self.content {
            match block {
                ApiResponseBlock::Text { text: t } => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&t);
                }
                ApiResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                ApiResponseBlock::Unknown => {}
            }
        }
        ToolCompletionResponse {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls,
            usage: self
                .usage
                .map(|u| TokenUsage {
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                })
                .unwrap_or_default(),
        }
    }
}
