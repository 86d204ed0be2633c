// OpenAI-wire chat client using reqwest + SSE streaming.

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use super::types::*;

/// One streaming chat-completion request. Model, key and base URL travel
/// with the request because the shell's configuration can change between
/// prompts.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, LlmError>> + Send>>;

/// Streaming chat-completion client. The production implementation talks
/// the OpenAI wire protocol; tests script one.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LlmError>;
}

// Request/Response types matching the OpenAI API spec

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize, Clone)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String, // Always "function"
    function: WireFunction,
}

#[derive(Debug, Serialize, Clone)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "role")]
enum ChatMessage {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: String },
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<WireToolCall>>,
    },
    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: String, // Always "function"
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireFunctionCall {
    name: String,
    arguments: String, // JSON string
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    delta: Delta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    #[allow(dead_code)]
    tool_type: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// OpenAI-compatible provider
#[derive(Clone, Default)]
pub struct OpenAiClient {
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert our Message type to the wire format
    fn convert_message(msg: &Message) -> ChatMessage {
        match msg.role {
            Role::System => ChatMessage::System {
                content: msg.content.clone(),
            },
            Role::User => ChatMessage::User {
                content: msg.content.clone(),
            },
            Role::Assistant => {
                let tool_calls = msg.tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .map(|tc| WireToolCall {
                            id: tc.id.clone(),
                            tool_type: "function".to_string(),
                            function: WireFunctionCall {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect()
                });

                ChatMessage::Assistant {
                    content: Some(msg.content.clone()),
                    tool_calls,
                }
            }
            Role::Tool => ChatMessage::Tool {
                content: msg.content.clone(),
                tool_call_id: msg.tool_call_id.clone().unwrap_or_default(),
            },
        }
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|t| WireTool {
                tool_type: "function".to_string(),
                function: WireFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ChatClient for OpenAiClient {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LlmError> {
        if request.api_key.is_empty() {
            return Err(LlmError::ConfigError(
                "openai.api_key is not set (use: aiset openai.api_key <key>)".to_string(),
            ));
        }

        let messages: Vec<ChatMessage> =
            request.messages.iter().map(Self::convert_message).collect();
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(Self::convert_tools(&request.tools))
        };

        let body = ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            stream: true,
            tools,
        };

        log::debug!(
            "chat request: model={} messages={} base_url={}",
            request.model,
            body.messages.len(),
            request.base_url
        );

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                request.base_url.trim_end_matches('/')
            ))
            .header("Authorization", format!("Bearer {}", request.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let byte_stream = response.bytes_stream();
        let event_stream = byte_stream.eventsource();

        let output_stream = async_stream::stream! {
            futures::pin_mut!(event_stream);

            let mut assembler = ToolCallAssembler::new();

            while let Some(event_result) = event_stream.next().await {
                match event_result {
                    Ok(event) => {
                        if event.data == "[DONE]" {
                            break;
                        }

                        match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                            Ok(chunk) => {
                                for choice in chunk.choices {
                                    if let Some(content) = choice.delta.content {
                                        if !content.is_empty() {
                                            yield Ok(ChatEvent::Content(content));
                                        }
                                    }

                                    if let Some(tool_calls) = choice.delta.tool_calls {
                                        for delta in tool_calls {
                                            assembler.process_delta(
                                                delta.index,
                                                delta.id,
                                                delta.function.as_ref().and_then(|f| f.name.clone()),
                                                delta.function.and_then(|f| f.arguments),
                                            );
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                yield Err(LlmError::StreamError(format!(
                                    "failed to parse chunk: {}",
                                    e
                                )));
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(LlmError::StreamError(e.to_string()));
                        break;
                    }
                }
            }

            yield Ok(ChatEvent::Completed {
                tool_calls: assembler.into_tool_calls(),
            });
        };

        Ok(Box::pin(output_stream))
    }
}
