use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Message Types
// ============================================================================

/// Message role in conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message in conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,

    /// Tool call ID (for tool responses)
    pub tool_call_id: Option<String>,

    /// Tool calls made by assistant
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// An assistant turn carrying only a tool call, the way the wire
    /// replays a tool round.
    pub fn assistant_tool_call(tool_call: ToolCall) -> Self {
        Message {
            role: Role::Assistant,
            content: String::new(),
            tool_call_id: None,
            tool_calls: Some(vec![tool_call]),
        }
    }

    /// The tool-result turn answering `tool_call_id`.
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Message {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Role::System => write!(f, "System: {}", self.content),
            Role::User => write!(f, "User: {}", self.content),
            Role::Assistant => write!(f, "Assistant: {}", self.content),
            Role::Tool => write!(f, "Tool: {}", self.content),
        }
    }
}

/// Tool call made by the LLM. `arguments` stays a raw JSON string so a
/// replayed conversation carries exactly the bytes the model produced;
/// dispatch parses it into typed parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

// ============================================================================
// Tool Definitions
// ============================================================================

/// Tool definition for function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema
}

// ============================================================================
// Stream Events
// ============================================================================

/// Event emitted while a chat completion streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Text content delta
    Content(String),

    /// The stream finished; carries whatever tool calls were assembled
    /// from the deltas (empty for a plain text answer).
    Completed { tool_calls: Vec<ToolCall> },
}

// ============================================================================
// Helper: Tool Call Assembler
// ============================================================================

/// Assembles tool calls from streamed deltas, keyed by the wire index so
/// the first-announced call stays first.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: BTreeMap<usize, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a tool call delta
    pub fn process_delta(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: Option<String>,
    ) {
        let call = self.calls.entry(index).or_default();

        if let Some(id) = id {
            call.id = id;
        }
        if let Some(name) = name {
            call.name = name;
        }
        if let Some(delta) = arguments_delta {
            call.arguments.push_str(&delta);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// All completed tool calls in announcement order.
    pub fn into_tool_calls(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .map(|partial| ToolCall {
                id: partial.id,
                name: partial.name,
                arguments: partial.arguments,
            })
            .collect()
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_orders_calls_by_index() {
        let mut asm = ToolCallAssembler::new();
        asm.process_delta(1, Some("b".into()), Some("SECOND".into()), None);
        asm.process_delta(0, Some("a".into()), Some("FIRST".into()), Some("{".into()));
        asm.process_delta(0, None, None, Some("}".into()));

        let calls = asm.into_tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "FIRST");
        assert_eq!(calls[0].arguments, "{}");
        assert_eq!(calls[1].id, "b");
    }

    #[test]
    fn assembler_accumulates_argument_deltas() {
        let mut asm = ToolCallAssembler::new();
        asm.process_delta(0, Some("id".into()), Some("EXECUTE".into()), None);
        asm.process_delta(0, None, None, Some("{\"code\":".into()));
        asm.process_delta(0, None, None, Some("\"ls\"}".into()));

        let calls = asm.into_tool_calls();
        assert_eq!(calls[0].arguments, "{\"code\":\"ls\"}");
    }
}
