//! Scripted chat client for tests: each `stream_chat` call pops the next
//! prepared response and records the request it saw.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::stream;

use super::client::{ChatClient, ChatRequest, ChatStream};
use super::types::{ChatEvent, LlmError, ToolCall};
use crate::util;

#[derive(Default)]
pub struct MockChatClient {
    responses: Mutex<VecDeque<Vec<ChatEvent>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain text answer, streamed as word-sized deltas.
    pub fn push_text(&self, text: &str) {
        let mut events: Vec<ChatEvent> = Vec::new();
        for word in text.split_inclusive(' ') {
            events.push(ChatEvent::Content(word.to_string()));
        }
        events.push(ChatEvent::Completed { tool_calls: vec![] });
        util::lock(&self.responses).push_back(events);
    }

    /// Queue a response that requests a single tool call.
    pub fn push_tool_call(&self, id: &str, name: &str, arguments: &str) {
        util::lock(&self.responses).push_back(vec![ChatEvent::Completed {
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
        }]);
    }

    /// Requests observed so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        util::lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        util::lock(&self.requests).len()
    }
}

#[async_trait::async_trait]
impl ChatClient for MockChatClient {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LlmError> {
        util::lock(&self.requests).push(request);

        let events = util::lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| vec![ChatEvent::Completed { tool_calls: vec![] }]);

        Ok(Box::pin(stream::iter(
            events.into_iter().map(Ok::<ChatEvent, LlmError>),
        )))
    }
}
