// LLM layer: wire-neutral message/tool types and the streaming chat client.

pub mod client;
pub mod types;

#[cfg(test)]
pub mod mock;

// Re-export main types
pub use client::{ChatClient, ChatRequest, ChatStream, OpenAiClient};
pub use types::*;
