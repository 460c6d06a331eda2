//! LLM abstraction: chat messages, tool definitions and the [`LlmBackend`] trait.
//!
//! Two backends are provided: an OpenAI-compatible chat-completions client (Together,
//! LM Studio, OpenAI) and an Ollama client. Every call carries a [`ModelProfile`], which
//! is how the pipeline distinguishes deterministic, creative and fast invocations.

mod ollama;
mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use crate::config::ModelProfile;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("llm api error: {0}")]
    Api(String),
}

/// A chat backend. Implementations must be cheap to share behind `Arc`.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Non-streaming chat completion. Pass `tools` to enable function calling.
    async fn chat(
        &self,
        profile: &ModelProfile,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ChatResponse, LlmError>;
}

/// Single-shot prompt: optional system message plus one user message, returns the text.
pub async fn complete(
    backend: &dyn LlmBackend,
    profile: &ModelProfile,
    system: Option<&str>,
    prompt: &str,
) -> Result<String, LlmError> {
    let mut messages = Vec::with_capacity(2);
    if let Some(s) = system.filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(s));
    }
    messages.push(ChatMessage::user(prompt));
    let res = backend.chat(profile, messages, None).await?;
    Ok(res.content().to_string())
}

/// One tool/function call in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(rename = "type", default)]
    pub typ: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    #[serde(default)]
    pub index: Option<u32>,
    pub name: String,
    /// Arguments as JSON object or string (model-dependent).
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn function(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            typ: "function".to_string(),
            function: ToolCallFunction {
                index: None,
                name: name.into(),
                arguments,
            },
        }
    }

    /// Arguments as an object; models sometimes send a JSON-encoded string instead.
    pub fn arguments(&self) -> serde_json::Value {
        match &self.function.arguments {
            serde_json::Value::String(s) => {
                serde_json::from_str(s).unwrap_or(serde_json::Value::Null)
            }
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// When role is "tool", the name of the tool this result is for.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "tool_name")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            ..Self::new("assistant", content)
        }
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(name.into()),
            ..Self::new("tool", content)
        }
    }
}

/// Tool definition for function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub typ: String,
    pub function: ToolFunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub done: bool,
}

impl ChatResponse {
    /// Assistant reply with the given text and tool calls.
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            message: Some(ChatMessage::assistant(content, tool_calls)),
            done: true,
        }
    }

    /// Text content of the assistant message, if any.
    pub fn content(&self) -> &str {
        self.message
            .as_ref()
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// Parsed tool/function calls from the assistant message, if any.
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.message
            .as_ref()
            .and_then(|m| m.tool_calls.as_deref())
            .unwrap_or(&[])
    }
}
